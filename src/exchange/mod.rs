//! Exchange Client Interface
//!
//! The wire clients that talk to the venues live outside this crate. This
//! module defines the trait they implement plus the outcome types the trading
//! loops consume. Order placement deliberately never returns `Err`: the raw
//! error text and payload feed the follow-up classifier, which decides what
//! the failure means.

use crate::balances::BalanceRecord;
use crate::books::OrderBookSide;
use crate::error::ArbError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of an order book to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSide {
    /// Standing buy offers, best (highest) bid first.
    Bids,
    /// Standing sell offers, best (lowest) ask first.
    Asks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Order id a venue reports when a limit order filled synchronously. Some
/// venues return no id at all in that case, so the clients normalize it to
/// this marker.
pub const ORDER_FULFILLED: &str = "fulfilled";

/// The raw result of one limit order placement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderOutcome {
    /// Venue order id; empty when placement failed or the id is unknown.
    pub order_id: String,
    /// Raw response payload as the venue returned it.
    pub raw_response: String,
    /// Transport or API error text, empty on success.
    pub error: String,
}

impl OrderOutcome {
    pub fn placed(order_id: impl Into<String>, raw_response: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            raw_response: raw_response.into(),
            error: String::new(),
        }
    }

    pub fn fulfilled(raw_response: impl Into<String>) -> Self {
        Self {
            order_id: ORDER_FULFILLED.to_string(),
            raw_response: raw_response.into(),
            error: String::new(),
        }
    }

    pub fn failed(error: impl Into<String>, raw_response: impl Into<String>) -> Self {
        Self {
            order_id: String::new(),
            raw_response: raw_response.into(),
            error: error.into(),
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        self.order_id == ORDER_FULFILLED
    }
}

/// One open order as reported by a venue.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOrder {
    pub order_id: String,
    pub market: String,
    pub coin: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub rate: f64,
    pub placed_epoch_secs: i64,
}

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Fetches one side of the order book for a coin at a market.
    async fn get_order_book(
        &self,
        venue: &str,
        market: &str,
        coin: &str,
        side: BookSide,
    ) -> Result<OrderBookSide, ArbError>;

    /// Fetches the current balance of one coin wallet.
    async fn get_balance(&self, venue: &str, coin: &str) -> Result<BalanceRecord, ArbError>;

    /// Places a limit order. Failures are reported inside the outcome, never
    /// as `Err`, so the follow-up classifier always sees the raw texts.
    async fn place_limit_order(
        &self,
        venue: &str,
        market: &str,
        coin: &str,
        quantity: f64,
        rate: f64,
        side: OrderSide,
    ) -> OrderOutcome;

    /// Cancels an order; returns whether the venue confirmed the cancel.
    async fn cancel_order(&self, venue: &str, order_id: &str) -> Result<bool, ArbError>;

    /// Lists the open orders at a venue, used to locate uncertain order ids.
    async fn get_open_orders(&self, venue: &str) -> Result<Vec<OpenOrder>, ArbError>;
}
