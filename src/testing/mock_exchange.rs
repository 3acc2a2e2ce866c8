//! Mock Exchange Client
//!
//! Serves scripted order books, balances and order outcomes with optional
//! simulated latency, and records every placement for assertions.

use crate::balances::BalanceRecord;
use crate::books::OrderBookSide;
use crate::error::ArbError;
use crate::exchange::{BookSide, ExchangeClient, OpenOrder, OrderOutcome, OrderSide};
use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MockExchangeConfig {
    /// Simulated latency range in milliseconds; (0, 0) responds instantly.
    pub latency_range_ms: (u64, u64),
}

impl Default for MockExchangeConfig {
    fn default() -> Self {
        Self {
            latency_range_ms: (0, 0),
        }
    }
}

/// One recorded order placement.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub venue: String,
    pub market: String,
    pub coin: String,
    pub quantity: f64,
    pub rate: f64,
    pub side: OrderSide,
}

#[derive(Default)]
pub struct MockExchange {
    config: MockExchangeConfig,
    books: DashMap<(String, String, String, bool), OrderBookSide>,
    balances: DashMap<(String, String), BalanceRecord>,
    open_orders: DashMap<String, Vec<OpenOrder>>,
    queued_outcomes: Mutex<VecDeque<OrderOutcome>>,
    placements: Mutex<Vec<PlacedOrder>>,
    next_order_id: AtomicU64,
}

fn side_is_bids(side: BookSide) -> bool {
    matches!(side, BookSide::Bids)
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: MockExchangeConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn set_book(
        &self,
        venue: &str,
        market: &str,
        coin: &str,
        side: BookSide,
        levels: &[(f64, f64)],
    ) {
        self.books.insert(
            (
                venue.to_string(),
                market.to_string(),
                coin.to_string(),
                side_is_bids(side),
            ),
            OrderBookSide::from_levels(levels),
        );
    }

    pub fn set_balance(&self, venue: &str, coin: &str, record: BalanceRecord) {
        self.balances
            .insert((venue.to_string(), coin.to_string()), record);
    }

    /// Queues an outcome for the next placement; without a queue entry the
    /// placement succeeds with a sequential order id.
    pub fn queue_outcome(&self, outcome: OrderOutcome) {
        self.queued_outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn add_open_order(&self, venue: &str, order: OpenOrder) {
        self.open_orders
            .entry(venue.to_string())
            .or_default()
            .push(order);
    }

    /// Everything placed so far, in placement order.
    pub fn placements(&self) -> Vec<PlacedOrder> {
        self.placements.lock().unwrap().clone()
    }

    async fn simulate_latency(&self) {
        let (low, high) = self.config.latency_range_ms;
        if high == 0 {
            return;
        }
        let millis = rand::thread_rng().gen_range(low..=high);
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    async fn get_order_book(
        &self,
        venue: &str,
        market: &str,
        coin: &str,
        side: BookSide,
    ) -> Result<OrderBookSide, ArbError> {
        self.simulate_latency().await;
        Ok(self
            .books
            .get(&(
                venue.to_string(),
                market.to_string(),
                coin.to_string(),
                side_is_bids(side),
            ))
            .map(|book| book.clone())
            .unwrap_or_default())
    }

    async fn get_balance(&self, venue: &str, coin: &str) -> Result<BalanceRecord, ArbError> {
        self.simulate_latency().await;
        Ok(self
            .balances
            .get(&(venue.to_string(), coin.to_string()))
            .map(|record| *record)
            .unwrap_or_default())
    }

    async fn place_limit_order(
        &self,
        venue: &str,
        market: &str,
        coin: &str,
        quantity: f64,
        rate: f64,
        side: OrderSide,
    ) -> OrderOutcome {
        self.simulate_latency().await;
        self.placements.lock().unwrap().push(PlacedOrder {
            venue: venue.to_string(),
            market: market.to_string(),
            coin: coin.to_string(),
            quantity,
            rate,
            side,
        });
        if let Some(outcome) = self.queued_outcomes.lock().unwrap().pop_front() {
            return outcome;
        }
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst) + 1;
        OrderOutcome::placed(id.to_string(), "{}")
    }

    async fn cancel_order(&self, _venue: &str, _order_id: &str) -> Result<bool, ArbError> {
        self.simulate_latency().await;
        Ok(true)
    }

    async fn get_open_orders(&self, venue: &str) -> Result<Vec<OpenOrder>, ArbError> {
        self.simulate_latency().await;
        Ok(self
            .open_orders
            .get(venue)
            .map(|orders| orders.clone())
            .unwrap_or_default())
    }
}
