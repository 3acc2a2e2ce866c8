//! Persistence Interface
//!
//! The durable store for trade history, multipath plans and the shared
//! tables is an external collaborator. The trading core only depends on this
//! trait; the embedding process supplies the implementation.

use crate::balances::PendingWithdrawals;
use crate::books::MinimumTradeSizes;
use crate::error::ArbError;
use crate::multipath::MultipathPlan;
use crate::pause::{PauseEntry, PauseKey};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One executed arbitrage, recorded for profitability reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub market: String,
    pub coin: String,
    pub asking_venue: String,
    pub bidding_venue: String,
    pub quantity: f64,
    /// Projected gain in base market coins, fees included.
    pub projected_gain: f64,
    pub recorded_epoch_secs: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// All multipath plans in the order they were stored, oldest first.
    async fn load_multipath_plans(&self) -> Result<Vec<MultipathPlan>, ArbError>;

    /// Persists a plan's current state, including status and executing flag.
    async fn save_multipath_plan(&self, plan: &MultipathPlan) -> Result<(), ArbError>;

    async fn record_trade(&self, trade: &TradeRecord) -> Result<(), ArbError>;

    /// Records the rate a coin was bought for. The store keeps the highest
    /// recorded rate so a later sale is never misjudged as a gain.
    async fn record_price_bought(
        &self,
        venue: &str,
        market: &str,
        coin: &str,
        rate: f64,
    ) -> Result<(), ArbError>;

    async fn load_minimum_trade_sizes(&self) -> Result<MinimumTradeSizes, ArbError>;

    async fn load_paused_entries(&self) -> Result<Vec<(PauseKey, PauseEntry)>, ArbError>;

    async fn store_pause_entry(
        &self,
        key: &PauseKey,
        entry: &PauseEntry,
    ) -> Result<(), ArbError>;

    async fn load_pending_withdrawals(&self) -> Result<PendingWithdrawals, ArbError>;
}
