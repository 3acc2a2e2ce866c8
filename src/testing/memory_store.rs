//! In-Memory Store
//!
//! Records every persistence call so tests can assert on the exact
//! sequence of saved plan states, trades, prices and pauses.

use crate::balances::PendingWithdrawals;
use crate::books::MinimumTradeSizes;
use crate::error::ArbError;
use crate::multipath::MultipathPlan;
use crate::pause::{PauseEntry, PauseKey};
use crate::persistence::{Store, TradeRecord};
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    plans: Mutex<Vec<MultipathPlan>>,
    saved_plans: Mutex<Vec<MultipathPlan>>,
    trades: Mutex<Vec<TradeRecord>>,
    bought_prices: Mutex<Vec<(String, String, String, f64)>>,
    pause_entries: Mutex<Vec<(PauseKey, PauseEntry)>>,
    minimum_sizes: Mutex<MinimumTradeSizes>,
    withdrawals: Mutex<PendingWithdrawals>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_plan(&self, plan: MultipathPlan) {
        self.plans.lock().unwrap().push(plan);
    }

    pub fn seed_minimum_sizes(&self, sizes: MinimumTradeSizes) {
        *self.minimum_sizes.lock().unwrap() = sizes;
    }

    pub fn seed_withdrawals(&self, withdrawals: PendingWithdrawals) {
        *self.withdrawals.lock().unwrap() = withdrawals;
    }

    /// Every plan state that was persisted, in order.
    pub fn saved_plans(&self) -> Vec<MultipathPlan> {
        self.saved_plans.lock().unwrap().clone()
    }

    pub fn trades(&self) -> Vec<TradeRecord> {
        self.trades.lock().unwrap().clone()
    }

    pub fn bought_prices(&self) -> Vec<(String, String, String, f64)> {
        self.bought_prices.lock().unwrap().clone()
    }

    pub fn pause_entries(&self) -> Vec<(PauseKey, PauseEntry)> {
        self.pause_entries.lock().unwrap().clone()
    }

    /// The current stored state of one plan.
    pub fn plan(&self, id: i64) -> Option<MultipathPlan> {
        self.plans
            .lock()
            .unwrap()
            .iter()
            .find(|plan| plan.id == id)
            .cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_multipath_plans(&self) -> Result<Vec<MultipathPlan>, ArbError> {
        Ok(self.plans.lock().unwrap().clone())
    }

    async fn save_multipath_plan(&self, plan: &MultipathPlan) -> Result<(), ArbError> {
        self.saved_plans.lock().unwrap().push(plan.clone());
        let mut plans = self.plans.lock().unwrap();
        match plans.iter_mut().find(|stored| stored.id == plan.id) {
            Some(stored) => *stored = plan.clone(),
            None => plans.push(plan.clone()),
        }
        Ok(())
    }

    async fn record_trade(&self, trade: &TradeRecord) -> Result<(), ArbError> {
        self.trades.lock().unwrap().push(trade.clone());
        Ok(())
    }

    async fn record_price_bought(
        &self,
        venue: &str,
        market: &str,
        coin: &str,
        rate: f64,
    ) -> Result<(), ArbError> {
        self.bought_prices.lock().unwrap().push((
            venue.to_string(),
            market.to_string(),
            coin.to_string(),
            rate,
        ));
        Ok(())
    }

    async fn load_minimum_trade_sizes(&self) -> Result<MinimumTradeSizes, ArbError> {
        Ok(self.minimum_sizes.lock().unwrap().clone())
    }

    async fn load_paused_entries(&self) -> Result<Vec<(PauseKey, PauseEntry)>, ArbError> {
        Ok(self.pause_entries.lock().unwrap().clone())
    }

    async fn store_pause_entry(
        &self,
        key: &PauseKey,
        entry: &PauseEntry,
    ) -> Result<(), ArbError> {
        self.pause_entries
            .lock()
            .unwrap()
            .push((key.clone(), entry.clone()));
        Ok(())
    }

    async fn load_pending_withdrawals(&self) -> Result<PendingWithdrawals, ArbError> {
        Ok(self.withdrawals.lock().unwrap().clone())
    }
}
