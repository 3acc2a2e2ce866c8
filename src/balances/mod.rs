//! Balance Cache
//!
//! In-memory ledger of per-exchange/coin balances shared by all trading
//! workers. Reads compensate for withdrawals the venue has not yet settled;
//! commits are wholesale overwrites. The cache does no locking of its own:
//! every read-modify-write sequence must run under the shared trade lock the
//! orchestrator wraps around it, or concurrent traders would lose updates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Funds for one (exchange, coin) wallet, as the venue reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub total: f64,
    pub available: f64,
    pub reserved: f64,
    pub unconfirmed: f64,
}

impl BalanceRecord {
    pub fn new(total: f64, available: f64, reserved: f64, unconfirmed: f64) -> Self {
        Self {
            total,
            available,
            reserved,
            unconfirmed,
        }
    }

    /// What the venue would actually let an order spend right now.
    pub fn spendable(&self) -> f64 {
        self.total - self.reserved - self.unconfirmed
    }
}

/// Withdrawn amounts the venues have not executed yet, per (exchange, coin).
pub type PendingWithdrawals = HashMap<(String, String), f64>;

#[derive(Debug, Default)]
pub struct BalanceCache {
    balances: HashMap<(String, String), BalanceRecord>,
    pending_withdrawals: PendingWithdrawals,
}

impl BalanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the withdrawal corrections supplied by the external monitor.
    pub fn set_pending_withdrawals(&mut self, withdrawals: PendingWithdrawals) {
        self.pending_withdrawals = withdrawals;
    }

    /// Reads the balance for a wallet. A matching pending withdrawal is
    /// subtracted from the available amount and consumed, so venues that
    /// report balances before a withdrawal settles cannot make the bot spend
    /// funds that are already on their way out. Available never goes negative.
    pub fn read(&mut self, exchange: &str, coin: &str) -> BalanceRecord {
        let key = (exchange.to_string(), coin.to_string());
        let mut record = self.balances.get(&key).copied().unwrap_or_default();
        if let Some(correction) = self.pending_withdrawals.remove(&key) {
            if correction > 0.0 {
                let before = record.available;
                record.available = (record.available - correction).max(0.0);
                log::info!(
                    "Pending withdrawal correction on available {} at {}: before {} after {}",
                    coin,
                    exchange,
                    before,
                    record.available
                );
                self.balances.insert(key, record);
            }
        }
        record
    }

    /// Wholesale overwrite of a wallet's record. Not a delta: callers holding
    /// the trade lock compute the new record themselves.
    pub fn commit(&mut self, exchange: &str, coin: &str, record: BalanceRecord) {
        self.balances
            .insert((exchange.to_string(), coin.to_string()), record);
    }
}
