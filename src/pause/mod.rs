//! Trading Pauses
//!
//! Holds the (exchange, market, coin) triples whose trading is temporarily
//! suspended after an adverse order outcome. Entries carry an expiry second;
//! expired entries are inert and only removed by an explicit sweep.

use crate::utils::epoch_seconds;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

pub type PauseKey = (String, String, String);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseEntry {
    /// Second after the Unix epoch when trading may resume.
    pub until_epoch_secs: i64,
    /// The original error text that caused the suspension.
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct PauseTable {
    entries: DashMap<PauseKey, PauseEntry>,
}

impl PauseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the table from persisted entries at startup.
    pub fn load(entries: Vec<(PauseKey, PauseEntry)>) -> Self {
        let table = Self::new();
        for (key, entry) in entries {
            table.entries.insert(key, entry);
        }
        table
    }

    /// Suspends trading the triple for a number of minutes from now.
    pub fn pause_for_minutes(
        &self,
        exchange: &str,
        market: &str,
        coin: &str,
        minutes: i64,
        reason: &str,
    ) -> PauseEntry {
        let entry = PauseEntry {
            until_epoch_secs: epoch_seconds() + minutes * 60,
            reason: reason.to_string(),
        };
        self.entries.insert(
            (exchange.to_string(), market.to_string(), coin.to_string()),
            entry.clone(),
        );
        entry
    }

    /// Whether the triple is currently suspended. Expired entries do not
    /// count and stay in place until swept.
    pub fn is_paused(&self, exchange: &str, market: &str, coin: &str) -> bool {
        let key = (exchange.to_string(), market.to_string(), coin.to_string());
        match self.entries.get(&key) {
            Some(entry) => entry.until_epoch_secs > epoch_seconds(),
            None => false,
        }
    }

    /// Removes expired entries.
    pub fn sweep_expired(&self) {
        let now = epoch_seconds();
        self.entries.retain(|_, entry| entry.until_epoch_secs > now);
    }

    #[cfg(test)]
    fn insert_raw(&self, key: PauseKey, entry: PauseEntry) {
        self.entries.insert(key, entry);
    }
}
