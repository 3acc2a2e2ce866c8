//! Trading Orchestration
//!
//! Wires the shared state and the external collaborators together and runs
//! one scheduling window: an arbitrage worker per configured pair plus the
//! multipath scheduler, all as independent concurrent tasks. Workers isolate
//! their own failures; nothing here aborts a sibling.

use crate::arbitrage::ArbitragePairWorker;
use crate::balances::BalanceCache;
use crate::books::MinimumTradeSizes;
use crate::config::Config;
use crate::error::ArbError;
use crate::exchange::ExchangeClient;
use crate::multipath::MultipathScheduler;
use crate::pause::PauseTable;
use crate::persistence::Store;
use log::{info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// The deadline all loops within one scheduling window check. Workers exit
/// promptly at the boundary; outstanding orders stay on the venues and are
/// reconciled by balance corrections on later runs.
#[derive(Debug, Clone, Copy)]
pub struct SchedulingWindow {
    ends_at: Instant,
}

impl SchedulingWindow {
    pub fn open_for(duration: Duration) -> Self {
        Self {
            ends_at: Instant::now() + duration,
        }
    }

    pub fn still_open(&self) -> bool {
        Instant::now() < self.ends_at
    }

    pub fn remaining(&self) -> Duration {
        self.ends_at.saturating_duration_since(Instant::now())
    }
}

/// One coin arbitraged between two venues at a market, as supplied by the
/// external scheduler.
#[derive(Debug, Clone)]
pub struct TradingPair {
    pub exchange1: String,
    pub exchange2: String,
    pub market: String,
    pub coin: String,
    /// Weekday restriction. Present but disabled: every day trades, pending
    /// a product decision on irregular trading days.
    pub days: Option<u8>,
}

/// Process-wide shared state, passed by reference to every worker. The
/// balance cache sits behind the one lock that serializes the
/// read-decide-debit critical section; the other tables take cheap
/// per-table access.
pub struct TradingContext {
    pub config: Arc<Config>,
    pub client: Arc<dyn ExchangeClient>,
    pub store: Arc<dyn Store>,
    pub balances: Mutex<BalanceCache>,
    pub pauses: PauseTable,
    pub minimum_sizes: MinimumTradeSizes,
}

impl TradingContext {
    /// Loads the shared tables from the store and primes the balance cache
    /// with a full fetch for the given wallets. Accurate balances are
    /// essential to every trading decision, so this runs before any worker.
    pub async fn bootstrap(
        config: Arc<Config>,
        client: Arc<dyn ExchangeClient>,
        store: Arc<dyn Store>,
        wallets: &[(String, String)],
    ) -> Result<Arc<Self>, ArbError> {
        let minimum_sizes = store.load_minimum_trade_sizes().await?;
        let pauses = PauseTable::load(store.load_paused_entries().await?);
        let mut balances = BalanceCache::new();
        for (venue, coin) in wallets {
            match client.get_balance(venue, coin).await {
                Ok(record) => balances.commit(venue, coin, record),
                Err(err) => {
                    warn!("Could not fetch the balance of {} at {}: {}", coin, venue, err);
                }
            }
        }
        balances.set_pending_withdrawals(store.load_pending_withdrawals().await?);
        info!(
            "Trading context ready: {} wallets primed, {} minimum trade sizes",
            wallets.len(),
            minimum_sizes.len()
        );
        Ok(Arc::new(Self {
            config,
            client,
            store,
            balances: Mutex::new(balances),
            pauses,
            minimum_sizes,
        }))
    }

    /// A context over already-loaded tables, for embedders and tests that
    /// manage their own loading.
    pub fn new(
        config: Arc<Config>,
        client: Arc<dyn ExchangeClient>,
        store: Arc<dyn Store>,
        balances: BalanceCache,
        pauses: PauseTable,
        minimum_sizes: MinimumTradeSizes,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            client,
            store,
            balances: Mutex::new(balances),
            pauses,
            minimum_sizes,
        })
    }
}

pub struct TradingOrchestrator {
    ctx: Arc<TradingContext>,
}

impl TradingOrchestrator {
    pub fn new(ctx: Arc<TradingContext>) -> Self {
        Self { ctx }
    }

    /// Runs one scheduling window to completion. The external scheduler
    /// calls this once per window with the pairs to evaluate.
    pub async fn run_window(&self, pairs: Vec<TradingPair>, window: SchedulingWindow) {
        info!(
            "🚀 Trading window open for {:?} across {} pairs",
            window.remaining(),
            pairs.len()
        );
        let mut jobs = Vec::new();

        for pair in pairs {
            if pair.coin == pair.market {
                continue;
            }
            // A paused venue sits the window out for this pair.
            let paused1 = self
                .ctx
                .pauses
                .is_paused(&pair.exchange1, &pair.market, &pair.coin);
            if paused1 {
                info!(
                    "Exchange {} paused arbitrage trading {} @ {}",
                    pair.exchange1, pair.coin, pair.market
                );
            }
            let paused2 = self
                .ctx
                .pauses
                .is_paused(&pair.exchange2, &pair.market, &pair.coin);
            if paused2 {
                info!(
                    "Exchange {} paused arbitrage trading {} @ {}",
                    pair.exchange2, pair.coin, pair.market
                );
            }
            if paused1 || paused2 {
                continue;
            }
            let worker = ArbitragePairWorker::new(self.ctx.clone(), window, pair);
            jobs.push(tokio::spawn(async move { worker.run().await }));
        }

        let scheduler = MultipathScheduler::new(self.ctx.clone(), window);
        jobs.push(tokio::spawn(async move { scheduler.run().await }));

        for joined in futures::future::join_all(jobs).await {
            if let Err(err) = joined {
                warn!("A trading worker panicked: {}", err);
            }
        }
        info!("✅ Trading window closed");
    }
}
