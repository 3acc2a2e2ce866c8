//! Multipath Scheduler
//!
//! Each tick loads the persisted plans oldest first, skips the ones that
//! are terminal, already being executed, paused, or would trade the same
//! order books as a plan selected earlier, and runs the eligible ones
//! concurrently up to a fixed cap. Older plans finish before newer ones
//! start: a half-done path ties up funds until it completes.

use crate::multipath::{plan_is_paused, plans_clash, PlanRunner};
use crate::orchestrator::{SchedulingWindow, TradingContext};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

pub struct MultipathScheduler {
    ctx: Arc<TradingContext>,
    window: SchedulingWindow,
}

impl MultipathScheduler {
    pub fn new(ctx: Arc<TradingContext>, window: SchedulingWindow) -> Self {
        Self { ctx, window }
    }

    pub async fn run(&self) {
        while self.window.still_open() {
            let plans = match self.ctx.store.load_multipath_plans().await {
                Ok(plans) => plans,
                Err(err) => {
                    warn!("Could not load the multipath plans: {}", err);
                    tokio::time::sleep(Duration::from_secs(
                        self.ctx.config.multipath_tick_secs,
                    ))
                    .await;
                    continue;
                }
            };

            let mut jobs = Vec::new();
            let mut selected = 0usize;
            // Order books claimed by the plans selected this tick.
            let mut claimed_books = Vec::new();

            for plan in plans {
                if selected >= self.ctx.config.max_concurrent_multipaths {
                    continue;
                }
                // Terminal plans stay in the store for the record only.
                if plan.status.is_terminal() {
                    continue;
                }
                // A clash means both plans would trade against the same
                // order book, and one plan's fill changes the book the
                // other calculated with. A plan marked executing keeps its
                // books claimed so nothing clashing starts beside it.
                if plans_clash(&plan, &mut claimed_books) {
                    continue;
                }
                // Still owned by a previous, possibly delayed worker. It
                // will be retried once that worker clears the flag.
                if plan.executing {
                    continue;
                }
                if plan_is_paused(&plan, &self.ctx.pauses) {
                    continue;
                }

                info!("Scheduling multipath plan {} ({})", plan.id, plan.status);
                let runner = PlanRunner::new(self.ctx.clone(), self.window);
                jobs.push(tokio::spawn(async move { runner.run(plan).await }));
                selected += 1;
            }

            for joined in futures::future::join_all(jobs).await {
                if let Err(err) = joined {
                    warn!("A multipath worker panicked: {}", err);
                }
            }

            tokio::time::sleep(Duration::from_secs(self.ctx.config.multipath_tick_secs)).await;
        }
    }
}
