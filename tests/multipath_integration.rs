//! Drives the multipath state machine against the scripted exchange and
//! the in-memory store, asserting on the exact persisted state sequence.

use cross_arb_bot::balances::{BalanceCache, BalanceRecord};
use cross_arb_bot::books::MinimumTradeSizes;
use cross_arb_bot::config::Config;
use cross_arb_bot::exchange::{BookSide, OrderSide};
use cross_arb_bot::multipath::{
    LegPhase, MultipathLeg, MultipathPlan, MultipathScheduler, MultipathStatus, PlanRunner,
};
use cross_arb_bot::orchestrator::{SchedulingWindow, TradingContext};
use cross_arb_bot::pause::PauseTable;
use cross_arb_bot::testing::{MemoryStore, MockExchange};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const EXCHANGE: &str = "cryptopia";

/// A four-leg path: bitcoin -> ripple -> ethereum -> stellar -> bitcoin.
fn test_plan(status: MultipathStatus) -> MultipathPlan {
    let legs = [
        MultipathLeg {
            market: "bitcoin".to_string(),
            market_quantity: 0.01,
            rate: 0.001,
            coin: "ripple".to_string(),
            coin_quantity: 10.0,
            order_id: String::new(),
        },
        MultipathLeg {
            market: "ethereum".to_string(),
            market_quantity: 0.1,
            rate: 0.01,
            coin: "ripple".to_string(),
            coin_quantity: 10.0,
            order_id: String::new(),
        },
        MultipathLeg {
            market: "ethereum".to_string(),
            market_quantity: 0.1,
            rate: 0.02,
            coin: "stellar".to_string(),
            coin_quantity: 5.0,
            order_id: String::new(),
        },
        MultipathLeg {
            market: "bitcoin".to_string(),
            market_quantity: 0.0105,
            rate: 0.0021,
            coin: "stellar".to_string(),
            coin_quantity: 5.0,
            order_id: String::new(),
        },
    ];
    MultipathPlan {
        id: 1,
        exchange: EXCHANGE.to_string(),
        legs,
        gain: 5.0,
        status,
        executing: false,
    }
}

/// Books deep enough for every leg, at exactly the planned rates.
fn script_books(client: &MockExchange) {
    client.set_book(EXCHANGE, "bitcoin", "ripple", BookSide::Asks, &[(0.001, 100.0), (0.0011, 100.0)]);
    client.set_book(EXCHANGE, "ethereum", "ripple", BookSide::Bids, &[(0.01, 100.0), (0.009, 100.0)]);
    client.set_book(EXCHANGE, "ethereum", "stellar", BookSide::Asks, &[(0.02, 100.0), (0.021, 100.0)]);
    client.set_book(EXCHANGE, "bitcoin", "stellar", BookSide::Bids, &[(0.0021, 100.0), (0.002, 100.0)]);
}

/// Venue balances that confirm every leg's proceeds in full.
fn script_balances(client: &MockExchange) {
    client.set_balance(EXCHANGE, "ripple", BalanceRecord::new(20.0, 20.0, 0.0, 0.0));
    client.set_balance(EXCHANGE, "ethereum", BalanceRecord::new(1.0, 1.0, 0.0, 0.0));
    client.set_balance(EXCHANGE, "stellar", BalanceRecord::new(10.0, 10.0, 0.0, 0.0));
    client.set_balance(EXCHANGE, "bitcoin", BalanceRecord::new(1.0, 1.0, 0.0, 0.0));
}

fn test_config() -> Arc<Config> {
    let mut config = Config::default();
    // No easing, so the placed rates match the plan exactly and the drift
    // guard sees no difference.
    config.default_ease_percentage = 0.0;
    config.balance_poll_retries = 1;
    config.balance_poll_pause_secs = 0;
    config.multipath_tick_secs = 0;
    Arc::new(config)
}

fn test_context(
    client: Arc<MockExchange>,
    store: Arc<MemoryStore>,
) -> Arc<TradingContext> {
    let mut balances = BalanceCache::new();
    balances.commit(EXCHANGE, "bitcoin", BalanceRecord::new(1.0, 1.0, 0.0, 0.0));
    TradingContext::new(
        test_config(),
        client,
        store,
        balances,
        PauseTable::new(),
        MinimumTradeSizes::new(),
    )
}

#[tokio::test]
async fn a_clean_run_advances_four_legs_to_done() {
    let client = Arc::new(MockExchange::new());
    script_books(&client);
    script_balances(&client);
    let store = Arc::new(MemoryStore::new());
    let ctx = test_context(client.clone(), store.clone());

    let runner = PlanRunner::new(ctx, SchedulingWindow::open_for(Duration::from_secs(30)));
    runner.run(test_plan(MultipathStatus::Start)).await;

    // The status was persisted after every transition, in leg order, with
    // no later leg ever followed by an earlier one.
    let saved: Vec<String> = store
        .saved_plans()
        .iter()
        .map(|plan| plan.status.to_string())
        .collect();
    assert_eq!(
        saved,
        vec![
            "start",        // claimed
            "buy1place", "buy1placed", "balance1good",
            "sell2place", "sell2placed", "balance2good",
            "buy3place", "buy3placed", "balance3good",
            "sell4place", "sell4placed", "balance4good",
            "done",         // final transition
            "done",         // loop exit
            "done",         // executing flag cleared
        ]
    );

    // The executing flag was held throughout and released at the end.
    let flags: Vec<bool> = store.saved_plans().iter().map(|plan| plan.executing).collect();
    assert!(flags[..flags.len() - 1].iter().all(|&flag| flag));
    assert!(!flags[flags.len() - 1]);

    // Four orders went out, alternating buy and sell at the planned rates.
    let placements = client.placements();
    assert_eq!(placements.len(), 4);
    let sides: Vec<OrderSide> = placements.iter().map(|order| order.side).collect();
    assert_eq!(
        sides,
        vec![OrderSide::Buy, OrderSide::Sell, OrderSide::Buy, OrderSide::Sell]
    );
    assert_eq!(placements[0].coin, "ripple");
    assert_eq!(placements[0].market, "bitcoin");
    assert!((placements[0].rate - 0.001).abs() < 1e-12);
    assert_eq!(placements[3].coin, "stellar");
    assert_eq!(placements[3].market, "bitcoin");

    let stored = store.plan(1).unwrap();
    assert_eq!(stored.status, MultipathStatus::Done);
    assert!(!stored.executing);
    // Every leg remembers its order id.
    assert!(stored.legs.iter().all(|leg| !leg.order_id.is_empty()));
}

#[tokio::test]
async fn a_resumed_plan_starts_at_its_persisted_leg() {
    let client = Arc::new(MockExchange::new());
    script_books(&client);
    script_balances(&client);
    let store = Arc::new(MemoryStore::new());
    let ctx = test_context(client.clone(), store.clone());
    // The cache already carries the proceeds of leg 1, as the run that was
    // interrupted left them.
    ctx.balances
        .lock()
        .await
        .commit(EXCHANGE, "ripple", BalanceRecord::new(10.0, 10.0, 0.0, 0.0));

    let runner = PlanRunner::new(ctx, SchedulingWindow::open_for(Duration::from_secs(30)));
    runner
        .run(test_plan(MultipathStatus::Leg {
            leg: 2,
            phase: LegPhase::Place,
        }))
        .await;

    // The first order placed is leg 2's sale; leg 1 is not revisited.
    let placements = client.placements();
    assert_eq!(placements.len(), 3);
    assert_eq!(placements[0].side, OrderSide::Sell);
    assert_eq!(placements[0].market, "ethereum");
    assert_eq!(store.plan(1).unwrap().status, MultipathStatus::Done);
}

#[tokio::test]
async fn an_ambiguous_placement_is_verified_against_the_open_orders() {
    let client = Arc::new(MockExchange::new());
    script_books(&client);
    script_balances(&client);
    // Leg 1's placement comes back with no order id at all; the venue may
    // or may not have taken the order.
    client.queue_outcome(cross_arb_bot::exchange::OrderOutcome::failed("", ""));
    client.add_open_order(
        EXCHANGE,
        cross_arb_bot::exchange::OpenOrder {
            order_id: "located-1".to_string(),
            market: "bitcoin".to_string(),
            coin: "ripple".to_string(),
            side: OrderSide::Buy,
            quantity: 10.0,
            rate: 0.001,
            placed_epoch_secs: cross_arb_bot::utils::epoch_seconds(),
        },
    );
    let store = Arc::new(MemoryStore::new());
    let ctx = test_context(client.clone(), store.clone());

    let runner = PlanRunner::new(ctx, SchedulingWindow::open_for(Duration::from_secs(30)));
    runner.run(test_plan(MultipathStatus::Start)).await;

    // The uncertain state was entered, the real order id was recovered
    // from the venue's open orders, and the run still completed.
    let saved: Vec<String> = store
        .saved_plans()
        .iter()
        .map(|plan| plan.status.to_string())
        .collect();
    assert!(saved.contains(&"buy1uncertain".to_string()));
    let stored = store.plan(1).unwrap();
    assert_eq!(stored.status, MultipathStatus::Done);
    assert_eq!(stored.legs[0].order_id, "located-1");
}

#[tokio::test]
async fn a_balance_that_never_arrives_gives_the_plan_up() {
    let client = Arc::new(MockExchange::new());
    script_books(&client);
    // No venue balances at all: leg 1 places, but its proceeds never show.
    let store = Arc::new(MemoryStore::new());
    let ctx = test_context(client.clone(), store.clone());

    let runner = PlanRunner::new(ctx, SchedulingWindow::open_for(Duration::from_secs(30)));
    runner.run(test_plan(MultipathStatus::Start)).await;

    let stored = store.plan(1).unwrap();
    assert_eq!(stored.status, MultipathStatus::Unrecoverable);
    // Released even on the failure path, so a later pass could retry a
    // recoverable variant of this situation.
    assert!(!stored.executing);
    assert_eq!(client.placements().len(), 1);
}

#[tokio::test]
async fn a_failed_placement_check_pauses_the_touch_point() {
    let client = Arc::new(MockExchange::new());
    // Only leg 1's book is missing; the placement cannot even price itself.
    let store = Arc::new(MemoryStore::new());
    let ctx = test_context(client.clone(), store.clone());

    let runner = PlanRunner::new(
        ctx.clone(),
        SchedulingWindow::open_for(Duration::from_secs(30)),
    );
    runner.run(test_plan(MultipathStatus::Start)).await;

    let stored = store.plan(1).unwrap();
    assert_eq!(stored.status, MultipathStatus::Error);
    assert!(!stored.executing);
    assert!(ctx.pauses.is_paused(EXCHANGE, "bitcoin", "ripple"));
    assert_eq!(store.pause_entries().len(), 1);
    assert!(client.placements().is_empty());
}

#[tokio::test]
async fn the_scheduler_skips_executing_and_clashing_plans() {
    let client = Arc::new(MockExchange::new());
    // No books: any plan that runs fails fast into error, which is enough
    // to observe which plans were selected at all.
    let store = Arc::new(MemoryStore::new());

    let first = test_plan(MultipathStatus::Start);
    let mut clashing = test_plan(MultipathStatus::Start);
    clashing.id = 2;
    let mut owned = test_plan(MultipathStatus::Start);
    owned.id = 3;
    owned.exchange = "bittrex".to_string();
    owned.executing = true;
    let mut finished = test_plan(MultipathStatus::Done);
    finished.id = 4;
    store.seed_plan(first);
    store.seed_plan(clashing);
    store.seed_plan(owned);
    store.seed_plan(finished);

    let ctx = test_context(client.clone(), store.clone());
    let scheduler = MultipathScheduler::new(
        ctx,
        SchedulingWindow::open_for(Duration::from_millis(200)),
    );
    scheduler.run().await;

    // Only plan 1 ever ran: plan 2 trades the same books, plan 3 is owned
    // by another worker, plan 4 is terminal.
    let saved_ids: Vec<i64> = store.saved_plans().iter().map(|plan| plan.id).collect();
    assert!(!saved_ids.is_empty());
    assert!(saved_ids.iter().all(|&id| id == 1));
}
