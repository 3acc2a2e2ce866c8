//! Arbitrage Pair Worker
//!
//! Runs the per-pair trading loop for the rest of the scheduling window:
//! fetch both venues' books in parallel, pick the venue combination whose
//! bid clears the other's ask, decide and tentatively debit under the shared
//! balance lock, then place both limit orders simultaneously and follow them
//! up. Venues leave the working set when a placement happened or their
//! balance rejected the trade; the loop ends when fewer than two remain.

use crate::arbitrage::followup::follow_up_limit_trade;
use crate::arbitrage::processor::{arbitrage_processor, required_margin_pct, ProcessorInputs};
use crate::books::{minimum_trade_size, OrderBookSide};
use crate::exchange::{BookSide, OrderSide};
use crate::feedback::Feedback;
use crate::orchestrator::{SchedulingWindow, TradingContext, TradingPair};
use crate::persistence::TradeRecord;
use crate::utils::{epoch_seconds, float2string, float2visual, sanitize};
use log::warn;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The venue combination selected for one iteration.
#[derive(Debug, Clone)]
struct Opportunity {
    bidding_venue: String,
    asking_venue: String,
    maximum_bid: f64,
    bid_quantity: f64,
    minimum_ask: f64,
    ask_quantity: f64,
    buyers: OrderBookSide,
    sellers: OrderBookSide,
}

pub struct ArbitragePairWorker {
    ctx: Arc<TradingContext>,
    window: SchedulingWindow,
    pair: TradingPair,
}

impl ArbitragePairWorker {
    pub fn new(ctx: Arc<TradingContext>, window: SchedulingWindow, pair: TradingPair) -> Self {
        Self { ctx, window, pair }
    }

    pub async fn run(&self) {
        let market = self.pair.market.as_str();
        let coin = self.pair.coin.as_str();
        // A coin cannot be arbitraged against its own market.
        if market == coin {
            return;
        }
        let mut venues: Vec<String> =
            vec![self.pair.exchange1.clone(), self.pair.exchange2.clone()];
        let mut iteration = 0u32;

        loop {
            // Trading removes venues; arbitrage needs two of them.
            if venues.len() < 2 {
                return;
            }
            iteration += 1;
            // Wait between iterations so the venues can update their books
            // and fill the previous orders. Not on the first pass: a fresh
            // window should start trading immediately.
            if iteration > 1 {
                tokio::time::sleep(Duration::from_secs(self.ctx.config.arbitrage_pause_secs))
                    .await;
            }
            if !self.window.still_open() {
                return;
            }

            let mut feedback = Feedback::new(format!(
                "Arbitrage {} @ {} @ {} and {}",
                coin, market, venues[0], venues[1]
            ));

            // Timestamp the fetch: prices must be recent for arbitrage, and
            // the books arrive over connections with differing timeouts.
            let fetch_start = Instant::now();
            let exchange1 = venues[0].clone();
            let exchange2 = venues[1].clone();
            let (bids1, asks1, bids2, asks2) = tokio::join!(
                self.ctx
                    .client
                    .get_order_book(&exchange1, market, coin, BookSide::Bids),
                self.ctx
                    .client
                    .get_order_book(&exchange1, market, coin, BookSide::Asks),
                self.ctx
                    .client
                    .get_order_book(&exchange2, market, coin, BookSide::Bids),
                self.ctx
                    .client
                    .get_order_book(&exchange2, market, coin, BookSide::Asks),
            );

            let mut filtered = Vec::new();
            for (venue, bids, asks) in [
                (&exchange1, bids1, asks1),
                (&exchange2, bids2, asks2),
            ] {
                let minimum = minimum_trade_size(&self.ctx.minimum_sizes, venue, market, coin);
                let buyers = match bids {
                    Ok(book) => book.without_dust(market).without_undersized(minimum),
                    Err(err) => {
                        feedback.add(format!("Cannot get the buyers at {}: {}", venue, err));
                        OrderBookSide::default()
                    }
                };
                let sellers = match asks {
                    Ok(book) => book.without_dust(market).without_undersized(minimum),
                    Err(err) => {
                        feedback.add(format!("Cannot get the sellers at {}: {}", venue, err));
                        OrderBookSide::default()
                    }
                };
                filtered.push((venue.clone(), buyers, sellers));
            }

            // Evaluate the bid/ask venue combinations and take the one whose
            // bid exceeds the ask, preferring the widest spread. Same-venue
            // combinations never cross, so only the two mixed ones remain.
            let mut opportunity: Option<(f64, Opportunity)> = None;
            for (bid_side, ask_side) in [(0usize, 1usize), (1, 0)] {
                let (bid_venue, buyers, _) = &filtered[bid_side];
                let (ask_venue, _, sellers) = &filtered[ask_side];
                if !buyers.is_good() || !sellers.is_good() {
                    continue;
                }
                let bid = buyers.best_rate();
                let ask = sellers.best_rate();
                if ask <= 0.0 || bid <= ask {
                    continue;
                }
                let percentage = sanitize(100.0 * bid / ask - 100.0);
                if percentage <= 0.0 {
                    continue;
                }
                let candidate = Opportunity {
                    bidding_venue: bid_venue.clone(),
                    asking_venue: ask_venue.clone(),
                    maximum_bid: bid,
                    bid_quantity: buyers.best_quantity(),
                    minimum_ask: ask,
                    ask_quantity: sellers.best_quantity(),
                    buyers: buyers.clone(),
                    sellers: sellers.clone(),
                };
                match &opportunity {
                    Some((best_pct, _)) if *best_pct >= percentage => {}
                    _ => opportunity = Some((percentage, candidate)),
                }
            }

            let Some((percentage, opportunity)) = opportunity else {
                // Nothing favourable; keep the logbook quiet.
                feedback.clear();
                continue;
            };

            feedback.add(format!(
                "{} bids {} for {} {} @ {}",
                opportunity.bidding_venue,
                float2string(opportunity.maximum_bid),
                float2string(opportunity.bid_quantity),
                coin,
                market
            ));
            feedback.add(format!(
                "{} asks {} for {} {} @ {}",
                opportunity.asking_venue,
                float2string(opportunity.minimum_ask),
                float2string(opportunity.ask_quantity),
                coin,
                market
            ));
            feedback.add(format!("Difference: {} %", float2visual(percentage)));

            let required = required_margin_pct(
                self.ctx.config.ease_percentage(&opportunity.asking_venue),
                self.ctx.config.ease_percentage(&opportunity.bidding_venue),
            );
            if percentage < required {
                feedback.clear();
                continue;
            }

            // A stale book invalidates the opportunity: what looked like a
            // spread may be long gone.
            if fetch_start.elapsed()
                > Duration::from_secs(self.ctx.config.order_book_timeout_secs)
            {
                feedback.add("The order books were not obtained in time".to_string());
                continue;
            }

            // Weekday gating exists but is disabled pending a product
            // decision: every day trades.
            let _ = self.pair.days;
            let days_good = true;

            // Critical section: read balances, decide, and tentatively debit
            // so parallel traders sharing a wallet cannot over-commit the
            // same funds. No network call while the lock is held.
            let decision = {
                let mut balances = self.ctx.balances.lock().await;
                let asking_balance = balances.read(&opportunity.asking_venue, market).available;
                let bidding_balance = balances.read(&opportunity.bidding_venue, coin).available;
                let inputs = ProcessorInputs {
                    market,
                    coin,
                    asking_venue: &opportunity.asking_venue,
                    bidding_venue: &opportunity.bidding_venue,
                    minimum_ask: opportunity.minimum_ask,
                    ask_quantity: opportunity.ask_quantity,
                    maximum_bid: opportunity.maximum_bid,
                    bid_quantity: opportunity.bid_quantity,
                    sellers: &opportunity.sellers,
                    buyers: &opportunity.buyers,
                    asking_venue_balance: asking_balance,
                    bidding_venue_balance: bidding_balance,
                    asking_ease_pct: self.ctx.config.ease_percentage(&opportunity.asking_venue),
                    bidding_ease_pct: self
                        .ctx
                        .config
                        .ease_percentage(&opportunity.bidding_venue),
                    minimum_sizes: &self.ctx.minimum_sizes,
                };
                let decision = arbitrage_processor(&mut feedback, &inputs);
                if decision.quantity > 0.0 && days_good {
                    // Debit the payment for the buy and the coins for the
                    // sale. The proceeds are not credited yet: the limit
                    // orders may rest a while before filling, and even a
                    // reported failure can turn out to have placed an order.
                    let spent = decision.quantity * decision.ask_rate;
                    let mut record = balances.read(&opportunity.asking_venue, market);
                    record.total -= spent;
                    record.available -= spent;
                    balances.commit(&opportunity.asking_venue, market, record);
                    let mut record = balances.read(&opportunity.bidding_venue, coin);
                    record.total -= decision.quantity;
                    record.available -= decision.quantity;
                    balances.commit(&opportunity.bidding_venue, coin, record);
                }
                decision
            };

            if decision.quantity > 0.0 && days_good {
                let buy_fee = self.ctx.config.trade_fee(&opportunity.asking_venue);
                let sell_fee = self.ctx.config.trade_fee(&opportunity.bidding_venue);
                let spent = decision.quantity * decision.ask_rate * (1.0 + buy_fee);
                let earned = decision.quantity * decision.bid_rate * (1.0 - sell_fee);
                let projected_gain = earned - spent;
                feedback.add(format!(
                    "Will buy {} {} @ {} on {} at rate {} and sell it on {} at rate {} gain {} {}",
                    float2string(decision.quantity),
                    coin,
                    market,
                    opportunity.asking_venue,
                    float2string(decision.ask_rate),
                    opportunity.bidding_venue,
                    float2string(decision.bid_rate),
                    float2string(projected_gain),
                    market
                ));

                // Place the two limit orders simultaneously rather than in
                // sequence; prices change in the seconds a sequential second
                // order would have to wait.
                let (buy_outcome, sell_outcome) = tokio::join!(
                    self.ctx.client.place_limit_order(
                        &opportunity.asking_venue,
                        market,
                        coin,
                        decision.quantity,
                        decision.ask_rate,
                        OrderSide::Buy,
                    ),
                    self.ctx.client.place_limit_order(
                        &opportunity.bidding_venue,
                        market,
                        coin,
                        decision.quantity,
                        decision.bid_rate,
                        OrderSide::Sell,
                    ),
                );

                // Record the trade for profitability reporting.
                let record = TradeRecord {
                    market: market.to_string(),
                    coin: coin.to_string(),
                    asking_venue: opportunity.asking_venue.clone(),
                    bidding_venue: opportunity.bidding_venue.clone(),
                    quantity: decision.quantity,
                    projected_gain,
                    recorded_epoch_secs: epoch_seconds(),
                };
                if let Err(err) = self.ctx.store.record_trade(&record).await {
                    warn!("Failed to record trade: {}", err);
                }
                // Both venues now hold coins bought at this rate; remember
                // it so later sales are not misjudged as gains.
                for venue in [&opportunity.asking_venue, &opportunity.bidding_venue] {
                    if let Err(err) = self
                        .ctx
                        .store
                        .record_price_bought(venue, market, coin, decision.ask_rate)
                        .await
                    {
                        warn!("Failed to record bought price: {}", err);
                    }
                }

                // Follow up both legs concurrently; each narrates into its
                // own block which is folded back into the iteration's one.
                let mut buy_feedback = Feedback::new(String::new());
                let mut sell_feedback = Feedback::new(String::new());
                let (buy_followed, sell_followed) = tokio::join!(
                    follow_up_limit_trade(
                        &mut buy_feedback,
                        &self.ctx.pauses,
                        self.ctx.store.as_ref(),
                        &opportunity.asking_venue,
                        market,
                        coin,
                        OrderSide::Buy,
                        decision.quantity,
                        decision.ask_rate,
                        &buy_outcome,
                    ),
                    follow_up_limit_trade(
                        &mut sell_feedback,
                        &self.ctx.pauses,
                        self.ctx.store.as_ref(),
                        &opportunity.bidding_venue,
                        market,
                        coin,
                        OrderSide::Sell,
                        decision.quantity,
                        decision.bid_rate,
                        &sell_outcome,
                    ),
                );
                feedback.merge(buy_feedback);
                feedback.merge(sell_feedback);
                for followed in [buy_followed, sell_followed] {
                    if let Err(err) = followed {
                        warn!("Failed to persist pause entry: {}", err);
                    }
                }

                // Orders were placed; within this window the same pair must
                // not be retried, so both venues leave the working set.
                feedback.add(format!("Currently trading exchanges {:?}", venues));
                venues.retain(|venue| {
                    venue != &opportunity.asking_venue && venue != &opportunity.bidding_venue
                });
                feedback.add(format!("Trading exchanges after removing {:?}", venues));
            }

            // A balance rejection drops the affected venue alone; perhaps a
            // deal is still possible among the remaining ones next iteration.
            if decision.market_balance_too_low {
                venues.retain(|venue| venue != &opportunity.asking_venue);
                feedback.add(format!(
                    "Removing exchange due to too low a balance: {} @ {} @ {}",
                    coin, market, opportunity.asking_venue
                ));
            }
            if decision.coin_balance_too_low {
                venues.retain(|venue| venue != &opportunity.bidding_venue);
                feedback.add(format!(
                    "Removing exchange due to too low a balance: {} @ {} @ {}",
                    coin, market, opportunity.bidding_venue
                ));
            }
        }
    }
}
