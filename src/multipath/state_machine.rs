//! Multipath State Machine
//!
//! Advances one persisted plan through its leg states. The executing flag
//! is set before any work and cleared on every exit path, so a plan left
//! mid-flight by a crashed or delayed worker is picked up again by a later
//! scheduler pass. The status is persisted after every transition, not only
//! at the end; progress survives interruption.

use crate::arbitrage::followup::follow_up_limit_trade;
use crate::books::{is_dust_trade, minimum_trade_size};
use crate::exchange::{BookSide, OrderSide};
use crate::feedback::Feedback;
use crate::multipath::{investigate_plan, LegPhase, MultipathPlan, MultipathStatus};
use crate::orchestrator::{SchedulingWindow, TradingContext};
use crate::utils::{epoch_seconds, float2string, float2visual, sanitize};
use log::warn;
use std::sync::Arc;
use std::time::Duration;

/// Margin over a venue's minimum order size for multipath legs. Smaller
/// than the arbitrage margin: the feasibility investigation already sized
/// the legs, and a larger margin kept cancelling sound orders.
const LEG_MINIMUM_SIZE_MARGIN: f64 = 1.005;

/// Rate drift in percents beyond which a leg's economics are re-judged
/// against the plan's projected gain.
const RATE_DRIFT_TOLERANCE_PCT: f64 = 0.1;

/// Cushion in percents the projected gain must keep over a drifted rate.
const RATE_DRIFT_CUSHION_PCT: f64 = 2.0;

/// Open-order matching bounds when locating an uncertain order id.
const LOCATE_RATE_MARGIN: f64 = 0.02;
const LOCATE_MAX_AGE_HOURS: i64 = 5;

pub struct PlanRunner {
    ctx: Arc<TradingContext>,
    window: SchedulingWindow,
}

impl PlanRunner {
    pub fn new(ctx: Arc<TradingContext>, window: SchedulingWindow) -> Self {
        Self { ctx, window }
    }

    /// Works the plan until it reaches a terminal state or the window
    /// closes. The plan comes in with `executing == false`; the scheduler
    /// guarantees no other worker owns it.
    pub async fn run(&self, mut plan: MultipathPlan) {
        let mut feedback = Feedback::new(format!(
            "Executing multipath {} {} > {} > {} > {} > {}",
            plan.exchange,
            plan.legs[0].market,
            plan.legs[1].coin,
            plan.legs[2].market,
            plan.legs[3].coin,
            plan.legs[3].market
        ));
        // Keep the operator in the loop while this trade type matures.
        feedback.escalate();

        // Claim the plan before any work. A delayed previous worker and a
        // fresh one advancing the same path led to steps executed twice.
        plan.executing = true;
        self.persist(&plan).await;

        let mut balance_timer = 0u32;
        let mut keep_going = true;

        loop {
            feedback.add(format!("Status {}", plan.status));

            match plan.status {
                MultipathStatus::Bare => {
                    plan.describe(&mut feedback);
                    let fee = self.ctx.config.trade_fee(&plan.exchange);
                    let investigated = investigate_plan(
                        &mut feedback,
                        self.ctx.client.as_ref(),
                        &self.ctx.minimum_sizes,
                        fee,
                        self.ctx.config.min_gain_per_step_pct,
                        &mut plan,
                    )
                    .await;
                    match investigated {
                        Ok(()) => plan.describe(&mut feedback),
                        Err(err) => {
                            feedback.add(format!("Error investigating the path: {}", err));
                            plan.status = MultipathStatus::Unrecoverable;
                        }
                    }
                }

                MultipathStatus::Profitable => {
                    feedback.add(format!(
                        "This path is profitable as its calculated gain is {} %",
                        float2visual(plan.gain)
                    ));
                    plan.status = MultipathStatus::Start;
                }

                MultipathStatus::Start => {
                    plan.status = MultipathStatus::Leg {
                        leg: 1,
                        phase: LegPhase::Place,
                    };
                }

                MultipathStatus::Leg { leg, phase } => match phase {
                    LegPhase::Place => {
                        // Sets the status itself, depending on how the
                        // placement gets on.
                        self.place_limit_order(&mut feedback, &mut plan, leg).await;
                    }
                    LegPhase::Uncertain => {
                        self.verify_limit_order(&mut feedback, &mut plan, leg).await;
                        plan.status = MultipathStatus::Leg {
                            leg,
                            phase: LegPhase::Placed,
                        };
                    }
                    LegPhase::Placed => {
                        balance_timer = 0;
                        plan.status = MultipathStatus::Leg {
                            leg,
                            phase: LegPhase::BalanceGood,
                        };
                    }
                    LegPhase::BalanceGood => {
                        // Decides the next status, or retries on the timer.
                        self.verify_balance(&mut feedback, &mut plan, leg, &mut balance_timer)
                            .await;
                    }
                },

                MultipathStatus::Done | MultipathStatus::Error => {
                    keep_going = false;
                }

                MultipathStatus::Unprofitable | MultipathStatus::Unrecoverable => {
                    // Expected outcomes, no alert needed.
                    feedback.deescalate();
                    keep_going = false;
                }
            }

            // Persist the status after every transition so progress
            // survives a crash between legs.
            self.persist(&plan).await;

            if !keep_going || !self.window.still_open() {
                break;
            }
        }

        // Release the plan on every exit path, terminal or not; the next
        // scheduler pass may pick it up again.
        plan.executing = false;
        self.persist(&plan).await;
    }

    async fn persist(&self, plan: &MultipathPlan) {
        if let Err(err) = self.ctx.store.save_multipath_plan(plan).await {
            warn!("Failed to persist multipath plan {}: {}", plan.id, err);
        }
    }

    /// Places the limit order for one leg: re-check the book, ease the
    /// rate, verify balances and sizes under the shared lock, debit, place,
    /// and follow the outcome up. Failed checks pause the touch-point and
    /// end the plan in `error`.
    async fn place_limit_order(&self, feedback: &mut Feedback, plan: &mut MultipathPlan, leg: u8) {
        let exchange = plan.exchange.clone();
        let market = plan.leg(leg).market.clone();
        let coin = plan.leg(leg).coin.clone();
        let coin_quantity = plan.leg(leg).coin_quantity;
        let expected_rate = plan.leg(leg).rate;

        // A leg whose coin is the market trades nothing; if the balance was
        // good for the market it is good for the coin.
        if coin == market {
            plan.status = MultipathStatus::Leg {
                leg,
                phase: LegPhase::BalanceGood,
            };
            return;
        }

        let side = MultipathPlan::side_of_leg(leg);
        feedback.add(format!(
            "Step {} {} {} {} @ {} at rate {}",
            leg,
            side,
            float2string(coin_quantity),
            coin,
            exchange,
            float2string(expected_rate)
        ));

        let mut pause_minutes: i64 = 0;
        let mut checks_good = true;

        // Buy legs look at the sellers of the coin, sell legs at the buyers.
        let book_side = match side {
            OrderSide::Buy => BookSide::Asks,
            OrderSide::Sell => BookSide::Bids,
        };
        let book = match self
            .ctx
            .client
            .get_order_book(&exchange, &market, &coin, book_side)
            .await
        {
            Ok(book) if book.is_good() => book,
            Ok(_) | Err(_) => {
                feedback.add(format!(
                    "Cannot get the {} of {}: Cancel",
                    match side {
                        OrderSide::Buy => "sellers",
                        OrderSide::Sell => "buyers",
                    },
                    coin
                ));
                plan.status = MultipathStatus::Error;
                self.pause_and_record(feedback, &exchange, &market, &coin, 5).await;
                return;
            }
        };

        // Filling the full quantity may need deeper levels and a less
        // favourable rate.
        let lookup = book.rate_for_quantity(coin_quantity);
        if lookup.available < coin_quantity {
            feedback.add(
                "The order book at the exchange is too small for this quantity: Cancel"
                    .to_string(),
            );
            plan.status = MultipathStatus::Error;
            self.pause_and_record(feedback, &exchange, &market, &coin, 60).await;
            return;
        }
        let mut current_rate = lookup.rate;
        feedback.add(format!(
            "The rate of {} is {} @ {}",
            coin,
            float2string(current_rate),
            market
        ));

        // Ease toward immediate fulfilment, like every limit order here.
        let ease = self.ctx.config.ease_percentage(&exchange);
        match side {
            OrderSide::Buy => current_rate += current_rate * ease / 100.0,
            OrderSide::Sell => current_rate -= current_rate * ease / 100.0,
        }

        // The balance checks and the debit form one critical section with
        // the other traders.
        {
            let mut balances = self.ctx.balances.lock().await;

            let market_quantity = coin_quantity * current_rate;
            match side {
                OrderSide::Buy => {
                    let market_balance = balances.read(&exchange, &market).available;
                    if market_balance < market_quantity {
                        feedback.add(format!(
                            "Required market quantity is {} {} available is {}: Too low: Cancel",
                            float2string(market_quantity),
                            market,
                            float2string(market_balance)
                        ));
                        checks_good = false;
                        pause_minutes = 120;
                        plan.status = MultipathStatus::Error;
                    }
                }
                OrderSide::Sell => {
                    let coin_balance = balances.read(&exchange, &coin).available;
                    if coin_balance < coin_quantity {
                        feedback.add(format!(
                            "Required coin quantity is {} {} available is {}: Too low: Cancel",
                            float2string(coin_quantity),
                            coin,
                            float2string(coin_balance)
                        ));
                        checks_good = false;
                        pause_minutes = 5;
                        plan.status = MultipathStatus::Error;
                    }
                }
            }

            // The plan was calculated against an older book. A drifted rate
            // is acceptable while the projected gain still absorbs it.
            if checks_good {
                let drift = sanitize((current_rate - expected_rate).abs() / expected_rate * 100.0);
                if drift > RATE_DRIFT_TOLERANCE_PCT && drift + RATE_DRIFT_CUSHION_PCT > plan.gain {
                    feedback.add(format!(
                        "The expected rate is {} and the current rate is {}, difference {} % against a gain of {} %: Cancel",
                        float2string(expected_rate),
                        float2string(current_rate),
                        float2visual(drift),
                        float2visual(plan.gain)
                    ));
                    checks_good = false;
                    pause_minutes = 5;
                    plan.status = MultipathStatus::Error;
                }
            }

            if checks_good {
                let dust = match side {
                    OrderSide::Buy => is_dust_trade(&market, market_quantity * 0.999, 1.0),
                    OrderSide::Sell => is_dust_trade(&market, coin_quantity, current_rate),
                };
                if dust {
                    feedback.add("This quantity leads to dust trade: Cancel".to_string());
                    checks_good = false;
                    pause_minutes = 15;
                    plan.status = MultipathStatus::Error;
                }
            }

            if checks_good {
                let minimum =
                    minimum_trade_size(&self.ctx.minimum_sizes, &exchange, &market, &coin);
                if minimum > 0.0 && coin_quantity < minimum * LEG_MINIMUM_SIZE_MARGIN {
                    feedback.add(format!(
                        "Exchange {} has a minimum order size of {} {} @ {}: Cancel",
                        exchange,
                        float2string(minimum),
                        coin,
                        market
                    ));
                    checks_good = false;
                    pause_minutes = 15;
                    plan.status = MultipathStatus::Error;
                }
            }

            // Debit before the order goes out, so parallel traders cannot
            // spend the same funds.
            if checks_good {
                match side {
                    OrderSide::Buy => {
                        let mut record = balances.read(&exchange, &market);
                        record.available -= market_quantity;
                        balances.commit(&exchange, &market, record);
                    }
                    OrderSide::Sell => {
                        let mut record = balances.read(&exchange, &coin);
                        record.available -= coin_quantity;
                        balances.commit(&exchange, &coin, record);
                    }
                }
            }
        }

        if !checks_good {
            self.pause_and_record(feedback, &exchange, &market, &coin, pause_minutes)
                .await;
            return;
        }

        let outcome = self
            .ctx
            .client
            .place_limit_order(&exchange, &market, &coin, coin_quantity, current_rate, side)
            .await;
        feedback.add(format!("Order placed with ID {}", outcome.order_id));

        // The follow-up applies the pause policy for whatever came back.
        let mut follow_feedback = Feedback::new(String::new());
        let followed = follow_up_limit_trade(
            &mut follow_feedback,
            &self.ctx.pauses,
            self.ctx.store.as_ref(),
            &exchange,
            &market,
            &coin,
            side,
            coin_quantity,
            current_rate,
            &outcome,
        )
        .await;
        feedback.merge(follow_feedback);
        if let Err(err) = followed {
            warn!("Failed to persist pause entry: {}", err);
        }

        // A good order id means the order is known to the venue. Without
        // one the order may or may not exist; that has to be verified.
        plan.status = if outcome.order_id.is_empty() {
            MultipathStatus::Leg {
                leg,
                phase: LegPhase::Uncertain,
            }
        } else {
            MultipathStatus::Leg {
                leg,
                phase: LegPhase::Placed,
            }
        };
        plan.leg_mut(leg).order_id = outcome.order_id;
    }

    /// Resolves an uncertain order id by scanning the venue's open orders
    /// for a recent order on the same market and coin at nearly the same
    /// rate. A fulfilled order will not be found here and the id stays
    /// empty; the balance verification settles it either way.
    async fn verify_limit_order(&self, feedback: &mut Feedback, plan: &mut MultipathPlan, leg: u8) {
        let exchange = plan.exchange.clone();
        let market = plan.leg(leg).market.clone();
        let coin = plan.leg(leg).coin.clone();
        let rate = plan.leg(leg).rate;

        if coin == market {
            // No limit order was placed for this leg.
            return;
        }

        feedback.add(format!(
            "Step {} {} {} @ {} at rate {} locating order ID",
            leg,
            MultipathPlan::side_of_leg(leg),
            coin,
            exchange,
            float2string(rate)
        ));

        let open_orders = match self.ctx.client.get_open_orders(&exchange).await {
            Ok(orders) => orders,
            Err(err) => {
                feedback.add(format!("Cannot get the open orders: {}", err));
                return;
            }
        };

        for order in open_orders {
            if order.market != market || order.coin != coin {
                continue;
            }
            // Only consider recent orders, to prevent a mixup with older
            // similar-looking ones.
            let age_hours = (epoch_seconds() - order.placed_epoch_secs) / 3600;
            if age_hours > LOCATE_MAX_AGE_HOURS {
                feedback.add(format!(
                    "Skipping order ID {} since it is {} hours old",
                    order.order_id, age_hours
                ));
                continue;
            }
            // The quantity is not compared: some venues report only the
            // remaining quantity. The rate is, with a slight margin.
            if rate > order.rate * (1.0 + LOCATE_RATE_MARGIN)
                || rate < order.rate * (1.0 - LOCATE_RATE_MARGIN)
            {
                continue;
            }
            feedback.add(format!("Order ID {} has been located", order.order_id));
            plan.leg_mut(leg).order_id = order.order_id;
            return;
        }
    }

    /// Polls for the proceeds of a placed leg. Buying leg awaits the coin,
    /// selling leg the market coin. The better of the cached and the fresh
    /// venue balance decides; a shortfall within 5% scales the rest of the
    /// chain, anything worse retries on a bounded timer before giving the
    /// plan up as unrecoverable.
    async fn verify_balance(
        &self,
        feedback: &mut Feedback,
        plan: &mut MultipathPlan,
        leg: u8,
        timer: &mut u32,
    ) {
        let exchange = plan.exchange.clone();
        let coin_quantity = plan.leg(leg).coin_quantity;
        let market_quantity = plan.leg(leg).market_quantity;
        let side = MultipathPlan::side_of_leg(leg);

        let (unit, quantity) = match side {
            OrderSide::Buy => (plan.leg(leg).coin.clone(), coin_quantity),
            OrderSide::Sell => (plan.leg(leg).market.clone(), market_quantity),
        };
        feedback.add(format!(
            "Step {} verify balance: looking for {} {} at {}",
            leg,
            float2string(quantity),
            unit,
            exchange
        ));

        // What the bot believes it has.
        let bot_available = {
            let mut balances = self.ctx.balances.lock().await;
            balances.read(&exchange, &unit).available
        };
        let bot_factor = sanitize(bot_available / quantity);
        feedback.add(format!(
            "Available balance at the bot is {} %",
            float2visual(100.0 * bot_factor)
        ));

        // What the venue says it has right now.
        let exchange_available = match self.ctx.client.get_balance(&exchange, &unit).await {
            Ok(record) => record.spendable(),
            Err(err) => {
                feedback.add(format!("Cannot get the balance at the exchange: {}", err));
                0.0
            }
        };
        let exchange_factor = sanitize(exchange_available / quantity);
        feedback.add(format!(
            "Available balance at the exchange is {} %",
            float2visual(100.0 * exchange_factor)
        ));

        let factor = bot_factor.max(exchange_factor);

        // Store the winning view so the next leg reads it right back.
        {
            let mut balances = self.ctx.balances.lock().await;
            let mut record = balances.read(&exchange, &unit);
            record.available = factor * quantity;
            record.total = record.total.max(record.available);
            balances.commit(&exchange, &unit, record);
        }

        if factor >= 1.0 {
            plan.status = MultipathStatus::after_balance_good(leg);
        } else if factor >= 0.95 {
            // Nearly all of it arrived; trade what is actually there.
            plan.scale_from_leg(leg, factor);
            plan.status = MultipathStatus::after_balance_good(leg);
        } else {
            *timer += 1;
            if *timer > self.ctx.config.balance_poll_retries {
                // The proceeds never arrived in time. Give the path up so
                // this does not repeat all day.
                feedback.add("The balance did not become available: giving up".to_string());
                plan.status = MultipathStatus::Unrecoverable;
            } else {
                tokio::time::sleep(Duration::from_secs(
                    self.ctx.config.balance_poll_pause_secs,
                ))
                .await;
                // The status stays put, so this step retries.
            }
        }
    }

    /// Pauses the touch-point and persists the entry, narrating both.
    async fn pause_and_record(
        &self,
        feedback: &mut Feedback,
        exchange: &str,
        market: &str,
        coin: &str,
        minutes: i64,
    ) {
        if minutes <= 0 {
            return;
        }
        let entry = self
            .ctx
            .pauses
            .pause_for_minutes(exchange, market, coin, minutes, "multipath");
        let key = (exchange.to_string(), market.to_string(), coin.to_string());
        if let Err(err) = self.ctx.store.store_pause_entry(&key, &entry).await {
            warn!("Failed to persist pause entry: {}", err);
        }
        feedback.add(format!(
            "Trading {} @ {} @ {} was disabled for {} minutes",
            coin, market, exchange, minutes
        ));
    }
}
