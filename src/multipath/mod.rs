//! Multipath Trading
//!
//! A multipath is a planned sequence of up to four buy/sell legs on one
//! exchange, executed as a single logical trade: spend a base market coin,
//! hop through intermediate coins and markets, and end up back at the
//! opening market with a gain. Plans are persisted and advanced by a state
//! machine that survives process restarts.

pub mod scheduler;
pub mod state_machine;

use crate::books::{is_dust_trade, minimum_trade_size, MinimumTradeSizes, OrderBookSide};
use crate::error::ArbError;
use crate::exchange::{BookSide, ExchangeClient, OrderSide};
use crate::feedback::Feedback;
use crate::pause::PauseTable;
use crate::utils::{float2string, float2visual, sanitize};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use scheduler::MultipathScheduler;
pub use state_machine::PlanRunner;

pub const LEG_COUNT: u8 = 4;

/// Where within one leg the plan currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegPhase {
    /// The limit order for this leg is to be placed.
    Place,
    /// Placement ended ambiguously; the real order status must be verified.
    Uncertain,
    /// The order is known to the venue.
    Placed,
    /// The proceeds of this leg are being confirmed in the balance.
    BalanceGood,
}

/// The persisted status of a plan. Leg states are parametrized over the leg
/// index; odd legs buy, even legs sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum MultipathStatus {
    /// Freshly suggested, feasibility not yet investigated.
    Bare,
    /// Investigation projects a sufficient gain.
    Profitable,
    /// Cleared for execution. Also settable by hand to force a trade.
    Start,
    Leg { leg: u8, phase: LegPhase },
    Done,
    Error,
    Unprofitable,
    Unrecoverable,
}

impl MultipathStatus {
    /// Terminal states are kept for audit and never advanced again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MultipathStatus::Done
                | MultipathStatus::Error
                | MultipathStatus::Unprofitable
                | MultipathStatus::Unrecoverable
        )
    }

    /// The state following a confirmed balance: the next leg's placement,
    /// or done after the final leg.
    pub fn after_balance_good(leg: u8) -> MultipathStatus {
        if leg < LEG_COUNT {
            MultipathStatus::Leg {
                leg: leg + 1,
                phase: LegPhase::Place,
            }
        } else {
            MultipathStatus::Done
        }
    }
}

fn leg_op(leg: u8) -> &'static str {
    if leg % 2 == 1 {
        "buy"
    } else {
        "sell"
    }
}

impl fmt::Display for MultipathStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultipathStatus::Bare => write!(f, "bare"),
            MultipathStatus::Profitable => write!(f, "profitable"),
            MultipathStatus::Start => write!(f, "start"),
            MultipathStatus::Leg { leg, phase } => match phase {
                LegPhase::Place => write!(f, "{}{}place", leg_op(*leg), leg),
                LegPhase::Uncertain => write!(f, "{}{}uncertain", leg_op(*leg), leg),
                LegPhase::Placed => write!(f, "{}{}placed", leg_op(*leg), leg),
                LegPhase::BalanceGood => write!(f, "balance{}good", leg),
            },
            MultipathStatus::Done => write!(f, "done"),
            MultipathStatus::Error => write!(f, "error"),
            MultipathStatus::Unprofitable => write!(f, "unprofitable"),
            MultipathStatus::Unrecoverable => write!(f, "unrecoverable"),
        }
    }
}

impl FromStr for MultipathStatus {
    type Err = ArbError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "bare" => return Ok(MultipathStatus::Bare),
            "profitable" => return Ok(MultipathStatus::Profitable),
            "start" => return Ok(MultipathStatus::Start),
            "done" => return Ok(MultipathStatus::Done),
            "error" => return Ok(MultipathStatus::Error),
            "unprofitable" => return Ok(MultipathStatus::Unprofitable),
            "unrecoverable" => return Ok(MultipathStatus::Unrecoverable),
            _ => {}
        }
        let parse_leg = |digit: &str| -> Option<u8> {
            let leg = digit.parse::<u8>().ok()?;
            (1..=LEG_COUNT).contains(&leg).then_some(leg)
        };
        if let Some(rest) = text.strip_prefix("balance") {
            if let Some(digit) = rest.strip_suffix("good") {
                if let Some(leg) = parse_leg(digit) {
                    return Ok(MultipathStatus::Leg {
                        leg,
                        phase: LegPhase::BalanceGood,
                    });
                }
            }
        }
        for (op, odd) in [("buy", true), ("sell", false)] {
            let Some(rest) = text.strip_prefix(op) else {
                continue;
            };
            for (suffix, phase) in [
                ("place", LegPhase::Place),
                ("uncertain", LegPhase::Uncertain),
                ("placed", LegPhase::Placed),
            ] {
                // "placed" also ends in "place"; match the longer one first.
                let candidate = if suffix == "place" && rest.ends_with("placed") {
                    continue;
                } else {
                    rest.strip_suffix(suffix)
                };
                if let Some(digit) = candidate {
                    if let Some(leg) = parse_leg(digit) {
                        if (leg % 2 == 1) == odd {
                            return Ok(MultipathStatus::Leg { leg, phase });
                        }
                    }
                }
            }
        }
        Err(ArbError::ParseError(format!(
            "Unknown multipath status: {}",
            text
        )))
    }
}

impl From<MultipathStatus> for String {
    fn from(status: MultipathStatus) -> String {
        status.to_string()
    }
}

impl TryFrom<String> for MultipathStatus {
    type Error = ArbError;

    fn try_from(text: String) -> Result<Self, ArbError> {
        text.parse()
    }
}

/// One buy or sell step within a plan. Odd legs spend `market_quantity` of
/// the market coin to buy `coin_quantity` of the coin at `rate`; even legs
/// sell the coin back into the market.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultipathLeg {
    pub market: String,
    pub market_quantity: f64,
    pub rate: f64,
    pub coin: String,
    pub coin_quantity: f64,
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultipathPlan {
    pub id: i64,
    pub exchange: String,
    pub legs: [MultipathLeg; 4],
    /// Projected gain over the whole chain, in percents.
    pub gain: f64,
    pub status: MultipathStatus,
    /// Set while a worker owns the plan; cleared on every exit path.
    pub executing: bool,
}

impl MultipathPlan {
    pub fn leg(&self, leg: u8) -> &MultipathLeg {
        &self.legs[(leg - 1) as usize]
    }

    pub fn leg_mut(&mut self, leg: u8) -> &mut MultipathLeg {
        &mut self.legs[(leg - 1) as usize]
    }

    pub fn side_of_leg(leg: u8) -> OrderSide {
        if leg % 2 == 1 {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        }
    }

    /// The (exchange, market, coin) order books this plan trades against.
    pub fn touch_points(&self) -> Vec<(String, String, String)> {
        self.legs
            .iter()
            .map(|leg| {
                (
                    self.exchange.clone(),
                    leg.market.clone(),
                    leg.coin.clone(),
                )
            })
            .collect()
    }

    /// Legs where the coin differs from the market; the others degenerate
    /// to a no-op.
    pub fn trading_step_count(&self) -> usize {
        self.legs
            .iter()
            .filter(|leg| leg.coin != leg.market)
            .count()
    }

    /// Propagates the opening market quantity through all four legs at the
    /// stored rates and recomputes the gain. The venue's trade fee is
    /// applied twice per leg for robustness against fee surprises.
    pub fn recalculate(&mut self, trade_fee: f64) {
        let fee_factor = 1.0 - 2.0 * trade_fee;

        // Leg 1: buy the first coin at the first market.
        self.legs[0].coin_quantity =
            sanitize(self.legs[0].market_quantity / self.legs[0].rate) * fee_factor;
        // Leg 2: sell that coin at the second market.
        self.legs[1].coin_quantity = self.legs[0].coin_quantity;
        self.legs[1].market_quantity =
            sanitize(self.legs[1].rate * self.legs[1].coin_quantity) * fee_factor;
        // Leg 3: buy the third coin with the proceeds.
        self.legs[2].market_quantity = self.legs[1].market_quantity;
        self.legs[2].coin_quantity =
            sanitize(self.legs[2].market_quantity / self.legs[2].rate) * fee_factor;
        // Leg 4: sell it back on the opening market.
        self.legs[3].coin_quantity = self.legs[2].coin_quantity;
        self.legs[3].market_quantity =
            sanitize(self.legs[3].rate * self.legs[3].coin_quantity) * fee_factor;

        self.gain = sanitize(
            (self.legs[3].market_quantity - self.legs[0].market_quantity)
                / self.legs[0].market_quantity
                * 100.0,
        );
    }

    /// Scales the quantities from a leg onward after a balance arrived
    /// slightly short; the rest of the chain trades what is actually there.
    pub fn scale_from_leg(&mut self, leg: u8, factor: f64) {
        for index in leg..=LEG_COUNT {
            match index {
                1 => {
                    self.legs[0].coin_quantity *= factor;
                    self.legs[1].coin_quantity *= factor;
                }
                2 => {
                    self.legs[1].market_quantity *= factor;
                    self.legs[2].market_quantity *= factor;
                }
                3 => {
                    self.legs[2].coin_quantity *= factor;
                    self.legs[3].coin_quantity *= factor;
                }
                _ => {
                    self.legs[3].market_quantity *= factor;
                }
            }
        }
    }

    /// Writes a human-readable account of the path into the feedback block.
    pub fn describe(&self, feedback: &mut Feedback) {
        feedback.add(format!("Exchange {}", self.exchange));
        for (index, leg) in self.legs.iter().enumerate() {
            let action = if index % 2 == 0 { "Spend" } else { "Sell" };
            feedback.add(format!(
                "{} {} {} {} and {} {} {} at rate {}",
                index + 1,
                action,
                float2string(if index % 2 == 0 {
                    leg.market_quantity
                } else {
                    leg.coin_quantity
                }),
                if index % 2 == 0 { &leg.market } else { &leg.coin },
                if index % 2 == 0 { "buy" } else { "gain" },
                float2string(if index % 2 == 0 {
                    leg.coin_quantity
                } else {
                    leg.market_quantity
                }),
                if index % 2 == 0 { &leg.coin } else { &leg.market },
                float2string(leg.rate)
            ));
        }
        feedback.add(format!("Gain {} %", float2visual(self.gain)));
    }
}

/// True if the plan trades an order book another selected plan already
/// claimed. One plan's fill changes the book the other depends on. The
/// claimed set is extended with this plan's unclaimed touch-points either
/// way, so a running plan keeps blocking later ones.
pub fn plans_clash(plan: &MultipathPlan, claimed: &mut Vec<(String, String, String)>) -> bool {
    let mut clash = false;
    for point in plan.touch_points() {
        if claimed.contains(&point) {
            clash = true;
        } else {
            claimed.push(point);
        }
    }
    clash
}

/// Whether any of the plan's touch-points is currently paused.
pub fn plan_is_paused(plan: &MultipathPlan, pauses: &PauseTable) -> bool {
    for (exchange, market, coin) in plan.touch_points() {
        if pauses.is_paused(&exchange, &market, &coin) {
            log::info!(
                "Exchange {} paused multipath trading {} @ {}",
                exchange,
                coin,
                market
            );
            return true;
        }
    }
    false
}

/// The gain in percents a path must project to be worth executing; more
/// trading steps require more gain.
pub fn minimum_required_gain(step_count: usize, gain_per_step_pct: f64) -> f64 {
    step_count as f64 * gain_per_step_pct
}

const OPENING_QUANTITY: f64 = 0.00001;
const OPENING_GROWTH: f64 = 1.05;
const CORRECTION_GROWTH: f64 = 1.1;
const MAX_OPENING_ITERATIONS: u32 = 1000;
const MAX_REFINE_ITERATIONS: u32 = 50;

/// Fetches the order books a plan trades against and refines its quantities
/// and rates against them, deciding profitable or unprofitable. Errors when
/// any needed book cannot be obtained.
pub async fn investigate_plan(
    feedback: &mut Feedback,
    client: &dyn ExchangeClient,
    minimum_sizes: &MinimumTradeSizes,
    trade_fee: f64,
    gain_per_step_pct: f64,
    plan: &mut MultipathPlan,
) -> Result<(), ArbError> {
    // Fetch the relevant books in parallel for more current prices. Buy
    // legs look at the sellers, sell legs at the buyers. Legs whose coin is
    // the market have no book.
    let books = {
        let fetch = |leg_index: u8| {
            let leg = plan.leg(leg_index);
            let needed = leg.coin != leg.market;
            let side = match MultipathPlan::side_of_leg(leg_index) {
                OrderSide::Buy => BookSide::Asks,
                OrderSide::Sell => BookSide::Bids,
            };
            let market = leg.market.clone();
            let coin = leg.coin.clone();
            let exchange = plan.exchange.clone();
            async move {
                if !needed {
                    return Ok(None);
                }
                client
                    .get_order_book(&exchange, &market, &coin, side)
                    .await
                    .map(Some)
            }
        };
        let (book1, book2, book3, book4) = tokio::join!(fetch(1), fetch(2), fetch(3), fetch(4));
        let mut books: [Option<OrderBookSide>; 4] = Default::default();
        for (index, book) in [book1, book2, book3, book4].into_iter().enumerate() {
            match book {
                Ok(book) => {
                    if let Some(ref side) = book {
                        if !side.is_good() {
                            return Err(ArbError::ExchangeError(format!(
                                "Empty order book for leg {}",
                                index + 1
                            )));
                        }
                    }
                    books[index] = book;
                }
                Err(err) => return Err(err),
            }
        }
        books
    };
    refine_plan(feedback, minimum_sizes, trade_fee, gain_per_step_pct, plan, &books);
    Ok(())
}

/// The core feasibility computation: grow the opening quantity past the
/// dust and minimum-size thresholds, then iterate rate corrections against
/// the order books until the path stabilizes, and judge its gain.
pub fn refine_plan(
    feedback: &mut Feedback,
    minimum_sizes: &MinimumTradeSizes,
    trade_fee: f64,
    gain_per_step_pct: f64,
    plan: &mut MultipathPlan,
    books: &[Option<OrderBookSide>; 4],
) {
    // Start from a very low opening amount and grow it until the first leg
    // is no longer dust. Opening large causes needless price impact down
    // the chain; opening too small triggers the venues' size limits.
    plan.legs[0].market_quantity = OPENING_QUANTITY;
    plan.recalculate(trade_fee);
    let mut iterations = 0;
    while is_dust_trade(&plan.legs[0].market, plan.legs[0].coin_quantity, plan.legs[0].rate)
        && iterations < MAX_OPENING_ITERATIONS
    {
        iterations += 1;
        plan.legs[0].market_quantity *= OPENING_GROWTH;
        plan.recalculate(trade_fee);
    }

    let step_count = plan.trading_step_count();
    let mut okay = true;
    let mut refinements = 0;
    loop {
        refinements += 1;
        let mut updated = false;
        let mut grow = false;
        plan.recalculate(trade_fee);

        for leg_index in 1..=LEG_COUNT {
            let side = MultipathPlan::side_of_leg(leg_index);
            let leg = plan.leg(leg_index);
            if leg.coin == leg.market {
                feedback.add(format!(
                    "Skip trading {} at the {} market",
                    leg.coin, leg.market
                ));
                continue;
            }

            // One correction per cycle: later checks run against the
            // recalculated quantities of the next cycle.
            if !updated
                && is_dust_trade(&leg.market, leg.coin_quantity, leg.rate)
            {
                feedback.add(format!(
                    "Trading {} {} @ {} at rate {} is considered dust trade",
                    float2string(leg.coin_quantity),
                    leg.coin,
                    leg.market,
                    float2string(leg.rate)
                ));
                grow = true;
                updated = true;
            }

            if !updated {
                let minimum =
                    minimum_trade_size(minimum_sizes, &plan.exchange, &leg.market, &leg.coin);
                if minimum > 0.0 && leg.coin_quantity < minimum {
                    feedback.add(format!(
                        "Trading {} {} @ {} @ {} is considered too low a trade",
                        float2string(leg.coin_quantity),
                        leg.coin,
                        leg.market,
                        plan.exchange
                    ));
                    grow = true;
                    updated = true;
                }
            }

            if !updated {
                let Some(book) = &books[(leg_index - 1) as usize] else {
                    continue;
                };
                // The full quantity must be tradeable with levels to spare;
                // otherwise the rate walks deeper into the book, and only
                // toward a less favourable value. An ask may only rise, a
                // bid only fall, so thin books never inflate the gain.
                if book.fills_with_spare_levels(leg.coin_quantity, 1) {
                    let lookup = book.rate_for_quantity(leg.coin_quantity);
                    let improves = match side {
                        OrderSide::Buy => lookup.rate > leg.rate,
                        OrderSide::Sell => lookup.rate < leg.rate,
                    };
                    if improves {
                        feedback.add(format!(
                            "Trading {} @ {} rate updated from {} to {} change {} %",
                            leg.coin,
                            leg.market,
                            float2string(leg.rate),
                            float2string(lookup.rate),
                            float2visual((lookup.rate - leg.rate) / leg.rate * 100.0)
                        ));
                        plan.leg_mut(leg_index).rate = lookup.rate;
                        updated = true;
                    }
                } else {
                    okay = false;
                }
            }
        }

        if grow {
            plan.legs[0].market_quantity *= CORRECTION_GROWTH;
            feedback.add(format!(
                "Increasing the initial market quantity to {} {}",
                float2string(plan.legs[0].market_quantity),
                plan.legs[0].market
            ));
        }
        plan.recalculate(trade_fee);

        if !updated {
            break;
        }
        if refinements >= MAX_REFINE_ITERATIONS {
            okay = false;
            break;
        }
        if plan.gain < 0.0 {
            break;
        }
    }

    if !okay {
        plan.gain = 0.0;
    }
    plan.status = if plan.gain >= minimum_required_gain(step_count, gain_per_step_pct) {
        MultipathStatus::Profitable
    } else {
        MultipathStatus::Unprofitable
    };
}
