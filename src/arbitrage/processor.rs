//! Arbitrage Trade Processor
//!
//! The core decision logic that turns two filtered order books and the
//! cached balances into a safe executable quantity. Separated from the
//! executor so it can be regression tested without placing real orders.

use crate::books::{is_dust_trade, minimum_trade_size, MinimumTradeSizes, OrderBookSide};
use crate::feedback::Feedback;
use crate::utils::{float2string, sanitize};

/// Margin in percents that must remain after both venues' ease corrections
/// for a spread to cover fees and transfer losses.
pub const FIXED_MARGIN_PCT: f64 = 0.55;

/// Fraction of an available balance the processor will commit. The few
/// percents of headroom avoid "Insufficient Funds" rejections at the venues.
pub const BALANCE_MARGIN: f64 = 0.95;

/// Safety factor over a venue's configured minimum trade size.
pub const MINIMUM_SIZE_MARGIN: f64 = 1.02;

/// The minimum spread in percents for arbitrage between two venues to be
/// worth executing. Both venues' easing percentages eat into the spread, so
/// they are part of the requirement.
pub fn required_margin_pct(ease_pct_1: f64, ease_pct_2: f64) -> f64 {
    ease_pct_1 + ease_pct_2 + FIXED_MARGIN_PCT
}

/// Everything one arbitrage evaluation feeds into the processor.
#[derive(Debug)]
pub struct ProcessorInputs<'a> {
    pub market: &'a str,
    pub coin: &'a str,
    pub asking_venue: &'a str,
    pub bidding_venue: &'a str,
    /// Best ask and its depth at the asking venue, after filtering.
    pub minimum_ask: f64,
    pub ask_quantity: f64,
    /// Best bid and its depth at the bidding venue, after filtering.
    pub maximum_bid: f64,
    pub bid_quantity: f64,
    /// Filtered seller book at the asking venue.
    pub sellers: &'a OrderBookSide,
    /// Filtered buyer book at the bidding venue.
    pub buyers: &'a OrderBookSide,
    /// Available base market coin at the asking venue, withdrawal corrected.
    pub asking_venue_balance: f64,
    /// Available coin at the bidding venue, withdrawal corrected.
    pub bidding_venue_balance: f64,
    pub asking_ease_pct: f64,
    pub bidding_ease_pct: f64,
    pub minimum_sizes: &'a MinimumTradeSizes,
}

/// The processor's verdict for one evaluation. A quantity of zero means:
/// do not trade. The two flags tell the executor which venue's balance
/// caused a rejection, so it can drop that venue alone instead of the pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeDecision {
    pub quantity: f64,
    /// Ask rate after depth and ease corrections; the buy order's limit.
    pub ask_rate: f64,
    /// Bid rate after depth and ease corrections; the sell order's limit.
    pub bid_rate: f64,
    pub market_balance_too_low: bool,
    pub coin_balance_too_low: bool,
}

pub fn arbitrage_processor(feedback: &mut Feedback, inputs: &ProcessorInputs) -> TradeDecision {
    let mut decision = TradeDecision::default();

    // Find the quantity available with both the bidder and the asker.
    let mut quantity = inputs.bid_quantity.min(inputs.ask_quantity);
    feedback.add(format!(
        "Available for trade is {} {} @ {}",
        float2string(quantity),
        inputs.coin,
        inputs.market
    ));

    // Fix the rates based on the quantity and the order books. Some
    // quantities cannot be traded at the best rate, so filling the full
    // quantity may make the rates less favourable.
    let mut maximum_bid = inputs.maximum_bid;
    if inputs.buyers.is_good() {
        let lookup = inputs.buyers.rate_for_quantity(quantity);
        quantity = quantity.min(lookup.available);
        if lookup.rate != maximum_bid {
            maximum_bid = lookup.rate;
            feedback.add(format!(
                "Due to a small order book, the bid price was reduced to {}",
                float2string(maximum_bid)
            ));
        }
    } else {
        feedback.add(format!(
            "The order book at exchange {} is too small, cancelling the trade",
            inputs.bidding_venue
        ));
        quantity = 0.0;
    }
    let mut minimum_ask = inputs.minimum_ask;
    if inputs.sellers.is_good() {
        let lookup = inputs.sellers.rate_for_quantity(quantity);
        quantity = quantity.min(lookup.available);
        if lookup.rate != minimum_ask {
            minimum_ask = lookup.rate;
            feedback.add(format!(
                "Due to a small order book, the ask price was increased to {}",
                float2string(minimum_ask)
            ));
        }
    } else {
        feedback.add(format!(
            "The order book at exchange {} is too small, cancelling the trade",
            inputs.asking_venue
        ));
        quantity = 0.0;
    }

    // Ease the rates toward immediate fulfilment: pay slightly more when
    // buying, ask slightly less when selling. Resting open orders otherwise
    // accumulate on the venues.
    minimum_ask += minimum_ask * inputs.asking_ease_pct / 100.0;
    maximum_bid -= maximum_bid * inputs.bidding_ease_pct / 100.0;
    feedback.add(format!(
        "Corrected rates: {} asks {} and {} bids {}",
        inputs.asking_venue,
        float2string(minimum_ask),
        inputs.bidding_venue,
        float2string(maximum_bid)
    ));

    // The rates were possibly updated, so check the trade is still
    // profitable at all, and profitable enough.
    if quantity > 0.0 {
        if maximum_bid <= minimum_ask {
            feedback.add("The updated bid no longer exceeds the ask, cancelling the trade".to_string());
            quantity = 0.0;
        } else {
            let percentage = sanitize(100.0 * maximum_bid / minimum_ask - 100.0);
            feedback.add(format!("Arbitrage difference is {} %", float2string(percentage)));
            if percentage
                < required_margin_pct(inputs.asking_ease_pct, inputs.bidding_ease_pct)
            {
                feedback.add(
                    "The updated arbitrage difference is too small, cancelling the trade"
                        .to_string(),
                );
                quantity = 0.0;
            }
        }
    }

    // Check that the base market coin balance at the asking venue, where the
    // bot buys, covers the purchase. The worst-case rate is the bid.
    if quantity > 0.0 {
        let affordable = sanitize(inputs.asking_venue_balance / maximum_bid) * BALANCE_MARGIN;
        if quantity > affordable {
            quantity = affordable;
            feedback.add(format!(
                "The wallet on {} has only {} {} available, the amount to buy was reduced to {}",
                inputs.asking_venue,
                float2string(inputs.asking_venue_balance),
                inputs.market,
                float2string(quantity)
            ));
        }
    }
    if quantity > 0.0
        && is_dust_trade(inputs.market, inputs.asking_venue_balance * BALANCE_MARGIN, 1.0)
    {
        feedback.add(format!(
            "Insufficient available {} so the trade of {} was cancelled",
            inputs.market, inputs.coin
        ));
        quantity = 0.0;
        decision.market_balance_too_low = true;
    }

    // Check that the coin balance at the bidding venue, where the bot sells,
    // covers the sale.
    if quantity > 0.0 && inputs.bidding_venue_balance < quantity {
        quantity = inputs.bidding_venue_balance * BALANCE_MARGIN;
        feedback.add(format!(
            "The exchange where to sell has only {} {} available, the amount to sell was reduced to {}",
            float2string(inputs.bidding_venue_balance),
            inputs.coin,
            float2string(quantity)
        ));
    }
    if quantity > 0.0 && is_dust_trade(inputs.market, quantity, minimum_ask) {
        feedback.add(format!(
            "Not enough available balance: trade of {} was cancelled",
            inputs.coin
        ));
        quantity = 0.0;
        decision.coin_balance_too_low = true;
    }

    // Honour the minimum trade sizes either venue sets, with a safety margin.
    for venue in [inputs.asking_venue, inputs.bidding_venue] {
        if quantity > 0.0 {
            let minimum =
                minimum_trade_size(inputs.minimum_sizes, venue, inputs.market, inputs.coin);
            if minimum > 0.0 && quantity < minimum * MINIMUM_SIZE_MARGIN {
                feedback.add(format!(
                    "Exchange {} has a minimum order size of {} {} @ {}, cancelling the trade",
                    venue,
                    float2string(minimum),
                    inputs.coin,
                    inputs.market
                ));
                quantity = 0.0;
            }
        }
    }

    decision.quantity = quantity;
    decision.ask_rate = minimum_ask;
    decision.bid_rate = maximum_bid;
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::books::OrderBookSide;
    use assert_approx_eq::assert_approx_eq;

    struct Scenario {
        sellers: OrderBookSide,
        buyers: OrderBookSide,
        asking_balance: f64,
        bidding_balance: f64,
        ease: f64,
        market: &'static str,
        minimum_sizes: MinimumTradeSizes,
    }

    impl Default for Scenario {
        fn default() -> Self {
            Self {
                sellers: OrderBookSide::from_levels(&[(100.0, 5.0)]),
                buyers: OrderBookSide::from_levels(&[(102.0, 3.0)]),
                asking_balance: 1000.0,
                bidding_balance: 1000.0,
                ease: 0.1,
                market: "bitcoin",
                minimum_sizes: MinimumTradeSizes::new(),
            }
        }
    }

    fn run(scenario: &Scenario) -> TradeDecision {
        let mut feedback = Feedback::new("test evaluation");
        let inputs = ProcessorInputs {
            market: scenario.market,
            coin: "ripple",
            asking_venue: "cryptopia",
            bidding_venue: "bittrex",
            minimum_ask: scenario.sellers.best_rate(),
            ask_quantity: scenario.sellers.best_quantity(),
            maximum_bid: scenario.buyers.best_rate(),
            bid_quantity: scenario.buyers.best_quantity(),
            sellers: &scenario.sellers,
            buyers: &scenario.buyers,
            asking_venue_balance: scenario.asking_balance,
            bidding_venue_balance: scenario.bidding_balance,
            asking_ease_pct: scenario.ease,
            bidding_ease_pct: scenario.ease,
            minimum_sizes: &scenario.minimum_sizes,
        };
        let decision = arbitrage_processor(&mut feedback, &inputs);
        feedback.clear();
        decision
    }

    #[test]
    fn bid_depth_bounds_the_quantity() {
        let decision = run(&Scenario::default());
        assert_approx_eq!(decision.quantity, 3.0);
        assert_approx_eq!(decision.ask_rate, 100.1);
        assert_approx_eq!(decision.bid_rate, 101.898);
        assert!(!decision.market_balance_too_low);
        assert!(!decision.coin_balance_too_low);
    }

    #[test]
    fn no_quantity_below_the_required_margin() {
        // A 0.5% spread does not clear ease + ease + fixed margin (0.75%).
        let scenario = Scenario {
            sellers: OrderBookSide::from_levels(&[(100.0, 5.0)]),
            buyers: OrderBookSide::from_levels(&[(100.5, 5.0)]),
            ..Scenario::default()
        };
        let decision = run(&scenario);
        assert_eq!(decision.quantity, 0.0);
    }

    #[test]
    fn no_quantity_when_the_eased_bid_drops_under_the_ask() {
        let scenario = Scenario {
            sellers: OrderBookSide::from_levels(&[(100.0, 5.0)]),
            buyers: OrderBookSide::from_levels(&[(100.05, 5.0)]),
            ease: 0.5,
            ..Scenario::default()
        };
        let decision = run(&scenario);
        assert_eq!(decision.quantity, 0.0);
    }

    #[test]
    fn empty_books_cancel_the_trade() {
        let scenario = Scenario {
            buyers: OrderBookSide::default(),
            ..Scenario::default()
        };
        assert_eq!(run(&scenario).quantity, 0.0);
        let scenario = Scenario {
            sellers: OrderBookSide::default(),
            ..Scenario::default()
        };
        assert_eq!(run(&scenario).quantity, 0.0);
    }

    #[test]
    fn tiny_market_balance_rejects_and_flags_the_asking_venue() {
        // On the litecoin market 0.005 * 0.95 notional is under the dust
        // limit, so the capped quantity is rejected outright.
        let scenario = Scenario {
            sellers: OrderBookSide::from_levels(&[(100.0, 5.0)]),
            buyers: OrderBookSide::from_levels(&[(102.0, 3.0)]),
            asking_balance: 0.005,
            ease: 0.0,
            market: "litecoin",
            ..Scenario::default()
        };
        let decision = run(&scenario);
        assert_eq!(decision.quantity, 0.0);
        assert!(decision.market_balance_too_low);
        assert!(!decision.coin_balance_too_low);
    }

    #[test]
    fn small_coin_balance_shrinks_without_flagging() {
        let scenario = Scenario {
            sellers: OrderBookSide::from_levels(&[(100.0, 5.0)]),
            buyers: OrderBookSide::from_levels(&[(102.0, 2.0)]),
            bidding_balance: 1.0,
            ..Scenario::default()
        };
        let decision = run(&scenario);
        assert_approx_eq!(decision.quantity, 0.95);
        assert!(!decision.coin_balance_too_low);
        assert!(!decision.market_balance_too_low);
    }

    #[test]
    fn quantities_never_land_inside_the_minimum_size_margin() {
        for minimum in [0.5, 1.0, 2.5, 2.95] {
            let mut minimum_sizes = MinimumTradeSizes::new();
            minimum_sizes.insert(
                (
                    "cryptopia".to_string(),
                    "bitcoin".to_string(),
                    "ripple".to_string(),
                ),
                minimum,
            );
            let scenario = Scenario {
                minimum_sizes,
                ..Scenario::default()
            };
            let decision = run(&scenario);
            assert!(
                decision.quantity == 0.0 || decision.quantity >= minimum * MINIMUM_SIZE_MARGIN,
                "quantity {} landed inside the margin for minimum {}",
                decision.quantity,
                minimum
            );
        }
    }

    #[test]
    fn quantity_is_monotone_in_depth_and_balances() {
        let baseline = run(&Scenario::default()).quantity;
        // Shallower bid depth can only shrink the result.
        let shallow_bid = run(&Scenario {
            buyers: OrderBookSide::from_levels(&[(102.0, 1.5)]),
            ..Scenario::default()
        })
        .quantity;
        assert!(shallow_bid <= baseline);
        // Shallower ask depth likewise.
        let shallow_ask = run(&Scenario {
            sellers: OrderBookSide::from_levels(&[(100.0, 2.0)]),
            ..Scenario::default()
        })
        .quantity;
        assert!(shallow_ask <= baseline);
        // A poorer asking balance likewise.
        let poor_asking = run(&Scenario {
            asking_balance: 150.0,
            ..Scenario::default()
        })
        .quantity;
        assert!(poor_asking <= baseline);
        // A poorer bidding balance likewise.
        let poor_bidding = run(&Scenario {
            bidding_balance: 2.0,
            ..Scenario::default()
        })
        .quantity;
        assert!(poor_bidding <= baseline);
    }

    #[test]
    fn price_impact_worsens_the_rates_across_levels() {
        // The caller reports 5 coins at the best ask, but filling 3 coins
        // actually needs the second level, so the buy limit is re-derived at
        // the worse rate.
        let sellers = OrderBookSide::from_levels(&[(100.0, 1.0), (100.5, 4.0)]);
        let buyers = OrderBookSide::from_levels(&[(103.0, 3.0)]);
        let minimum_sizes = MinimumTradeSizes::new();
        let mut feedback = Feedback::new("test evaluation");
        let inputs = ProcessorInputs {
            market: "bitcoin",
            coin: "ripple",
            asking_venue: "cryptopia",
            bidding_venue: "bittrex",
            minimum_ask: 100.0,
            ask_quantity: 5.0,
            maximum_bid: 103.0,
            bid_quantity: 3.0,
            sellers: &sellers,
            buyers: &buyers,
            asking_venue_balance: 1000.0,
            bidding_venue_balance: 1000.0,
            asking_ease_pct: 0.0,
            bidding_ease_pct: 0.0,
            minimum_sizes: &minimum_sizes,
        };
        let decision = arbitrage_processor(&mut feedback, &inputs);
        feedback.clear();
        assert_approx_eq!(decision.ask_rate, 100.5);
        assert_approx_eq!(decision.quantity, 3.0);
    }
}
