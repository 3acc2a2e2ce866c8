//! Order Book Normalization
//!
//! Pure adjustment algorithms shared by the arbitrage and multipath traders:
//! dust filtering, venue minimum-size filtering, the goodness gate, and the
//! rate-for-quantity walk that models realistic execution cost. Books are
//! never mutated in place; filters return fresh sides and are idempotent.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Minimum trade sizes per (exchange, market, coin). A value of 0 means the
/// venue sets no limit.
pub type MinimumTradeSizes = HashMap<(String, String, String), f64>;

/// Looks up a venue's minimum trade size; absent entries mean unconstrained.
pub fn minimum_trade_size(
    sizes: &MinimumTradeSizes,
    exchange: &str,
    market: &str,
    coin: &str,
) -> f64 {
    sizes
        .get(&(exchange.to_string(), market.to_string(), coin.to_string()))
        .copied()
        .unwrap_or(0.0)
}

// Notional limits below which a trade is not worth executing at a market.
// The values take the highest limits observed over the supported venues,
// which also steers the traders toward larger, more gainful orders.
static DUST_LIMITS: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("bitcoin", 0.001),
        ("litecoin", 0.01),
        ("ethereum", 0.0005),
        ("dogecoin", 100.0),
        ("usdtether", 1.0),
        ("usdollar", 0.1),
    ])
});

const DEFAULT_DUST_LIMIT: f64 = 0.001;

/// The dust threshold for a market's base coin.
pub fn dust_limit(market: &str) -> f64 {
    DUST_LIMITS.get(market).copied().unwrap_or(DEFAULT_DUST_LIMIT)
}

/// Returns true if trading $quantity at $rate would be considered dust trade.
pub fn is_dust_trade(market: &str, quantity: f64, rate: f64) -> bool {
    quantity * rate < dust_limit(market)
}

/// One standing offer in an order book side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub rate: f64,
    pub quantity: f64,
}

/// The rate needed to fill a target quantity, and how much of it the book
/// could actually supply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDepth {
    pub rate: f64,
    pub available: f64,
}

/// A ranked sequence of offers, best rate first. Rebuilt fresh on every
/// fetch; the filters below produce new sides rather than editing this one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSide {
    pub offers: Vec<Offer>,
}

impl OrderBookSide {
    pub fn new(offers: Vec<Offer>) -> Self {
        Self { offers }
    }

    pub fn from_levels(levels: &[(f64, f64)]) -> Self {
        Self {
            offers: levels
                .iter()
                .map(|&(rate, quantity)| Offer { rate, quantity })
                .collect(),
        }
    }

    /// A book is good when at least one offer survived filtering. API errors
    /// and empty markets both surface here as a not-good book.
    pub fn is_good(&self) -> bool {
        !self.offers.is_empty()
    }

    /// Whether the book carries at least $levels distinct price levels. The
    /// multipath feasibility investigation demands deeper books than a plain
    /// goodness check.
    pub fn has_depth(&self, levels: usize) -> bool {
        self.offers.len() >= levels
    }

    /// The best rate, or 0 for an empty book.
    pub fn best_rate(&self) -> f64 {
        self.offers.first().map(|offer| offer.rate).unwrap_or(0.0)
    }

    /// The quantity on offer at the best level, or 0 for an empty book.
    pub fn best_quantity(&self) -> f64 {
        self.offers.first().map(|offer| offer.quantity).unwrap_or(0.0)
    }

    /// Merges leading dust offers into the next level until the front of the
    /// book is worth trading. A final lone dust level is dropped outright.
    pub fn without_dust(&self, market: &str) -> OrderBookSide {
        let mut offers = self.offers.clone();
        while let Some(front) = offers.first() {
            if !is_dust_trade(market, front.quantity, front.rate) {
                break;
            }
            let merged = offers.remove(0);
            match offers.first_mut() {
                Some(next) => next.quantity += merged.quantity,
                None => break,
            }
        }
        OrderBookSide { offers }
    }

    /// Merges leading offers below the venue's minimum trade size into the
    /// next level, in the same manner as the dust filter. A minimum of 0
    /// leaves the book untouched.
    pub fn without_undersized(&self, minimum_size: f64) -> OrderBookSide {
        if minimum_size <= 0.0 {
            return self.clone();
        }
        let mut offers = self.offers.clone();
        while let Some(front) = offers.first() {
            if front.quantity >= minimum_size {
                break;
            }
            let merged = offers.remove(0);
            match offers.first_mut() {
                Some(next) => next.quantity += merged.quantity,
                None => break,
            }
        }
        OrderBookSide { offers }
    }

    /// The number of levels needed to fill a target quantity, or `None`
    /// when the book cannot supply it.
    pub fn levels_needed(&self, target: f64) -> Option<usize> {
        let mut cumulative = 0.0;
        for (index, offer) in self.offers.iter().enumerate() {
            cumulative += offer.quantity;
            if cumulative >= target {
                return Some(index + 1);
            }
        }
        None
    }

    /// Whether the book fills the target and still keeps spare levels below
    /// it. The feasibility investigation demands this floor so a plan does
    /// not hinge on the very last offer in a thin book.
    pub fn fills_with_spare_levels(&self, target: f64, spare: usize) -> bool {
        match self.levels_needed(target) {
            Some(needed) => self.offers.len() - needed >= spare,
            None => false,
        }
    }

    /// Walks the book from the best level, accumulating quantity until the
    /// target is met. Returns the worst rate needed to fill it, which is the
    /// realistic execution rate for that quantity. If the book runs out, the
    /// returned depth is what was actually available.
    pub fn rate_for_quantity(&self, target: f64) -> RateDepth {
        let mut cumulative = 0.0;
        let mut worst_rate = 0.0;
        for offer in &self.offers {
            cumulative += offer.quantity;
            worst_rate = offer.rate;
            if cumulative >= target {
                return RateDepth {
                    rate: worst_rate,
                    available: target,
                };
            }
        }
        RateDepth {
            rate: worst_rate,
            available: cumulative,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn dust_limits_per_market() {
        assert_eq!(dust_limit("bitcoin"), 0.001);
        assert_eq!(dust_limit("dogecoin"), 100.0);
        assert_eq!(dust_limit("somethingelse"), 0.001);
        assert!(is_dust_trade("bitcoin", 0.001, 0.5));
        assert!(!is_dust_trade("bitcoin", 1.0, 0.5));
    }

    #[test]
    fn dust_filter_merges_leading_levels() {
        // First two levels are dust on the bitcoin market; their quantity
        // folds into the first real level.
        let side = OrderBookSide::from_levels(&[(0.01, 0.05), (0.0099, 0.04), (0.0098, 2.0)]);
        let filtered = side.without_dust("bitcoin");
        assert_eq!(filtered.offers.len(), 1);
        assert_eq!(filtered.best_rate(), 0.0098);
        assert!((filtered.best_quantity() - 2.09).abs() < 1e-12);
        // The input side is untouched.
        assert_eq!(side.offers.len(), 3);
    }

    #[test]
    fn dust_filter_drops_a_lone_dust_level() {
        let side = OrderBookSide::from_levels(&[(0.01, 0.05)]);
        let filtered = side.without_dust("bitcoin");
        assert!(!filtered.is_good());
    }

    #[test]
    fn filtering_is_idempotent() {
        let side = OrderBookSide::from_levels(&[
            (0.010, 0.05),
            (0.009, 0.3),
            (0.008, 5.0),
            (0.007, 9.0),
        ]);
        let once = side.without_dust("bitcoin").without_undersized(0.5);
        let twice = once.without_dust("bitcoin").without_undersized(0.5);
        assert_eq!(once, twice);
    }

    #[test]
    fn undersized_filter_respects_unconstrained_venues() {
        let side = OrderBookSide::from_levels(&[(100.0, 0.1), (99.0, 4.0)]);
        assert_eq!(side.without_undersized(0.0), side);
        let filtered = side.without_undersized(1.0);
        assert_eq!(filtered.offers.len(), 1);
        assert!((filtered.best_quantity() - 4.1).abs() < 1e-12);
    }

    #[test]
    fn rate_for_quantity_walks_the_book() {
        let side = OrderBookSide::from_levels(&[(100.0, 1.0), (101.0, 2.0), (103.0, 10.0)]);
        // Fully served by the best level.
        assert_eq!(
            side.rate_for_quantity(0.5),
            RateDepth { rate: 100.0, available: 0.5 }
        );
        // Needs the second level, so the worst rate applies.
        assert_eq!(
            side.rate_for_quantity(2.0),
            RateDepth { rate: 101.0, available: 2.0 }
        );
        // Exhausts the book.
        let exhausted = side.rate_for_quantity(50.0);
        assert_eq!(exhausted.rate, 103.0);
        assert!((exhausted.available - 13.0).abs() < 1e-12);
    }

    #[test]
    fn rate_for_quantity_never_beats_the_best_level() {
        let side = OrderBookSide::from_levels(&[(100.0, 1.0), (101.0, 2.0)]);
        for target in [0.1, 1.0, 1.5, 3.0, 100.0] {
            assert!(side.rate_for_quantity(target).rate >= 100.0);
        }
        // An empty book never supplies a positive quantity.
        let empty = OrderBookSide::default();
        let lookup = empty.rate_for_quantity(1.0);
        assert_eq!(lookup.available, 0.0);
        assert_eq!(lookup.rate, 0.0);
    }

    #[test]
    fn spare_level_floor() {
        let side = OrderBookSide::from_levels(&[(100.0, 1.0), (101.0, 2.0), (103.0, 10.0)]);
        assert_eq!(side.levels_needed(2.5), Some(2));
        assert_eq!(side.levels_needed(50.0), None);
        assert!(side.fills_with_spare_levels(2.5, 1));
        assert!(!side.fills_with_spare_levels(4.0, 1));
        assert!(!side.fills_with_spare_levels(50.0, 0));
    }

    #[test]
    fn minimum_trade_size_lookup() {
        let mut sizes = MinimumTradeSizes::new();
        sizes.insert(
            ("kraken".to_string(), "bitcoin".to_string(), "monero".to_string()),
            0.06,
        );
        assert_eq!(minimum_trade_size(&sizes, "kraken", "bitcoin", "monero"), 0.06);
        assert_eq!(minimum_trade_size(&sizes, "kraken", "bitcoin", "ripple"), 0.0);
    }
}
