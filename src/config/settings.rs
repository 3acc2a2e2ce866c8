use std::collections::HashMap;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// Length of one scheduling window in seconds.
    pub window_secs: u64,
    /// Pause between arbitrage iterations on one pair.
    pub arbitrage_pause_secs: u64,
    /// Pause between multipath scheduler ticks.
    pub multipath_tick_secs: u64,
    /// Order books older than this are unsafe to trade on.
    pub order_book_timeout_secs: u64,
    /// How many multipath plans may run concurrently per tick.
    pub max_concurrent_multipaths: usize,
    /// How often a leg's balance is polled before the plan is given up.
    pub balance_poll_retries: u32,
    /// Pause between balance polls.
    pub balance_poll_pause_secs: u64,
    /// Per-venue trade order ease percentages, e.g. "kraken:0.2,bittrex:0.1".
    pub venue_ease_percentages: Option<HashMap<String, f64>>,
    pub default_ease_percentage: f64,
    /// Per-venue trade fees as fractions, e.g. "kraken:0.0026,bittrex:0.0025".
    pub venue_trade_fees: Option<HashMap<String, f64>>,
    pub default_trade_fee: f64,
    /// Gain in percents a multipath must project per trading step.
    pub min_gain_per_step_pct: f64,
}

fn parse_venue_map(raw: String) -> HashMap<String, f64> {
    raw.split(',')
        .filter_map(|part| {
            let mut kv = part.split(':');
            let key = kv.next()?.trim().to_string();
            let value = kv.next()?.trim().parse::<f64>().ok()?;
            Some((key, value))
        })
        .collect()
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Config {
            window_secs: env::var("WINDOW_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            arbitrage_pause_secs: env::var("ARBITRAGE_PAUSE_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            multipath_tick_secs: env::var("MULTIPATH_TICK_SECS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .unwrap_or(1),
            order_book_timeout_secs: env::var("ORDER_BOOK_TIMEOUT_SECS")
                .unwrap_or_else(|_| "7".to_string())
                .parse()
                .unwrap_or(7),
            max_concurrent_multipaths: env::var("MAX_CONCURRENT_MULTIPATHS")
                .unwrap_or_else(|_| "6".to_string())
                .parse()
                .unwrap_or(6),
            balance_poll_retries: env::var("BALANCE_POLL_RETRIES")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            balance_poll_pause_secs: env::var("BALANCE_POLL_PAUSE_SECS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .unwrap_or(2),
            venue_ease_percentages: env::var("VENUE_EASE_PERCENTAGES").ok().map(parse_venue_map),
            default_ease_percentage: env::var("DEFAULT_EASE_PERCENTAGE")
                .unwrap_or_else(|_| "0.1".to_string())
                .parse()
                .unwrap_or(0.1),
            venue_trade_fees: env::var("VENUE_TRADE_FEES").ok().map(parse_venue_map),
            default_trade_fee: env::var("DEFAULT_TRADE_FEE")
                .unwrap_or_else(|_| "0.0025".to_string())
                .parse()
                .unwrap_or(0.0025),
            min_gain_per_step_pct: env::var("MIN_GAIN_PER_STEP_PCT")
                .unwrap_or_else(|_| "0.75".to_string())
                .parse()
                .unwrap_or(0.75),
        }
    }

    /// The margin a venue's limit orders are eased by to favour immediate fills.
    pub fn ease_percentage(&self, venue: &str) -> f64 {
        self.venue_ease_percentages
            .as_ref()
            .and_then(|map| map.get(venue).copied())
            .unwrap_or(self.default_ease_percentage)
    }

    /// The fraction a venue charges per executed trade.
    pub fn trade_fee(&self, venue: &str) -> f64 {
        self.venue_trade_fees
            .as_ref()
            .and_then(|map| map.get(venue).copied())
            .unwrap_or(self.default_trade_fee)
    }

    pub fn validate_and_log(&self) {
        log::info!("Application Configuration Loaded: {:?}", self);
        if self.window_secs == 0 {
            log::error!("WINDOW_SECS cannot be zero.");
        }
        if self.order_book_timeout_secs >= self.window_secs {
            log::warn!("Order book timeout is longer than the scheduling window.");
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            window_secs: 60,
            arbitrage_pause_secs: 5,
            multipath_tick_secs: 1,
            order_book_timeout_secs: 7,
            max_concurrent_multipaths: 6,
            balance_poll_retries: 5,
            balance_poll_pause_secs: 2,
            venue_ease_percentages: None,
            default_ease_percentage: 0.1,
            venue_trade_fees: None,
            default_trade_fee: 0.0025,
            min_gain_per_step_pct: 0.75,
        }
    }
}
