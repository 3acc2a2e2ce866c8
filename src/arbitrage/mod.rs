//! Arbitrage Trading
//!
//! The decision function, the per-pair execution loop, and the follow-up
//! policy that classifies raw order outcomes.

pub mod executor;
pub mod followup;
pub mod processor;

pub use executor::ArbitragePairWorker;
pub use followup::{classify_outcome, follow_up_limit_trade, FollowUpAction};
pub use processor::{arbitrage_processor, required_margin_pct, ProcessorInputs, TradeDecision};
