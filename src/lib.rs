pub mod arbitrage;
pub mod balances;
pub mod books;
pub mod config;
pub mod error;
pub mod exchange;
pub mod feedback;
pub mod multipath;
pub mod orchestrator;
pub mod pause;
pub mod persistence;
pub mod testing; // Testing infrastructure
pub mod utils;

// Re-export the types an embedding scheduler wires together.
pub use config::Config;
pub use error::ArbError;
pub use orchestrator::{
    SchedulingWindow, TradingContext, TradingOrchestrator, TradingPair,
};
