//! Testing Infrastructure
//!
//! Scripted doubles for the two external collaborators: a mock exchange
//! with configurable books, balances, outcomes and latency, and an
//! in-memory store that records every persistence call for assertions.

mod memory_store;
mod mock_exchange;

pub use memory_store::MemoryStore;
pub use mock_exchange::{MockExchange, MockExchangeConfig, PlacedOrder};
