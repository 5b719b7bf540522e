//! Trading module - matching engine, fill arithmetic, ledger persistence

pub mod engine;
pub mod fill;
pub mod ledger;

pub use engine::{EngineError, MatchingEngine, NewOrder, PlacedOrder};
pub use ledger::Ledger;
