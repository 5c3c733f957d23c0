//! Repositories over the SQLite pool

pub mod backtests;
pub mod strategies;

pub use backtests::{BacktestRecord, BacktestRepository};
pub use strategies::{StrategyRecord, StrategyRepository};
