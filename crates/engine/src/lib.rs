//! TradeDesk Engine — strategies, backtesting, and live execution
//!
//! Provides:
//! - Rolling-window indicator math and four rule-based strategies
//! - A deterministic day-by-day backtest simulator with metrics
//! - A live scheduler running one loop per enabled strategy
//! - A stop-loss/take-profit position monitor
//! - The Alpaca brokerage binding (REST + quote stream) behind the
//!   `Broker` trait

pub mod api;
pub mod backtest;
pub mod broker;
pub mod error;
pub mod indicators;
pub mod monitor;
pub mod scheduler;
pub mod sizing;
pub mod strategies;
pub mod types;

// Re-exports for convenience
pub use api::{AlpacaBroker, AlpacaCredentials};
pub use api::{run_quote_stream, QuoteStreamConfig, QuoteUpdate};
pub use backtest::{
    run_backtest, BacktestEngine, BacktestMetrics, BacktestOrder, BacktestReport, BacktestRequest,
    EquityPoint,
};
pub use broker::{
    Account, Broker, BrokerPosition, LastTrade, OrderConfirmation, OrderRequest, OrderSide,
    OrderType, Quote, TimeInForce,
};
pub use error::{EngineError, EngineResult};
pub use monitor::{MonitorStatus, MonitoredPosition, PositionMonitor};
pub use scheduler::{SchedulerStatus, StrategyScheduler, StrategyStatus};
pub use sizing::shares_for_allocation;
pub use strategies::{Strategy, StrategyKind, StrategyParams};
pub use types::{MarketData, PriceBar, Signal, SignalAction};
