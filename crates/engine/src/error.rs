//! Engine error taxonomy
//!
//! Failures are scoped deliberately: a `Validation` error is the caller's
//! fault and is surfaced immediately, while `DataUnavailable`,
//! `SizingUnavailable` and `ExecutionFailure` only ever cost the affected
//! symbol, signal or cycle. No error from one strategy's cycle may
//! terminate another strategy's loop or the position monitor.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad parameters, unknown strategy type, bad date range. No retry.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing bars or quotes. The affected symbol/cycle is skipped.
    #[error("market data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    /// Portfolio value missing or non-positive; the signal is dropped.
    #[error("position sizing unavailable: {0}")]
    SizingUnavailable(String),

    /// Allocation percentage outside (0, 100].
    #[error("allocation percentage must be in (0, 100], got {pct}")]
    InvalidAllocation { pct: f64 },

    /// Brokerage rejected an order. The ledger is left unchanged.
    #[error("order execution failed: {0}")]
    ExecutionFailure(String),

    /// Fatal to the specific operation only.
    #[error("not authenticated with the brokerage")]
    NotAuthenticated,
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn data_unavailable(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::DataUnavailable {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }
}
