//! Core types shared across the trading engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Bar history per symbol, ascending by timestamp, immutable once fetched.
///
/// Anything that depends on symbol *order* (trading-day derivation,
/// buy-and-hold baseline) keys off the strategy's configured symbol list,
/// never off map iteration order.
pub type MarketData = HashMap<String, Vec<PriceBar>>;

/// Side of a proposed trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalAction::Buy => write!(f, "buy"),
            SignalAction::Sell => write!(f, "sell"),
        }
    }
}

/// A proposed trade with sizing and rationale.
///
/// Produced by a strategy or the position monitor, consumed exactly once by
/// the executing component (scheduler or backtest simulator). On a sell,
/// `quantity == 0.0` means "close the full position".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub action: SignalAction,
    pub quantity: f64,
    pub reason: String,
    /// Named numeric fields: entry_price, stop_loss, take_profit,
    /// indicator readouts at signal time, ...
    pub metadata: HashMap<String, f64>,
    pub generated_at: DateTime<Utc>,
}

impl Signal {
    pub fn buy(symbol: impl Into<String>, quantity: f64, reason: impl Into<String>) -> Self {
        Self::new(symbol, SignalAction::Buy, quantity, reason)
    }

    pub fn sell(symbol: impl Into<String>, quantity: f64, reason: impl Into<String>) -> Self {
        Self::new(symbol, SignalAction::Sell, quantity, reason)
    }

    fn new(
        symbol: impl Into<String>,
        action: SignalAction,
        quantity: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            action,
            quantity,
            reason: reason.into(),
            metadata: HashMap::new(),
            generated_at: Utc::now(),
        }
    }

    /// Attach a named numeric field to the signal's metadata
    pub fn with_meta(mut self, key: &str, value: f64) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn meta(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_builders() {
        let signal = Signal::buy("AAPL", 10.0, "test entry")
            .with_meta("entry_price", 150.0)
            .with_meta("stop_loss", 142.5);

        assert_eq!(signal.action, SignalAction::Buy);
        assert_eq!(signal.quantity, 10.0);
        assert_eq!(signal.meta("entry_price"), Some(150.0));
        assert_eq!(signal.meta("stop_loss"), Some(142.5));
        assert_eq!(signal.meta("take_profit"), None);
    }

    #[test]
    fn test_sell_all_convention() {
        let signal = Signal::sell("MSFT", 0.0, "close position");
        assert_eq!(signal.action, SignalAction::Sell);
        assert_eq!(signal.quantity, 0.0);
    }

    #[test]
    fn test_action_serde_roundtrip() {
        let json = serde_json::to_string(&SignalAction::Buy).unwrap();
        assert_eq!(json, "\"buy\"");
        let back: SignalAction = serde_json::from_str("\"sell\"").unwrap();
        assert_eq!(back, SignalAction::Sell);
    }
}
