//! Stop-loss / take-profit position monitoring
//!
//! Keeps a registry of broker-confirmed open positions with exit
//! thresholds. Each `check()` fetches a current price per monitored symbol
//! and emits a sell-all exit signal on a breach. The entry is removed from
//! the registry in the same locked step that decides the breach, so a
//! breach produces at most one exit signal even under concurrent ticks.
//! Price lookups happen outside the lock; a symbol with no retrievable
//! price is skipped for the tick.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::stream::QuoteUpdate;
use crate::broker::Broker;
use crate::error::{EngineError, EngineResult};
use crate::types::Signal;

/// A position watched for stop-loss / take-profit breaches
#[derive(Debug, Clone, Serialize)]
pub struct MonitoredPosition {
    pub symbol: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub entry_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub monitored_count: usize,
    pub symbols: Vec<String>,
}

enum ExitReason {
    StopLoss(f64),
    TakeProfit(f64),
}

/// Registry of monitored positions plus the price sources to check them with
pub struct PositionMonitor {
    broker: Arc<dyn Broker>,
    positions: RwLock<HashMap<String, MonitoredPosition>>,
    /// Latest prices pushed by the quote stream; takes precedence over polling
    pushed_prices: RwLock<HashMap<String, f64>>,
}

impl PositionMonitor {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            positions: RwLock::new(HashMap::new()),
            pushed_prices: RwLock::new(HashMap::new()),
        }
    }

    /// Register a position. Requires a known entry price and at least one
    /// exit threshold; at most one position is monitored per symbol, and a
    /// re-add replaces the previous entry.
    pub fn add_position(
        &self,
        symbol: &str,
        quantity: f64,
        entry_price: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> EngineResult<()> {
        if entry_price <= 0.0 {
            return Err(EngineError::validation(format!(
                "entry price must be positive, got {entry_price}"
            )));
        }
        if stop_loss.is_none() && take_profit.is_none() {
            return Err(EngineError::validation(
                "at least one of stop_loss/take_profit is required".to_string(),
            ));
        }

        info!(
            symbol,
            entry_price,
            stop_loss = stop_loss.unwrap_or(f64::NAN),
            take_profit = take_profit.unwrap_or(f64::NAN),
            "Monitoring position"
        );
        self.positions.write().unwrap().insert(
            symbol.to_string(),
            MonitoredPosition {
                symbol: symbol.to_string(),
                quantity,
                entry_price,
                stop_loss,
                take_profit,
                entry_time: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn remove_position(&self, symbol: &str) {
        if self.positions.write().unwrap().remove(symbol).is_some() {
            debug!(symbol, "Stopped monitoring");
        }
    }

    /// Partial sells shrink the monitored quantity; zero removes the entry
    pub fn update_quantity(&self, symbol: &str, new_quantity: f64) {
        if new_quantity <= 0.0 {
            self.remove_position(symbol);
            return;
        }
        if let Some(position) = self.positions.write().unwrap().get_mut(symbol) {
            position.quantity = new_quantity;
        }
    }

    pub fn monitored_positions(&self) -> Vec<MonitoredPosition> {
        self.positions.read().unwrap().values().cloned().collect()
    }

    pub fn status(&self) -> MonitorStatus {
        let positions = self.positions.read().unwrap();
        MonitorStatus {
            monitored_count: positions.len(),
            symbols: positions.keys().cloned().collect(),
        }
    }

    /// One tick: fetch a price per monitored symbol and emit exit signals
    /// for breaches. Symbols without a retrievable price are skipped.
    pub async fn check(&self) -> Vec<Signal> {
        let symbols: Vec<String> = {
            let positions = self.positions.read().unwrap();
            positions.keys().cloned().collect()
        };
        if symbols.is_empty() {
            return Vec::new();
        }

        let mut signals = Vec::new();
        for symbol in symbols {
            let Some(current_price) = self.current_price(&symbol).await else {
                debug!(symbol, "no price available, skipping this tick");
                continue;
            };

            // Decide and remove under one lock so a breach fires exactly once
            let fired = {
                let mut positions = self.positions.write().unwrap();
                let breach = positions.get(&symbol).and_then(|p| {
                    if p.stop_loss.is_some_and(|sl| current_price <= sl) {
                        Some(ExitReason::StopLoss(p.stop_loss.unwrap()))
                    } else if p.take_profit.is_some_and(|tp| current_price >= tp) {
                        Some(ExitReason::TakeProfit(p.take_profit.unwrap()))
                    } else {
                        None
                    }
                });
                breach.and_then(|reason| positions.remove(&symbol).map(|p| (p, reason)))
            };

            let Some((position, reason)) = fired else {
                continue;
            };

            let pnl_pct =
                (current_price - position.entry_price) / position.entry_price * 100.0;
            let (reason_text, threshold_key, threshold) = match reason {
                ExitReason::StopLoss(sl) => (
                    format!("Stop loss triggered: price {current_price:.2} <= SL {sl:.2}"),
                    "stop_loss",
                    sl,
                ),
                ExitReason::TakeProfit(tp) => (
                    format!("Take profit triggered: price {current_price:.2} >= TP {tp:.2}"),
                    "take_profit",
                    tp,
                ),
            };
            info!(symbol = %position.symbol, pnl_pct, %reason_text, "Exit signal");

            signals.push(
                Signal::sell(position.symbol.clone(), position.quantity, reason_text)
                    .with_meta("exit_price", current_price)
                    .with_meta("entry_price", position.entry_price)
                    .with_meta(threshold_key, threshold)
                    .with_meta("pnl_pct", pnl_pct),
            );
        }

        signals
    }

    /// Consume a push quote feed; pushed prices take precedence over polling
    pub async fn run_quote_feed(&self, mut rx: mpsc::Receiver<QuoteUpdate>) {
        while let Some(update) = rx.recv().await {
            let Some(price) = mid_price(update.bid_price, update.ask_price) else {
                continue;
            };
            self.pushed_prices
                .write()
                .unwrap()
                .insert(update.symbol, price);
        }
    }

    /// Price resolution: pushed feed, then quote mid (or the available
    /// side), then the latest trade print.
    async fn current_price(&self, symbol: &str) -> Option<f64> {
        if let Some(price) = self.pushed_prices.read().unwrap().get(symbol) {
            return Some(*price);
        }

        match self.broker.get_latest_quote(symbol).await {
            Ok(Some(quote)) => {
                if let Some(price) = mid_price(quote.bid_price, quote.ask_price) {
                    return Some(price);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(symbol, error = %e, "quote lookup failed"),
        }

        match self.broker.get_latest_trade(symbol).await {
            Ok(Some(trade)) if trade.price > 0.0 => Some(trade.price),
            Ok(_) => None,
            Err(e) => {
                warn!(symbol, error = %e, "trade lookup failed");
                None
            }
        }
    }
}

/// Mid of bid/ask when both are present, else whichever side is available
fn mid_price(bid: Option<f64>, ask: Option<f64>) -> Option<f64> {
    let bid = bid.filter(|p| *p > 0.0);
    let ask = ask.filter(|p| *p > 0.0);
    match (bid, ask) {
        (Some(b), Some(a)) => Some((b + a) / 2.0),
        (None, Some(a)) => Some(a),
        (Some(b), None) => Some(b),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testing::MockBroker;
    use crate::types::SignalAction;

    fn monitor_with(broker: MockBroker) -> PositionMonitor {
        PositionMonitor::new(Arc::new(broker))
    }

    #[test]
    fn test_add_requires_a_threshold() {
        let monitor = monitor_with(MockBroker::new());
        assert!(monitor
            .add_position("X", 10.0, 100.0, None, None)
            .is_err());
        assert!(monitor
            .add_position("X", 10.0, 100.0, Some(95.0), None)
            .is_ok());
    }

    #[test]
    fn test_add_requires_entry_price() {
        let monitor = monitor_with(MockBroker::new());
        assert!(monitor
            .add_position("X", 10.0, 0.0, Some(95.0), None)
            .is_err());
    }

    #[test]
    fn test_one_position_per_symbol() {
        let monitor = monitor_with(MockBroker::new());
        monitor
            .add_position("X", 10.0, 100.0, Some(95.0), None)
            .unwrap();
        monitor
            .add_position("X", 20.0, 110.0, Some(105.0), None)
            .unwrap();
        let positions = monitor.monitored_positions();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, 20.0);
    }

    #[test]
    fn test_update_quantity_removes_at_zero() {
        let monitor = monitor_with(MockBroker::new());
        monitor
            .add_position("X", 10.0, 100.0, Some(95.0), None)
            .unwrap();
        monitor.update_quantity("X", 4.0);
        assert_eq!(monitor.monitored_positions()[0].quantity, 4.0);
        monitor.update_quantity("X", 0.0);
        assert!(monitor.monitored_positions().is_empty());
    }

    #[tokio::test]
    async fn test_stop_loss_breach_fires_once() {
        let broker = MockBroker::new().with_quote("X", Some(94.0), Some(94.0));
        let monitor = monitor_with(broker);
        monitor
            .add_position("X", 10.0, 100.0, Some(95.0), Some(120.0))
            .unwrap();

        let signals = monitor.check().await;
        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.action, SignalAction::Sell);
        assert_eq!(signal.symbol, "X");
        assert_eq!(signal.quantity, 10.0);
        assert!(signal.reason.contains("Stop loss"));
        assert_eq!(signal.meta("exit_price"), Some(94.0));
        assert!((signal.meta("pnl_pct").unwrap() - -6.0).abs() < 1e-9);

        // Registry is empty: the next tick emits nothing
        assert!(monitor.monitored_positions().is_empty());
        assert!(monitor.check().await.is_empty());
    }

    #[tokio::test]
    async fn test_take_profit_breach() {
        let broker = MockBroker::new().with_quote("X", Some(121.0), Some(121.0));
        let monitor = monitor_with(broker);
        monitor
            .add_position("X", 5.0, 100.0, Some(95.0), Some(120.0))
            .unwrap();

        let signals = monitor.check().await;
        assert_eq!(signals.len(), 1);
        assert!(signals[0].reason.contains("Take profit"));
        assert_eq!(signals[0].meta("take_profit"), Some(120.0));
    }

    #[tokio::test]
    async fn test_no_breach_keeps_position() {
        let broker = MockBroker::new().with_quote("X", Some(100.0), Some(100.0));
        let monitor = monitor_with(broker);
        monitor
            .add_position("X", 5.0, 100.0, Some(95.0), Some(120.0))
            .unwrap();

        assert!(monitor.check().await.is_empty());
        assert_eq!(monitor.monitored_positions().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_price_skips_symbol() {
        // No quote and no trade configured for X
        let monitor = monitor_with(MockBroker::new());
        monitor
            .add_position("X", 5.0, 100.0, Some(95.0), None)
            .unwrap();

        assert!(monitor.check().await.is_empty());
        assert_eq!(monitor.monitored_positions().len(), 1, "position survives");
    }

    #[tokio::test]
    async fn test_quote_mid_price_used() {
        // mid of 93/95 = 94 <= SL 95
        let broker = MockBroker::new().with_quote("X", Some(93.0), Some(95.0));
        let monitor = monitor_with(broker);
        monitor
            .add_position("X", 5.0, 100.0, Some(95.0), None)
            .unwrap();

        let signals = monitor.check().await;
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].meta("exit_price"), Some(94.0));
    }

    #[tokio::test]
    async fn test_one_sided_quote_fallback() {
        let broker = MockBroker::new().with_quote("X", None, Some(94.0));
        let monitor = monitor_with(broker);
        monitor
            .add_position("X", 5.0, 100.0, Some(95.0), None)
            .unwrap();
        assert_eq!(monitor.check().await.len(), 1);
    }

    #[tokio::test]
    async fn test_trade_price_fallback() {
        // No quote at all; the latest trade print decides
        let broker = MockBroker::new().with_trade("X", 94.0);
        let monitor = monitor_with(broker);
        monitor
            .add_position("X", 5.0, 100.0, Some(95.0), None)
            .unwrap();
        assert_eq!(monitor.check().await.len(), 1);
    }

    #[tokio::test]
    async fn test_pushed_price_takes_precedence() {
        // Polling would say 100 (no breach); the pushed feed says 94
        let broker = MockBroker::new().with_quote("X", Some(100.0), Some(100.0));
        let monitor = monitor_with(broker);
        monitor
            .add_position("X", 5.0, 100.0, Some(95.0), None)
            .unwrap();
        monitor
            .pushed_prices
            .write()
            .unwrap()
            .insert("X".to_string(), 94.0);

        let signals = monitor.check().await;
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].meta("exit_price"), Some(94.0));
    }

    #[test]
    fn test_mid_price_resolution() {
        assert_eq!(mid_price(Some(99.0), Some(101.0)), Some(100.0));
        assert_eq!(mid_price(None, Some(101.0)), Some(101.0));
        assert_eq!(mid_price(Some(99.0), None), Some(99.0));
        assert_eq!(mid_price(None, None), None);
        assert_eq!(mid_price(Some(0.0), None), None, "zero is not a price");
    }
}
