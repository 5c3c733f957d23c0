//! Strategy execution scheduler
//!
//! Runs one independent periodic loop per enabled strategy plus one loop
//! for the position monitor, all against a shared open-positions ledger
//! that mirrors broker-confirmed holdings. The ledger and the strategy
//! table are the only shared mutable state; each is guarded by its own
//! lock held only for the read-modify-write itself, never across a
//! brokerage call. Loops cancel cooperatively at the inter-cycle sleep, so
//! an in-flight brokerage call always completes before teardown. A failure
//! inside one cycle is logged and costs only that cycle: the loop sleeps
//! its normal interval and retries.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, OrderRequest, OrderSide};
use crate::error::{EngineError, EngineResult};
use crate::monitor::PositionMonitor;
use crate::strategies::{Strategy, StrategyKind, StrategyParams};
use crate::types::{MarketData, Signal, SignalAction};

/// Days of daily bars fetched for each evaluation
const LOOKBACK_DAYS: i64 = 100;
/// The monitor ticks faster than any strategy interval
const MONITOR_INTERVAL_SECS: u64 = 10;
/// Granularity of the cancellable inter-cycle sleep
const SLEEP_CHUNK_MS: u64 = 500;

// ============================================================================
// Types
// ============================================================================

struct StrategyEntry {
    strategy: Strategy,
    interval_seconds: u64,
    enabled: bool,
    last_execution: Option<DateTime<Utc>>,
    executions: u64,
    signals_generated: u64,
    orders_placed: u64,
}

/// Snapshot of one scheduled strategy
#[derive(Debug, Clone, Serialize)]
pub struct StrategyStatus {
    pub id: String,
    pub strategy_type: String,
    pub name: String,
    pub symbols: Vec<String>,
    pub parameters: StrategyParams,
    pub interval_seconds: u64,
    pub enabled: bool,
    pub last_execution: Option<DateTime<Utc>>,
    pub executions: u64,
    pub signals_generated: u64,
    pub orders_placed: u64,
}

/// Snapshot of the whole scheduler
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub active_strategies: usize,
    pub total_strategies: usize,
    pub monitored_positions: usize,
    pub strategies: Vec<StrategyStatus>,
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct StrategyScheduler {
    broker: Arc<dyn Broker>,
    monitor: Arc<PositionMonitor>,
    /// Handle to ourselves for spawning loops from `&self` methods
    me: Weak<StrategyScheduler>,
    strategies: RwLock<HashMap<String, StrategyEntry>>,
    /// Broker-confirmed holdings: symbol -> quantity; absent means flat
    ledger: Mutex<HashMap<String, f64>>,
    /// Cancellation flags for the running per-strategy loops
    loops: Mutex<HashMap<String, Arc<AtomicBool>>>,
    monitor_loop: Mutex<Option<Arc<AtomicBool>>>,
    is_running: AtomicBool,
}

impl StrategyScheduler {
    pub fn new(broker: Arc<dyn Broker>) -> Arc<Self> {
        let monitor = Arc::new(PositionMonitor::new(Arc::clone(&broker)));
        Arc::new_cyclic(|me| Self {
            broker,
            monitor,
            me: me.clone(),
            strategies: RwLock::new(HashMap::new()),
            ledger: Mutex::new(HashMap::new()),
            loops: Mutex::new(HashMap::new()),
            monitor_loop: Mutex::new(None),
            is_running: AtomicBool::new(false),
        })
    }

    pub fn monitor(&self) -> &Arc<PositionMonitor> {
        &self.monitor
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Strategy management
    // ------------------------------------------------------------------

    /// Register a strategy. Unknown types and invalid parameters fail
    /// validation; so does a duplicate id.
    pub fn add_strategy(
        &self,
        id: &str,
        strategy_type: &str,
        symbols: Vec<String>,
        parameters: &HashMap<String, Value>,
        interval_seconds: u64,
    ) -> EngineResult<()> {
        if interval_seconds == 0 {
            return Err(EngineError::validation(
                "evaluation interval must be at least 1 second".to_string(),
            ));
        }
        let kind: StrategyKind = strategy_type.parse()?;
        let strategy = Strategy::new(kind, symbols, parameters)?;

        let mut strategies = self.strategies.write().unwrap();
        if strategies.contains_key(id) {
            return Err(EngineError::validation(format!(
                "strategy already registered: {id}"
            )));
        }
        strategies.insert(
            id.to_string(),
            StrategyEntry {
                strategy,
                interval_seconds,
                enabled: false,
                last_execution: None,
                executions: 0,
                signals_generated: 0,
                orders_placed: 0,
            },
        );
        info!(strategy = id, kind = strategy_type, "Strategy added");
        Ok(())
    }

    pub fn remove_strategy(&self, id: &str) -> EngineResult<()> {
        self.cancel_loop(id);
        let removed = self.strategies.write().unwrap().remove(id);
        if removed.is_none() {
            return Err(EngineError::validation(format!("strategy not found: {id}")));
        }
        info!(strategy = id, "Strategy removed");
        Ok(())
    }

    /// Mark a strategy enabled and, when the scheduler is running, start
    /// its loop.
    pub fn enable_strategy(&self, id: &str) -> EngineResult<()> {
        {
            let mut strategies = self.strategies.write().unwrap();
            let entry = strategies
                .get_mut(id)
                .ok_or_else(|| EngineError::validation(format!("strategy not found: {id}")))?;
            entry.enabled = true;
        }
        if self.is_running() && !self.loops.lock().unwrap().contains_key(id) {
            self.spawn_strategy_loop(id);
        }
        Ok(())
    }

    /// Mark a strategy disabled and cancel its loop at the next
    /// suspension point.
    pub fn disable_strategy(&self, id: &str) -> EngineResult<()> {
        {
            let mut strategies = self.strategies.write().unwrap();
            let entry = strategies
                .get_mut(id)
                .ok_or_else(|| EngineError::validation(format!("strategy not found: {id}")))?;
            entry.enabled = false;
        }
        self.cancel_loop(id);
        Ok(())
    }

    fn cancel_loop(&self, id: &str) {
        if let Some(cancel) = self.loops.lock().unwrap().remove(id) {
            cancel.store(true, Ordering::Relaxed);
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start the monitor loop and a loop for every enabled strategy
    pub fn start(&self) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(scheduler) = self.me.upgrade() else {
            return;
        };
        info!("Scheduler starting");

        let cancel = Arc::new(AtomicBool::new(false));
        *self.monitor_loop.lock().unwrap() = Some(cancel.clone());
        tokio::spawn(async move { scheduler.run_monitor_loop(cancel).await });

        let enabled: Vec<String> = {
            let strategies = self.strategies.read().unwrap();
            strategies
                .iter()
                .filter(|(_, entry)| entry.enabled)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in enabled {
            if !self.loops.lock().unwrap().contains_key(&id) {
                self.spawn_strategy_loop(&id);
            }
        }
    }

    /// Cancel every loop at its next suspension point
    pub fn stop(&self) {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Scheduler stopping");
        if let Some(cancel) = self.monitor_loop.lock().unwrap().take() {
            cancel.store(true, Ordering::Relaxed);
        }
        let mut loops = self.loops.lock().unwrap();
        for cancel in loops.values() {
            cancel.store(true, Ordering::Relaxed);
        }
        loops.clear();
    }

    pub fn status(&self) -> SchedulerStatus {
        let strategies = self.strategies.read().unwrap();
        let mut snapshots: Vec<StrategyStatus> = strategies
            .iter()
            .map(|(id, entry)| snapshot(id, entry))
            .collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));

        SchedulerStatus {
            is_running: self.is_running(),
            active_strategies: snapshots.iter().filter(|s| s.enabled).count(),
            total_strategies: snapshots.len(),
            monitored_positions: self.monitor.status().monitored_count,
            strategies: snapshots,
        }
    }

    pub fn get_strategy(&self, id: &str) -> Option<StrategyStatus> {
        let strategies = self.strategies.read().unwrap();
        strategies.get(id).map(|entry| snapshot(id, entry))
    }

    pub fn ledger_snapshot(&self) -> HashMap<String, f64> {
        self.ledger.lock().unwrap().clone()
    }

    // ------------------------------------------------------------------
    // Loops
    // ------------------------------------------------------------------

    fn spawn_strategy_loop(&self, id: &str) {
        let Some(scheduler) = self.me.upgrade() else {
            return;
        };
        let cancel = Arc::new(AtomicBool::new(false));
        self.loops
            .lock()
            .unwrap()
            .insert(id.to_string(), cancel.clone());
        let id = id.to_string();
        tokio::spawn(async move { scheduler.run_strategy_loop(id, cancel).await });
    }

    async fn run_strategy_loop(self: Arc<Self>, id: String, cancel: Arc<AtomicBool>) {
        info!(strategy = %id, "Strategy loop started");
        loop {
            if cancel.load(Ordering::Relaxed) || !self.is_running() {
                break;
            }
            let interval = {
                let strategies = self.strategies.read().unwrap();
                match strategies.get(&id) {
                    Some(entry) if entry.enabled => entry.interval_seconds,
                    _ => break,
                }
            };

            if let Err(e) = self.run_cycle(&id).await {
                error!(strategy = %id, error = %e, "Strategy cycle failed, retrying next interval");
            }

            // Cancellation lands here; the cycle above always runs to completion
            for _ in 0..(interval * 1000 / SLEEP_CHUNK_MS) {
                if cancel.load(Ordering::Relaxed) || !self.is_running() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(SLEEP_CHUNK_MS)).await;
            }
        }
        info!(strategy = %id, "Strategy loop stopped");
    }

    /// Exit signals from the monitor go through the same execution path as
    /// strategy signals, on a fixed short interval.
    async fn run_monitor_loop(self: Arc<Self>, cancel: Arc<AtomicBool>) {
        info!("Position monitor loop started");
        loop {
            if cancel.load(Ordering::Relaxed) || !self.is_running() {
                break;
            }

            for signal in self.monitor.check().await {
                if let Err(e) = self.execute_signal(&signal).await {
                    error!(symbol = %signal.symbol, error = %e, "Exit execution failed");
                }
            }

            for _ in 0..(MONITOR_INTERVAL_SECS * 1000 / SLEEP_CHUNK_MS) {
                if cancel.load(Ordering::Relaxed) || !self.is_running() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(SLEEP_CHUNK_MS)).await;
            }
        }
        info!("Position monitor loop stopped");
    }

    // ------------------------------------------------------------------
    // One evaluation cycle
    // ------------------------------------------------------------------

    async fn run_cycle(&self, id: &str) -> EngineResult<()> {
        let strategy = {
            let strategies = self.strategies.read().unwrap();
            let entry = strategies
                .get(id)
                .ok_or_else(|| EngineError::validation(format!("strategy not found: {id}")))?;
            entry.strategy.clone()
        };

        // Monitor exits execute before anything else in the cycle
        let exit_signals = self.monitor.check().await;
        if !exit_signals.is_empty() {
            info!(
                strategy = id,
                count = exit_signals.len(),
                "Executing position monitor exit signals"
            );
            for signal in &exit_signals {
                match self.execute_signal(signal).await {
                    Ok(true) => self.with_entry(id, |entry| entry.orders_placed += 1),
                    Ok(false) => {}
                    Err(e) => {
                        warn!(symbol = %signal.symbol, error = %e, "Exit execution failed")
                    }
                }
            }
        }

        // Reconcile the ledger from the broker's authoritative positions
        self.reconcile_ledger().await;

        // Equity is fetched after the exits so fresh entries are not sized
        // against pre-exit portfolio value
        let portfolio_value = match self.broker.get_account().await {
            Ok(account) => Some(account.equity),
            Err(e) => {
                warn!(error = %e, "Account fetch failed; buys will be skipped this cycle");
                None
            }
        };

        let market_data = self.fetch_market_data(strategy.symbols()).await;
        let signals = strategy.analyze(&market_data, portfolio_value);

        self.with_entry(id, |entry| {
            entry.last_execution = Some(Utc::now());
            entry.executions += 1;
            entry.signals_generated += signals.len() as u64;
        });

        for signal in &signals {
            match self.execute_signal(signal).await {
                Ok(true) => self.with_entry(id, |entry| entry.orders_placed += 1),
                Ok(false) => {}
                Err(e) => {
                    warn!(symbol = %signal.symbol, error = %e, "Signal execution failed")
                }
            }
        }

        Ok(())
    }

    async fn reconcile_ledger(&self) {
        match self.broker.get_positions().await {
            Ok(positions) => {
                let fresh: HashMap<String, f64> = positions
                    .into_iter()
                    .filter(|p| p.qty > 0.0)
                    .map(|p| (p.symbol, p.qty))
                    .collect();
                *self.ledger.lock().unwrap() = fresh;
            }
            Err(e) => {
                // Keep the optimistic ledger; it is corrected next cycle
                warn!(error = %e, "Position sync failed, keeping previous ledger");
            }
        }
    }

    async fn fetch_market_data(&self, symbols: &[String]) -> MarketData {
        let end = Utc::now();
        let start = end - ChronoDuration::days(LOOKBACK_DAYS);
        let mut market_data = MarketData::new();

        for symbol in symbols {
            match self.broker.get_bars(symbol, "1Day", start, end).await {
                Ok(bars) if !bars.is_empty() => {
                    market_data.insert(symbol.clone(), bars);
                }
                Ok(_) => debug!(symbol, "no bars returned"),
                Err(e) => warn!(symbol, error = %e, "Bar fetch failed, symbol skipped"),
            }
        }

        market_data
    }

    /// Submit one signal. Returns whether an order was actually placed: a
    /// sell against a flat ledger is a no-op, not an error. The ledger is
    /// only touched after the brokerage accepted the order, and each
    /// mutation is a single locked read-modify-write.
    async fn execute_signal(&self, signal: &Signal) -> EngineResult<bool> {
        match signal.action {
            SignalAction::Buy => {
                if signal.quantity <= 0.0 {
                    debug!(symbol = %signal.symbol, "Buy signal without quantity, skipping");
                    return Ok(false);
                }

                let order =
                    OrderRequest::market(signal.symbol.clone(), signal.quantity, OrderSide::Buy);
                self.broker.submit_order(&order).await?;
                info!(
                    symbol = %signal.symbol,
                    qty = signal.quantity,
                    reason = %signal.reason,
                    "BUY order submitted"
                );

                {
                    let mut ledger = self.ledger.lock().unwrap();
                    *ledger.entry(signal.symbol.clone()).or_insert(0.0) += signal.quantity;
                }

                // Register with the monitor when the signal carries exit levels
                if let Some(entry_price) = signal.meta("entry_price") {
                    let stop_loss = signal.meta("stop_loss");
                    let take_profit = signal.meta("take_profit");
                    if stop_loss.is_some() || take_profit.is_some() {
                        if let Err(e) = self.monitor.add_position(
                            &signal.symbol,
                            signal.quantity,
                            entry_price,
                            stop_loss,
                            take_profit,
                        ) {
                            warn!(symbol = %signal.symbol, error = %e, "Monitor registration failed");
                        }
                    }
                }

                Ok(true)
            }
            SignalAction::Sell => {
                let sell_qty = if signal.quantity > 0.0 {
                    signal.quantity
                } else {
                    // Quantity 0 means "close the full position"
                    let held = self
                        .ledger
                        .lock()
                        .unwrap()
                        .get(&signal.symbol)
                        .copied()
                        .unwrap_or(0.0);
                    if held == 0.0 {
                        debug!(symbol = %signal.symbol, "Skip sell: no position held");
                        return Ok(false);
                    }
                    held
                };

                let order =
                    OrderRequest::market(signal.symbol.clone(), sell_qty, OrderSide::Sell);
                self.broker.submit_order(&order).await?;
                info!(
                    symbol = %signal.symbol,
                    qty = sell_qty,
                    reason = %signal.reason,
                    "SELL order submitted"
                );

                let remaining = {
                    let mut ledger = self.ledger.lock().unwrap();
                    let held = ledger.get(&signal.symbol).copied().unwrap_or(0.0);
                    let remaining = (held - sell_qty).max(0.0);
                    if remaining == 0.0 {
                        ledger.remove(&signal.symbol);
                    } else {
                        ledger.insert(signal.symbol.clone(), remaining);
                    }
                    remaining
                };

                if remaining == 0.0 {
                    self.monitor.remove_position(&signal.symbol);
                } else {
                    self.monitor.update_quantity(&signal.symbol, remaining);
                }

                Ok(true)
            }
        }
    }

    fn with_entry(&self, id: &str, f: impl FnOnce(&mut StrategyEntry)) {
        if let Some(entry) = self.strategies.write().unwrap().get_mut(id) {
            f(entry);
        }
    }
}

fn snapshot(id: &str, entry: &StrategyEntry) -> StrategyStatus {
    StrategyStatus {
        id: id.to_string(),
        strategy_type: entry.strategy.kind().id().to_string(),
        name: entry.strategy.kind().display_name().to_string(),
        symbols: entry.strategy.symbols().to_vec(),
        parameters: entry.strategy.params().clone(),
        interval_seconds: entry.interval_seconds,
        enabled: entry.enabled,
        last_execution: entry.last_execution,
        executions: entry.executions,
        signals_generated: entry.signals_generated,
        orders_placed: entry.orders_placed,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testing::MockBroker;
    use crate::types::PriceBar;
    use chrono::Duration;

    fn scheduler_with(broker: MockBroker) -> Arc<StrategyScheduler> {
        StrategyScheduler::new(Arc::new(broker))
    }

    fn breakout_bars() -> Vec<PriceBar> {
        // 20 flat days then a 5%-above-high close on double volume,
        // dated to land inside the scheduler's lookback window
        let start = Utc::now() - Duration::days(25);
        let mut bars: Vec<PriceBar> = (0..20)
            .map(|i| PriceBar {
                timestamp: start + Duration::days(i),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 1_000.0,
            })
            .collect();
        bars.push(PriceBar {
            timestamp: start + Duration::days(20),
            open: 100.0,
            high: 107.0,
            low: 99.0,
            close: 101.0 * 1.05,
            volume: 2_000.0,
        });
        bars
    }

    fn add_momentum(scheduler: &Arc<StrategyScheduler>, id: &str) {
        scheduler
            .add_strategy(
                id,
                "momentum_breakout",
                vec!["TEST".to_string()],
                &HashMap::new(),
                60,
            )
            .unwrap();
    }

    #[test]
    fn test_unknown_strategy_type_rejected() {
        let scheduler = scheduler_with(MockBroker::new());
        let result = scheduler.add_strategy(
            "s1",
            "martingale",
            vec!["TEST".to_string()],
            &HashMap::new(),
            60,
        );
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let scheduler = scheduler_with(MockBroker::new());
        add_momentum(&scheduler, "s1");
        let result = scheduler.add_strategy(
            "s1",
            "momentum_breakout",
            vec!["TEST".to_string()],
            &HashMap::new(),
            60,
        );
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_enable_disable_unknown_strategy() {
        let scheduler = scheduler_with(MockBroker::new());
        assert!(scheduler.enable_strategy("nope").is_err());
        assert!(scheduler.disable_strategy("nope").is_err());
        assert!(scheduler.remove_strategy("nope").is_err());
    }

    #[tokio::test]
    async fn test_sell_all_with_flat_ledger_is_noop() {
        let mock = Arc::new(MockBroker::new());
        let scheduler = StrategyScheduler::new(mock.clone());
        let signal = Signal::sell("TEST", 0.0, "exit");

        let placed = scheduler.execute_signal(&signal).await.unwrap();
        assert!(!placed, "flat ledger sell must not place an order");
        assert!(mock.submitted_orders().is_empty());
        assert!(scheduler.ledger_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_buy_updates_ledger_and_registers_monitor() {
        let mock = MockBroker::new();
        let scheduler = scheduler_with(mock);
        let signal = Signal::buy("TEST", 10.0, "entry")
            .with_meta("entry_price", 100.0)
            .with_meta("stop_loss", 95.0)
            .with_meta("take_profit", 115.0);

        let placed = scheduler.execute_signal(&signal).await.unwrap();
        assert!(placed);
        assert_eq!(scheduler.ledger_snapshot().get("TEST"), Some(&10.0));

        let monitored = scheduler.monitor().monitored_positions();
        assert_eq!(monitored.len(), 1);
        assert_eq!(monitored[0].stop_loss, Some(95.0));
        assert_eq!(monitored[0].take_profit, Some(115.0));
    }

    #[tokio::test]
    async fn test_buy_without_exit_levels_skips_monitor() {
        let scheduler = scheduler_with(MockBroker::new());
        let signal = Signal::buy("TEST", 10.0, "entry").with_meta("entry_price", 100.0);

        scheduler.execute_signal(&signal).await.unwrap();
        assert!(scheduler.monitor().monitored_positions().is_empty());
    }

    #[tokio::test]
    async fn test_partial_sell_decrements_ledger_and_monitor() {
        let scheduler = scheduler_with(MockBroker::new());
        let buy = Signal::buy("TEST", 10.0, "entry")
            .with_meta("entry_price", 100.0)
            .with_meta("stop_loss", 95.0);
        scheduler.execute_signal(&buy).await.unwrap();

        let partial = Signal::sell("TEST", 4.0, "trim");
        scheduler.execute_signal(&partial).await.unwrap();
        assert_eq!(scheduler.ledger_snapshot().get("TEST"), Some(&6.0));
        assert_eq!(
            scheduler.monitor().monitored_positions()[0].quantity,
            6.0
        );

        // Quantity 0 closes the remainder and clears both structures
        let close = Signal::sell("TEST", 0.0, "close");
        scheduler.execute_signal(&close).await.unwrap();
        assert!(scheduler.ledger_snapshot().is_empty());
        assert!(scheduler.monitor().monitored_positions().is_empty());
    }

    #[tokio::test]
    async fn test_oversell_floors_ledger_at_zero() {
        let scheduler = scheduler_with(MockBroker::new());
        scheduler.execute_signal(&Signal::buy("TEST", 5.0, "entry")).await.unwrap();

        let sell = Signal::sell("TEST", 50.0, "explicit oversized sell");
        scheduler.execute_signal(&sell).await.unwrap();
        assert!(scheduler.ledger_snapshot().is_empty(), "floored at zero, not negative");
    }

    #[tokio::test]
    async fn test_rejected_order_leaves_ledger_unchanged() {
        let mock = MockBroker::new();
        mock.reject_orders.store(true, Ordering::Relaxed);
        let scheduler = scheduler_with(mock);

        let signal = Signal::buy("TEST", 10.0, "entry")
            .with_meta("entry_price", 100.0)
            .with_meta("stop_loss", 95.0);
        let result = scheduler.execute_signal(&signal).await;

        assert!(matches!(result, Err(EngineError::ExecutionFailure(_))));
        assert!(scheduler.ledger_snapshot().is_empty());
        assert!(scheduler.monitor().monitored_positions().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_replaces_ledger() {
        let mock = MockBroker::new().with_position("HELD", 5.0);
        let scheduler = scheduler_with(mock);
        scheduler
            .ledger
            .lock()
            .unwrap()
            .insert("STALE".to_string(), 3.0);

        scheduler.reconcile_ledger().await;

        let ledger = scheduler.ledger_snapshot();
        assert_eq!(ledger.get("HELD"), Some(&5.0));
        assert!(!ledger.contains_key("STALE"));
    }

    #[tokio::test]
    async fn test_full_cycle_places_breakout_order() {
        let mock = Arc::new(MockBroker::new().with_bars("TEST", breakout_bars()));
        let scheduler = StrategyScheduler::new(mock.clone());
        add_momentum(&scheduler, "s1");

        scheduler.run_cycle("s1").await.unwrap();

        // floor(100_000 * 10% / 106.05) = 94 shares
        let orders = mock.submitted_orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, OrderSide::Buy);
        assert_eq!(orders[0].qty, 94.0);
        let ledger = scheduler.ledger_snapshot();
        assert_eq!(ledger.get("TEST"), Some(&94.0));
        assert_eq!(scheduler.monitor().monitored_positions().len(), 1);

        let status = scheduler.get_strategy("s1").unwrap();
        assert_eq!(status.executions, 1);
        assert_eq!(status.signals_generated, 1);
        assert_eq!(status.orders_placed, 1);
        assert!(status.last_execution.is_some());
    }

    #[tokio::test]
    async fn test_cycle_survives_missing_account() {
        let mock = MockBroker::new().with_bars("TEST", breakout_bars());
        *mock.equity.lock().unwrap() = None; // account endpoint now fails
        let scheduler = scheduler_with(mock);
        add_momentum(&scheduler, "s1");

        // The cycle completes; the unsizable buy is dropped
        scheduler.run_cycle("s1").await.unwrap();
        assert!(scheduler.ledger_snapshot().is_empty());
        assert_eq!(scheduler.get_strategy("s1").unwrap().executions, 1);
    }

    #[tokio::test]
    async fn test_monitor_exit_runs_through_execution_path() {
        // SL breached at tick time; strategy itself has no data to act on
        let mock = MockBroker::new().with_quote("HELD", Some(94.0), Some(94.0));
        let scheduler = scheduler_with(mock);
        add_momentum(&scheduler, "s1");
        scheduler
            .monitor()
            .add_position("HELD", 5.0, 100.0, Some(95.0), None)
            .unwrap();

        scheduler.run_cycle("s1").await.unwrap();

        assert!(scheduler.monitor().monitored_positions().is_empty());
        assert_eq!(scheduler.get_strategy("s1").unwrap().orders_placed, 1);
    }

    #[tokio::test]
    async fn test_start_stop_flags() {
        let scheduler = scheduler_with(MockBroker::new());
        add_momentum(&scheduler, "s1");
        scheduler.enable_strategy("s1").unwrap();

        scheduler.start();
        assert!(scheduler.is_running());
        let status = scheduler.status();
        assert_eq!(status.active_strategies, 1);
        assert_eq!(status.total_strategies, 1);

        scheduler.stop();
        assert!(!scheduler.is_running());
        assert!(scheduler.loops.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disable_cancels_loop_flag() {
        let scheduler = scheduler_with(MockBroker::new());
        add_momentum(&scheduler, "s1");
        scheduler.start();
        scheduler.enable_strategy("s1").unwrap();
        assert!(scheduler.loops.lock().unwrap().contains_key("s1"));

        scheduler.disable_strategy("s1").unwrap();
        assert!(!scheduler.loops.lock().unwrap().contains_key("s1"));
        assert!(!scheduler.get_strategy("s1").unwrap().enabled);
        scheduler.stop();
    }
}
