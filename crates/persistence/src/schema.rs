//! Database schema definitions

/// SQL to create all tables and indexes. Statements are `;`-separated and
/// executed one by one; everything is IF NOT EXISTS so startup is
/// idempotent.
pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS strategies (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    strategy_type TEXT NOT NULL,
    symbols TEXT NOT NULL,
    parameters TEXT NOT NULL,
    interval_seconds INTEGER NOT NULL DEFAULT 60,
    enabled INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER DEFAULT (strftime('%s', 'now')),
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

CREATE TABLE IF NOT EXISTS backtests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL UNIQUE,
    strategy_type TEXT NOT NULL,
    symbols TEXT NOT NULL,
    parameters TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    initial_capital REAL NOT NULL,
    total_return REAL NOT NULL DEFAULT 0,
    buy_and_hold_return REAL NOT NULL DEFAULT 0,
    max_drawdown REAL NOT NULL DEFAULT 0,
    sharpe_ratio REAL NOT NULL DEFAULT 0,
    win_rate REAL NOT NULL DEFAULT 0,
    total_trades INTEGER NOT NULL DEFAULT 0,
    winning_trades INTEGER NOT NULL DEFAULT 0,
    losing_trades INTEGER NOT NULL DEFAULT 0,
    avg_win REAL NOT NULL DEFAULT 0,
    avg_loss REAL NOT NULL DEFAULT 0,
    avg_trade_duration_days REAL NOT NULL DEFAULT 0,
    max_consecutive_wins INTEGER NOT NULL DEFAULT 0,
    max_consecutive_losses INTEGER NOT NULL DEFAULT 0,
    equity_curve TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_strategies_type ON strategies(strategy_type);
CREATE INDEX IF NOT EXISTS idx_backtests_fingerprint ON backtests(fingerprint);
CREATE INDEX IF NOT EXISTS idx_backtests_strategy ON backtests(strategy_type);
CREATE INDEX IF NOT EXISTS idx_backtests_created ON backtests(created_at DESC)
"#;

/// ALTER TABLE migrations applied after table creation. Duplicate-column
/// errors are tolerated so these can run on every startup.
pub const MIGRATIONS: &[&str] = &["ALTER TABLE backtests ADD COLUMN slippage_pct REAL"];
