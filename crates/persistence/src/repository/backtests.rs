//! Backtest history keyed by request fingerprint
//!
//! Identical requests are deduplicated with INSERT OR IGNORE on the
//! fingerprint column, so re-running a stored backtest serves the cached
//! result instead of burning data-API quota.

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// One stored backtest run: request fields, metrics, equity curve JSON
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BacktestRecord {
    pub id: Option<i64>,
    pub fingerprint: String,
    pub strategy_type: String,
    /// JSON array of ticker strings
    pub symbols: String,
    /// JSON object of parameter overrides
    pub parameters: String,
    pub start_date: String,
    pub end_date: String,
    pub initial_capital: f64,
    pub total_return: f64,
    pub buy_and_hold_return: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub win_rate: f64,
    pub total_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub avg_trade_duration_days: f64,
    pub max_consecutive_wins: i64,
    pub max_consecutive_losses: i64,
    /// JSON array of equity-curve points
    pub equity_curve: String,
    pub slippage_pct: Option<f64>,
    pub created_at: Option<i64>,
}

pub struct BacktestRepository<'a> {
    pool: &'a SqlitePool,
}

const COLUMNS: &str = r#"id, fingerprint, strategy_type, symbols, parameters,
       start_date, end_date, initial_capital,
       total_return, buy_and_hold_return, max_drawdown, sharpe_ratio,
       win_rate, total_trades, winning_trades, losing_trades,
       avg_win, avg_loss, avg_trade_duration_days,
       max_consecutive_wins, max_consecutive_losses,
       equity_curve, slippage_pct, created_at"#;

impl<'a> BacktestRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Save a run; an existing fingerprint is left untouched
    pub async fn save(&self, record: &BacktestRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO backtests (
                fingerprint, strategy_type, symbols, parameters,
                start_date, end_date, initial_capital,
                total_return, buy_and_hold_return, max_drawdown, sharpe_ratio,
                win_rate, total_trades, winning_trades, losing_trades,
                avg_win, avg_loss, avg_trade_duration_days,
                max_consecutive_wins, max_consecutive_losses,
                equity_curve, slippage_pct
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.fingerprint)
        .bind(&record.strategy_type)
        .bind(&record.symbols)
        .bind(&record.parameters)
        .bind(&record.start_date)
        .bind(&record.end_date)
        .bind(record.initial_capital)
        .bind(record.total_return)
        .bind(record.buy_and_hold_return)
        .bind(record.max_drawdown)
        .bind(record.sharpe_ratio)
        .bind(record.win_rate)
        .bind(record.total_trades)
        .bind(record.winning_trades)
        .bind(record.losing_trades)
        .bind(record.avg_win)
        .bind(record.avg_loss)
        .bind(record.avg_trade_duration_days)
        .bind(record.max_consecutive_wins)
        .bind(record.max_consecutive_losses)
        .bind(&record.equity_curve)
        .bind(record.slippage_pct)
        .execute(self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> DbResult<Option<BacktestRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM backtests WHERE fingerprint = ?");
        let record = sqlx::query_as::<_, BacktestRecord>(&sql)
            .bind(fingerprint)
            .fetch_optional(self.pool)
            .await?;
        Ok(record)
    }

    pub async fn list_recent(&self, limit: i64) -> DbResult<Vec<BacktestRecord>> {
        let sql =
            format!("SELECT {COLUMNS} FROM backtests ORDER BY created_at DESC, id DESC LIMIT ?");
        let records = sqlx::query_as::<_, BacktestRecord>(&sql)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn record(fingerprint: &str) -> BacktestRecord {
        BacktestRecord {
            id: None,
            fingerprint: fingerprint.to_string(),
            strategy_type: "mean_reversion_rsi".to_string(),
            symbols: r#"["AAPL"]"#.to_string(),
            parameters: "{}".to_string(),
            start_date: "2023-01-01T00:00:00Z".to_string(),
            end_date: "2024-01-01T00:00:00Z".to_string(),
            initial_capital: 100_000.0,
            total_return: 12.5,
            buy_and_hold_return: 8.0,
            max_drawdown: -9.3,
            sharpe_ratio: 1.1,
            win_rate: 58.0,
            total_trades: 24,
            winning_trades: 14,
            losing_trades: 10,
            avg_win: 420.0,
            avg_loss: -180.0,
            avg_trade_duration_days: 6.5,
            max_consecutive_wins: 5,
            max_consecutive_losses: 3,
            equity_curve: "[]".to_string(),
            slippage_pct: Some(0.05),
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_save_and_fetch() {
        let db = Database::in_memory().await.unwrap();
        let repo = BacktestRepository::new(db.pool());

        repo.save(&record("abc123")).await.unwrap();
        let loaded = repo.get_by_fingerprint("abc123").await.unwrap().unwrap();
        assert_eq!(loaded.total_trades, 24);
        assert_eq!(loaded.max_drawdown, -9.3);
        assert_eq!(loaded.slippage_pct, Some(0.05));

        assert!(repo.get_by_fingerprint("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_fingerprint_ignored() {
        let db = Database::in_memory().await.unwrap();
        let repo = BacktestRepository::new(db.pool());

        repo.save(&record("same")).await.unwrap();
        let mut second = record("same");
        second.total_return = 99.0;
        repo.save(&second).await.unwrap();

        let loaded = repo.get_by_fingerprint("same").await.unwrap().unwrap();
        assert_eq!(loaded.total_return, 12.5, "first write wins");
        assert_eq!(repo.list_recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_recent_ordering() {
        let db = Database::in_memory().await.unwrap();
        let repo = BacktestRepository::new(db.pool());
        repo.save(&record("first")).await.unwrap();
        repo.save(&record("second")).await.unwrap();

        let recent = repo.list_recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].fingerprint, "second");
    }
}
