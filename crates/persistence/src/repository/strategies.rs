//! Saved strategy configurations
//!
//! Symbols and parameters are stored as JSON text; the engine revalidates
//! them when the configuration is loaded back into the scheduler.

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// One saved strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StrategyRecord {
    pub id: String,
    pub name: String,
    pub strategy_type: String,
    /// JSON array of ticker strings
    pub symbols: String,
    /// JSON object of parameter overrides
    pub parameters: String,
    pub interval_seconds: i64,
    pub enabled: bool,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

impl StrategyRecord {
    pub fn symbols_vec(&self) -> DbResult<Vec<String>> {
        Ok(serde_json::from_str(&self.symbols)?)
    }

    pub fn parameters_map(
        &self,
    ) -> DbResult<std::collections::HashMap<String, serde_json::Value>> {
        Ok(serde_json::from_str(&self.parameters)?)
    }
}

pub struct StrategyRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> StrategyRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, record: &StrategyRecord) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO strategies (id, name, strategy_type, symbols, parameters,
                                    interval_seconds, enabled)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.strategy_type)
        .bind(&record.symbols)
        .bind(&record.parameters)
        .bind(record.interval_seconds)
        .bind(record.enabled)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<StrategyRecord>> {
        let record = sqlx::query_as::<_, StrategyRecord>(
            r#"
            SELECT id, name, strategy_type, symbols, parameters,
                   interval_seconds, enabled, created_at, updated_at
            FROM strategies
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        Ok(record)
    }

    pub async fn list(&self) -> DbResult<Vec<StrategyRecord>> {
        let records = sqlx::query_as::<_, StrategyRecord>(
            r#"
            SELECT id, name, strategy_type, symbols, parameters,
                   interval_seconds, enabled, created_at, updated_at
            FROM strategies
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }

    /// Update a configuration in place; returns false for an unknown id
    pub async fn update(&self, record: &StrategyRecord) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE strategies
            SET name = ?, strategy_type = ?, symbols = ?, parameters = ?,
                interval_seconds = ?, enabled = ?,
                updated_at = strftime('%s', 'now')
            WHERE id = ?
            "#,
        )
        .bind(&record.name)
        .bind(&record.strategy_type)
        .bind(&record.symbols)
        .bind(&record.parameters)
        .bind(record.interval_seconds)
        .bind(record.enabled)
        .bind(&record.id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE strategies SET enabled = ?, updated_at = strftime('%s', 'now') WHERE id = ?",
        )
        .bind(enabled)
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM strategies WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
