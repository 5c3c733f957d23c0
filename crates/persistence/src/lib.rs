//! Persistence layer for TradeDesk
//!
//! SQLite storage for saved strategy configurations and backtest history.

pub mod repository;
pub mod schema;

pub use sqlx::sqlite::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database connection error: {0}")]
    Connection(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("stored JSON is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Database connection pool with migrations applied
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database file and bring the schema up to date
    pub async fn new(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// In-memory database for tests
    pub async fn in_memory() -> DbResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> DbResult<()> {
        // Pragmas first: WAL for concurrent reads, NORMAL sync, FK checks
        for pragma in [
            "PRAGMA journal_mode=WAL",
            "PRAGMA synchronous=NORMAL",
            "PRAGMA foreign_keys=ON",
        ] {
            sqlx::query(pragma)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::Connection(format!("{pragma} failed: {e}")))?;
        }

        for statement in schema::CREATE_TABLES.split(';') {
            let sql = statement.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::Migration(format!("{e}: {sql}")))?;
        }

        for migration in schema::MIGRATIONS {
            if let Err(e) = sqlx::query(migration).execute(&self.pool).await {
                let message = e.to_string();
                if message.contains("duplicate column name") {
                    debug!(migration, "column already present, skipping");
                } else {
                    return Err(DbError::Migration(format!("{e}: {migration}")));
                }
            }
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
