use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// SQLite pool wrapper; owns schema creation.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent() {
                if !parent.exists() && !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .context("failed to create database directory")?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect to SQLite database")?;

        info!("connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// Throwaway in-memory database for tests. A single pooled connection,
    /// otherwise every checkout would see its own empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("failed to open in-memory database")?;
        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS decision_cache (
                symbol TEXT NOT NULL,
                portfolio_hash TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                verdict TEXT NOT NULL,
                score REAL NOT NULL,
                direction TEXT NOT NULL,
                entry_price REAL,
                stop_loss REAL,
                take_profit_1 REAL,
                take_profit_2 REAL,
                risk_reward REAL,
                size_hint TEXT,
                justification TEXT,
                alerts TEXT,
                validity_hours INTEGER,
                PRIMARY KEY (symbol, portfolio_hash, timestamp)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create decision_cache table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_decision_cache_lookup
            ON decision_cache (symbol, portfolio_hash, timestamp DESC);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create decision_cache index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS decision_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                verdict TEXT NOT NULL,
                score REAL NOT NULL,
                direction TEXT NOT NULL,
                entry_price REAL,
                stop_loss REAL,
                take_profit_1 REAL,
                take_profit_2 REAL,
                risk_reward REAL,
                justification TEXT,
                alerts TEXT,
                timestamp INTEGER NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create decision_log table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_decision_log_symbol_time
            ON decision_log (symbol, timestamp DESC);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create decision_log index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                entry_price REAL NOT NULL,
                entry_time INTEGER NOT NULL,
                exit_price REAL,
                exit_time INTEGER,
                quantity INTEGER NOT NULL,
                pnl REAL,
                pnl_percent REAL,
                reason TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create trade_history table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_trade_history_symbol
            ON trade_history (symbol, entry_time DESC);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create trade_history index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS judge_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                origin TEXT NOT NULL,
                prompt TEXT,
                result TEXT NOT NULL,
                score REAL NOT NULL,
                direction TEXT NOT NULL,
                justification TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create judge_audit table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS guardian_state (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create guardian_state table")?;

        info!("database schema initialized");
        Ok(())
    }
}
