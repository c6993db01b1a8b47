//! Database connection, write transactions, and schema

use rewards_core::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// Database wrapper for SQLite operations
pub struct Database {
    pool: SqlitePool,
    /// SQLite admits one writer at a time; writers queue here instead of
    /// failing with SQLITE_BUSY.
    writer: Mutex<()>,
}

/// An open write transaction holding the writer gate.
///
/// Dropping it without `commit` rolls everything back.
pub struct WriteTx<'a> {
    tx: sqlx::Transaction<'static, Sqlite>,
    _gate: MutexGuard<'a, ()>,
}

impl WriteTx<'_> {
    /// Connection to run statements on inside this transaction
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.tx
    }

    pub async fn commit(self) -> Result<()> {
        let WriteTx { tx, _gate } = self;
        tx.commit()
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))
    }
}

impl Database {
    /// Connect to database at the given path, creating if necessary
    pub async fn connect(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::DatabaseError(e.to_string()))?;
        }

        let path_str = path.to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| Error::DatabaseError(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

        let db = Self::from_pool(pool);
        db.run_migrations().await?;
        Ok(db)
    }

    /// Connect to in-memory database (for testing)
    pub async fn connect_in_memory() -> Result<Self> {
        // One connection that never recycles; the database lives only as long as it does
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

        let db = Self::from_pool(pool);
        db.run_migrations().await?;
        Ok(db)
    }

    fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            writer: Mutex::new(()),
        }
    }

    /// Begin a write transaction, waiting for any other writer to finish
    pub async fn begin_write(&self) -> Result<WriteTx<'_>> {
        let gate = self.writer.lock().await;
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(WriteTx { tx, _gate: gate })
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS accounts (
                user_id INTEGER PRIMARY KEY,
                total_points INTEGER NOT NULL DEFAULT 0,
                total_cashback_cents INTEGER NOT NULL DEFAULT 0,
                total_earnings_cents INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                CHECK (total_points >= 0),
                CHECK (total_cashback_cents >= 0),
                CHECK (total_earnings_cents >= 0)
            );

            CREATE TABLE IF NOT EXISTS wallets (
                user_id INTEGER PRIMARY KEY,
                balance_cents INTEGER NOT NULL DEFAULT 0,
                pending_cents INTEGER NOT NULL DEFAULT 0,
                total_earned_cents INTEGER NOT NULL DEFAULT 0,
                total_withdrawn_cents INTEGER NOT NULL DEFAULT 0,
                minimum_withdrawal_cents INTEGER NOT NULL,
                updated_at TEXT,
                CHECK (balance_cents >= 0),
                CHECK (pending_cents >= 0),
                CHECK (balance_cents >= pending_cents),
                CHECK (total_earned_cents >= 0),
                CHECK (total_withdrawn_cents >= 0)
            );

            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                reference_id TEXT NOT NULL UNIQUE,
                tx_type TEXT NOT NULL CHECK (tx_type IN ('credit', 'debit')),
                kind TEXT NOT NULL,
                amount_cents INTEGER NOT NULL CHECK (amount_cents >= 0),
                points INTEGER NOT NULL DEFAULT 0,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL CHECK (status IN ('pending', 'completed', 'failed')),
                source_id TEXT,
                idempotency_key TEXT,
                created_at TEXT NOT NULL,
                settled_at TEXT,
                CHECK (amount_cents > 0 OR points != 0),
                UNIQUE (user_id, idempotency_key)
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_user
                ON transactions (user_id, id);

            CREATE TABLE IF NOT EXISTS daily_rewards (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                reward_date TEXT NOT NULL,
                points INTEGER NOT NULL,
                cashback_cents INTEGER NOT NULL,
                streak INTEGER NOT NULL,
                claimed_at TEXT NOT NULL,
                UNIQUE (user_id, reward_date)
            );

            CREATE TABLE IF NOT EXISTS streaks (
                user_id INTEGER PRIMARY KEY,
                current_streak INTEGER NOT NULL DEFAULT 0,
                longest_streak INTEGER NOT NULL DEFAULT 0,
                last_claim_date TEXT,
                total_claims INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS source_usage (
                user_id INTEGER NOT NULL,
                source_kind TEXT NOT NULL,
                source_id TEXT NOT NULL,
                used_at TEXT NOT NULL,
                PRIMARY KEY (user_id, source_kind, source_id)
            );

            CREATE TABLE IF NOT EXISTS daily_source_usage (
                user_id INTEGER NOT NULL,
                source_kind TEXT NOT NULL,
                source_id TEXT NOT NULL,
                usage_date TEXT NOT NULL,
                points INTEGER NOT NULL DEFAULT 0,
                cashback_cents INTEGER NOT NULL DEFAULT 0,
                claims INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, source_kind, source_id, usage_date)
            );

            CREATE TABLE IF NOT EXISTS receipt_claims (
                user_id INTEGER NOT NULL,
                receipt_id TEXT NOT NULL,
                store_name TEXT NOT NULL,
                amount_cents INTEGER NOT NULL,
                points INTEGER NOT NULL,
                cashback_cents INTEGER NOT NULL,
                vip_applied INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL CHECK (status IN ('pending', 'approved', 'rejected')),
                reference_id TEXT,
                created_at TEXT NOT NULL,
                reviewed_at TEXT,
                PRIMARY KEY (user_id, receipt_id)
            );

            CREATE TABLE IF NOT EXISTS vip_memberships (
                user_id INTEGER PRIMARY KEY,
                status TEXT NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                multiplier TEXT NOT NULL,
                total_points_earned INTEGER NOT NULL DEFAULT 0,
                total_cashback_cents INTEGER NOT NULL DEFAULT 0,
                rewards_count INTEGER NOT NULL DEFAULT 0,
                last_reward_at TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// True when `err` is a UNIQUE/PRIMARY KEY violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

/// True when `err` is a uniqueness violation naming `column` (e.g. `transactions.reference_id`)
pub fn is_unique_violation_on(err: &sqlx::Error, column: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() && db_err.message().contains(column)
        }
        _ => false,
    }
}
