pub mod ledger;
pub mod polls;

pub use ledger::VoteLedger;
pub use polls::PollStore;

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};

use crate::error::PollError;

/// Handle to the poll database.
///
/// All polls live in one SQLite file, and SQLite allows one writer per file. Write
/// transactions for *different* polls are therefore still serialized here, below the
/// per-poll locks; a writer waits at most the lock timeout for the file lock and then
/// fails with [`PollError::Busy`].
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// `lock_timeout` bounds both the wait for SQLite's file lock and the wait for a
    /// free pooled connection.
    pub async fn new(
        db_url: &str,
        max_connections: u32,
        lock_timeout: Duration,
    ) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(lock_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(lock_timeout)
            .connect_with(options)
            .await?;

        Self::init_schema(&pool).await?;
        info!("Opened poll database at {}", db_url);

        Ok(Self { pool })
    }

    /// A private in-memory database. The pool is pinned to one connection that never
    /// expires, since every SQLite `:memory:` connection is its own database.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Starts a transaction that holds SQLite's write lock from its first statement,
    /// so a read-check-write sequence never fails on lock upgrade.
    ///
    /// The lock covers the whole file: while one of these is open, writers to every
    /// other poll wait here too.
    pub async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin_with("BEGIN IMMEDIATE").await
    }

    /// A deferred transaction, used to read a poll and its options from one snapshot.
    pub async fn begin_read(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS polls (
                id TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                allow_anonymous BOOLEAN NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS polls_created_at ON polls (created_at);")
            .execute(pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poll_options (
                poll_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                text TEXT NOT NULL,
                votes INTEGER NOT NULL DEFAULT 0 CHECK (votes >= 0),
                PRIMARY KEY (poll_id, position),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vote_ledger (
                poll_id TEXT NOT NULL,
                voter_id TEXT NOT NULL,
                option_index INTEGER NOT NULL CHECK (option_index >= 0),
                voted_at TEXT NOT NULL,
                PRIMARY KEY (poll_id, voter_id),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

/// Fixed-width UTC form, so that ordering by the stored text is chronological.
pub(crate) fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, PollError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PollError::corrupted(format!("unreadable timestamp {:?}: {}", raw, e)))
}
