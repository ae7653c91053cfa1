//! # Database Handle
//!
//! Opens the till's SQLite file, brings its schema up to date and hands out
//! repositories.
//!
//! ```text
//!   DbConfig::new(path) | DbConfig::in_memory()
//!            │
//!            ▼
//!   Database::new ──► open pool ──► MIGRATOR.run ──► records() / cursors()
//! ```
//!
//! The checkout flow and the sync engine write to the same file. A file
//! database uses the WAL journal so engine reads never wait on a checkout,
//! and `busy_timeout` covers the moments when both write at once.

use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::cursors::CursorRepository;
use crate::repository::records::RecordRepository;

/// Schema shipped with the binary, `migrations/sqlite` at the workspace root.
static MIGRATOR: Migrator = sqlx::migrate!("../../migrations/sqlite");

// =============================================================================
// Configuration
// =============================================================================

/// Where the store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    File(PathBuf),

    /// Private to one handle and gone when it is dropped.
    Memory,
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub location: Location,

    /// A till has one writer per flow, so a handful is plenty.
    pub max_connections: u32,

    /// How long a writer waits for the file lock before failing.
    pub busy_timeout: Duration,
}

impl DbConfig {
    /// File store, created on first open.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            location: Location::File(path.into()),
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Throwaway store for tests and demos.
    pub fn in_memory() -> Self {
        DbConfig {
            location: Location::Memory,
            // every connection would otherwise see its own empty database
            max_connections: 1,
            busy_timeout: Duration::from_secs(5),
        }
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let options = match &self.location {
            Location::Memory => SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?,
            Location::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal),
        };
        Ok(options.busy_timeout(self.busy_timeout))
    }
}

// =============================================================================
// Database
// =============================================================================

/// Shared handle to the local store. Clones share one pool.
///
/// ```rust,ignore
/// let db = Database::new(DbConfig::new("./titan-sync.db")).await?;
/// let pending = db.records().get_unsynced(EntityType::Product).await?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the store and applies any migrations the file has not seen.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(location = ?config.location, "Opening local store");

        let mut pool_options = SqlitePoolOptions::new().max_connections(config.max_connections);
        if config.location == Location::Memory {
            // dropping the last connection drops the data
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(config.connect_options()?)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        MIGRATOR.run(&pool).await?;
        debug!(migrations = MIGRATOR.migrations.len(), "Schema up to date");

        Ok(Database { pool })
    }

    pub fn records(&self) -> RecordRepository {
        RecordRepository::new(self.pool.clone())
    }

    pub fn cursors(&self) -> CursorRepository {
        CursorRepository::new(self.pool.clone())
    }
}
