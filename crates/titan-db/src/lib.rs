//! # titan-db: Local Store for Titan Sync
//!
//! This crate persists records captured at the till together with the sync
//! metadata the engine relies on. It uses SQLite with sqlx for async access.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Titan Sync Data Flow                             │
//! │                                                                         │
//! │  Checkout flow (new sale)          SyncEngine (titan-sync)             │
//! │       │                                 │                               │
//! │       ▼                                 ▼                               │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     titan-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │ (database.rs) │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ RecordRepo    │    │ 001_sync_    │  │   │
//! │  │   │ SqlitePool    │◄───│ CursorRepo    │    │  records.sql │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/com.titan.pos/titan-sync.db                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`database`] - Opening the store and applying embedded migrations
//! - [`error`] - Database error types
//! - [`repository`] - Record and cursor repositories
//!
//! ## Usage
//!
//! ```rust,ignore
//! use titan_db::{Database, DbConfig};
//! use titan_core::EntityType;
//!
//! let db = Database::new(DbConfig::new("path/to/titan-sync.db")).await?;
//!
//! let pending = db.records().get_unsynced(EntityType::Transaction).await?;
//! let watermark = db.cursors().last_pulled_at(EntityType::Product).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod database;
pub mod error;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use database::{Database, DbConfig, Location};

// Repository re-exports for convenience
pub use repository::cursors::CursorRepository;
pub use repository::records::RecordRepository;
