//! # titan-sync: Sync Engine for Titan POS
//!
//! Offline-first synchronization between the till's local store and the
//! backend. Sales, products and customers are captured locally without a
//! network; this crate pushes them up and pulls remote changes down whenever
//! the backend is reachable.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Agent Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      SyncAgent (Main Orchestrator)               │  │
//! │  │                                                                  │  │
//! │  │  Spawned as Tokio tasks in the desktop shell setup               │  │
//! │  │  force_sync / sync_stats / network signals                       │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Connectivity   │  │ SyncScheduler  │  │ SyncEngine             │    │
//! │  │ Monitor        │  │                │  │                        │    │
//! │  │ health probes, │  │ interval and   │  │ upload → download →    │    │
//! │  │ backoff        │  │ reconnect      │  │ ConflictResolver       │    │
//! │  └───────┬────────┘  └────────────────┘  └───────┬───────┬────────┘    │
//! │          │                                       │       │             │
//! │          ▼                                       ▼       ▼             │
//! │  ┌──────────────────────────────┐   ┌─────────────┐ ┌──────────────┐  │
//! │  │ RemoteGateway (http.rs)      │◄──│             │ │ LocalStore   │  │
//! │  │ reqwest, idempotent create   │   └─────────────┘ │ (titan-db)   │  │
//! │  └──────────────────────────────┘                   └──────────────┘  │
//! │                                                                         │
//! │  STATUS EVENTS (to Frontend):                                          │
//! │  • "sync://status" - idle | syncing | online | offline | error         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - Main `SyncAgent` orchestrator, handle and builder
//! - [`engine`] - Sync passes and their reports
//! - [`scheduler`] - When passes run
//! - [`connectivity`] - Backend reachability
//! - [`resolver`] - Conflict strategies
//! - [`gateway`] - `LocalStore` and `RemoteGateway` seams
//! - [`http`] - REST implementation of `RemoteGateway`
//! - [`local`] - SQLite implementation of `LocalStore`
//! - [`events`] - Status events and stats
//! - [`config`] - Sync configuration (device ID, API URL, timing)
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use titan_sync::{SyncAgentBuilder, SyncConfig};
//! use titan_db::{Database, DbConfig};
//!
//! let config = SyncConfig::load_or_default(None);
//! let db = Arc::new(Database::new(DbConfig::new("titan.db")).await?);
//!
//! let mut agent = SyncAgentBuilder::new(config).with_database(db).build()?;
//! agent.start().await?;
//!
//! let stats = agent.sync_stats().await?;
//! println!("Pending: {}", stats.total_pending());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod events;
pub mod gateway;
pub mod http;
pub mod local;
pub mod resolver;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testkit;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{SyncAgent, SyncAgentBuilder, SyncAgentHandle};
pub use config::{ApiSettings, ConflictSettings, DeviceConfig, SyncConfig, SyncSettings};
pub use connectivity::{ConnectivityMonitor, ConnectivityState, NetworkSignal, ProbeSettings};
pub use engine::{
    EngineOptions, EntitySyncResult, SessionStatus, SyncAttempt, SyncEngine, SyncReport,
    SyncSession,
};
pub use error::{SyncError, SyncResult};
pub use events::{ChannelEmitter, NoOpEmitter, StatusKind, SyncEvent, SyncEventEmitter, SyncStats};
pub use gateway::{ListFilter, LocalStore, RemoteGateway, UploadPayload};
pub use http::HttpRemoteGateway;
pub use resolver::{ConflictResolver, ConflictStrategy, Resolution};
pub use scheduler::{SchedulerSettings, SchedulerState, SyncScheduler};
