//! # Gateway Traits
//!
//! The two seams the engine talks through. Everything behind them is I/O;
//! everything in front of them is deterministic.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   ┌──────────────┐        ┌──────────────┐        ┌──────────────┐     │
//! │   │  LocalStore  │◄───────│  SyncEngine  │───────►│RemoteGateway │     │
//! │   └──────┬───────┘        └──────────────┘        └──────┬───────┘     │
//! │          │                                               │             │
//! │   titan_db::Database                             HttpRemoteGateway     │
//! │   (SQLite, local.rs)                             (reqwest, http.rs)    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Remote Contract
//! `create` must be idempotent on [`UploadPayload::local_id`]: a retried
//! upload of the same local id returns the record created the first time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::SyncResult;
use titan_core::{Entity, EntityType, PendingCounts, Record, RemoteRecord};

// =============================================================================
// Wire Types
// =============================================================================

/// Body of a create or update call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadPayload {
    /// Idempotency key.
    pub local_id: String,

    pub updated_at: DateTime<Utc>,

    pub entity: Entity,

    /// Local id → server id of every record a transaction points at.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub references: BTreeMap<String, String>,
}

impl UploadPayload {
    pub fn from_record(record: &Record) -> Self {
        UploadPayload {
            local_id: record.meta.local_id.clone(),
            updated_at: record.meta.updated_at,
            entity: record.entity.clone(),
            references: BTreeMap::new(),
        }
    }

    pub fn with_references(mut self, references: BTreeMap<String, String>) -> Self {
        self.references = references;
        self
    }
}

/// Download filter; a page is `offset..offset + limit` of the records
/// changed after `updated_since`, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilter {
    pub updated_since: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: usize,
}

impl ListFilter {
    pub fn since(updated_since: Option<DateTime<Utc>>, limit: usize) -> Self {
        ListFilter {
            updated_since,
            offset: 0,
            limit,
        }
    }

    /// Filter for the page after this one.
    pub fn next_page(&self) -> Self {
        ListFilter {
            offset: self.offset + self.limit,
            ..self.clone()
        }
    }
}

// =============================================================================
// Local Store
// =============================================================================

/// Persistence of records and their sync metadata.
///
/// Failures surface as [`SyncError::LocalStoreFailure`](crate::SyncError).
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Unsynced, unflagged records, oldest `updated_at` first.
    async fn get_unsynced(&self, entity_type: EntityType) -> SyncResult<Vec<Record>>;

    async fn get(&self, entity_type: EntityType, local_id: &str) -> SyncResult<Option<Record>>;

    async fn find_by_server_id(
        &self,
        entity_type: EntityType,
        server_id: &str,
    ) -> SyncResult<Option<Record>>;

    /// Inserts or updates. Never rebinds a server id, never clears
    /// `synced`, never rewrites a stored transaction body.
    async fn upsert(&self, entity_type: EntityType, record: &Record) -> SyncResult<()>;

    /// Writes back a reconciled copy of a record read when its
    /// `updated_at` was `seen`. Returns `false` without writing when a local
    /// edit landed in between.
    async fn settle(&self, entity_type: EntityType, record: &Record, seen: DateTime<Utc>)
        -> SyncResult<bool>;

    /// Binds the server id (once) and notes the backend clock of the copy
    /// it was bound from. Body and pending state are left alone.
    async fn bind_remote(
        &self,
        entity_type: EntityType,
        local_id: &str,
        server_id: &str,
        remote_updated_at: DateTime<Utc>,
    ) -> SyncResult<()>;

    /// Sets `synced` and binds the server id (once).
    async fn mark_synced(
        &self,
        entity_type: EntityType,
        local_id: &str,
        server_id: &str,
    ) -> SyncResult<()>;

    /// Counts a rejected upload; `permanent` parks the record.
    async fn record_rejection(
        &self,
        entity_type: EntityType,
        local_id: &str,
        reason: &str,
        permanent: bool,
    ) -> SyncResult<()>;

    /// Parks a record on an unresolved conflict.
    async fn flag_for_review(
        &self,
        entity_type: EntityType,
        local_id: &str,
        reason: &str,
    ) -> SyncResult<()>;

    async fn pending_counts(&self, entity_type: EntityType) -> SyncResult<PendingCounts>;

    /// Download watermark.
    async fn last_pulled_at(&self, entity_type: EntityType) -> SyncResult<Option<DateTime<Utc>>>;

    async fn set_last_pulled_at(&self, entity_type: EntityType, at: DateTime<Utc>) -> SyncResult<()>;
}

// =============================================================================
// Remote Gateway
// =============================================================================

/// Backend access, one endpoint family per entity type.
///
/// ## Error Mapping
/// - unreachable backend or 5xx → `NetworkUnavailable`
/// - exceeded time bound → `Timeout`
/// - validation or business refusal → `RemoteRejected`
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Creates a record; idempotent on `payload.local_id`.
    async fn create(
        &self,
        entity_type: EntityType,
        payload: &UploadPayload,
    ) -> SyncResult<RemoteRecord>;

    /// Overwrites the backend copy of an already bound record.
    async fn update(
        &self,
        entity_type: EntityType,
        server_id: &str,
        payload: &UploadPayload,
    ) -> SyncResult<RemoteRecord>;

    async fn list(&self, entity_type: EntityType, filter: &ListFilter) -> SyncResult<Vec<RemoteRecord>>;

    /// Reachability probe. Never fails; unreachable is `false`.
    async fn health_check(&self) -> bool;
}
