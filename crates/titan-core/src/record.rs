//! # Sync Records
//!
//! Envelopes that pair a domain [`Entity`] with the metadata the sync engine
//! needs.
//!
//! ## Identity
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Dual-Key Identity                                 │
//! │                                                                         │
//! │  local_id   UUID v4 assigned on the till, never reused.                 │
//! │             Sent as the idempotency key of every upload.               │
//! │                                                                         │
//! │  server_id  Assigned by the backend on first successful upload.        │
//! │             Bound to exactly one local_id, then immutable.             │
//! │                                                                         │
//! │  synced     false ──► true only. The engine never reverts it.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::types::{Entity, EntityType};

// =============================================================================
// Record Flag
// =============================================================================

/// Why a record is parked outside the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum RecordFlag {
    /// Eligible for upload on every pass.
    #[default]
    Clear,

    /// Rejected by the backend too many times; surfaced to the user.
    PermanentlyFailed,

    /// A conflict could not be resolved deterministically.
    NeedsReview,
}

impl RecordFlag {
    pub fn is_clear(&self) -> bool {
        matches!(self, RecordFlag::Clear)
    }
}

// =============================================================================
// Sync Metadata
// =============================================================================

/// Per-record sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Stable client-assigned identifier.
    pub local_id: String,

    /// Backend identifier, empty until first successful upload.
    pub server_id: Option<String>,

    pub synced: bool,

    /// Logical clock used by conflict resolution.
    pub updated_at: DateTime<Utc>,

    /// Number of rejected upload attempts.
    #[serde(default)]
    pub attempts: u32,

    #[serde(default)]
    pub last_error: Option<String>,

    #[serde(default)]
    pub flag: RecordFlag,

    /// Backend clock of the version this record was last reconciled with.
    /// A remote copy no newer than this is not a conflict.
    #[serde(default)]
    pub remote_updated_at: Option<DateTime<Utc>>,
}

impl SyncMeta {
    /// Metadata for a record just created on this device.
    pub fn new_local() -> Self {
        SyncMeta {
            local_id: Uuid::new_v4().to_string(),
            server_id: None,
            synced: false,
            updated_at: Utc::now(),
            attempts: 0,
            last_error: None,
            flag: RecordFlag::Clear,
            remote_updated_at: None,
        }
    }
}

// =============================================================================
// Pending Counts
// =============================================================================

/// Backlog of one entity type, as shown in the status bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PendingCounts {
    /// Waiting for the next pass.
    pub pending: u32,

    /// Parked after repeated rejections.
    pub failed: u32,

    /// Parked on an unresolved conflict.
    pub needs_review: u32,
}

impl PendingCounts {
    /// Every record not yet confirmed by the backend.
    pub fn total(&self) -> u32 {
        self.pending + self.failed + self.needs_review
    }
}

// =============================================================================
// Record
// =============================================================================

/// A locally stored entity plus its sync metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub meta: SyncMeta,
    pub entity: Entity,
}

impl Record {
    /// Wraps a freshly captured entity with a new local id.
    pub fn new_local(entity: Entity) -> Self {
        Record {
            meta: SyncMeta::new_local(),
            entity,
        }
    }

    /// Same as [`Record::new_local`] with a caller-chosen local id.
    pub fn with_local_id(local_id: impl Into<String>, entity: Entity) -> Self {
        let mut record = Self::new_local(entity);
        record.meta.local_id = local_id.into();
        record
    }

    /// Builds the local copy of a record first seen on the backend.
    ///
    /// Remote records carry the local id they were created with; ones created
    /// by other channels get a fresh local id.
    pub fn from_remote(remote: &RemoteRecord) -> Self {
        Record {
            meta: SyncMeta {
                local_id: remote
                    .local_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                server_id: Some(remote.server_id.clone()),
                synced: true,
                updated_at: remote.updated_at,
                attempts: 0,
                last_error: None,
                flag: RecordFlag::Clear,
                remote_updated_at: Some(remote.updated_at),
            },
            entity: remote.entity.clone(),
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity.entity_type()
    }

    pub fn local_id(&self) -> &str {
        &self.meta.local_id
    }

    pub fn server_id(&self) -> Option<&str> {
        self.meta.server_id.as_deref()
    }

    /// Unsynced and not parked by a flag.
    pub fn is_pending(&self) -> bool {
        !self.meta.synced && self.meta.flag.is_clear()
    }

    /// Returns a synced copy carrying the remote body and clock, keeping this
    /// record's local id.
    pub fn overwritten_by(&self, remote: &RemoteRecord) -> Self {
        Record {
            meta: SyncMeta {
                local_id: self.meta.local_id.clone(),
                server_id: Some(remote.server_id.clone()),
                synced: true,
                updated_at: remote.updated_at,
                attempts: 0,
                last_error: None,
                flag: RecordFlag::Clear,
                remote_updated_at: Some(remote.updated_at),
            },
            entity: remote.entity.clone(),
        }
    }

    /// Returns a synced copy that keeps this body, bound to the backend copy
    /// that confirmed it.
    pub fn confirmed_by(&self, remote: &RemoteRecord) -> Self {
        let mut record = self.clone();
        record.meta.server_id = Some(remote.server_id.clone());
        record.meta.synced = true;
        record.meta.attempts = 0;
        record.meta.last_error = None;
        record.meta.flag = RecordFlag::Clear;
        record.meta.remote_updated_at = Some(remote.updated_at);
        record
    }
}

// =============================================================================
// Remote Record
// =============================================================================

/// A record as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub server_id: String,

    /// Idempotency key the record was created with, echoed by the backend.
    #[serde(default)]
    pub local_id: Option<String>,

    pub updated_at: DateTime<Utc>,

    pub entity: Entity,
}

impl RemoteRecord {
    pub fn entity_type(&self) -> EntityType {
        self.entity.entity_type()
    }
}
