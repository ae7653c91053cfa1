//! # Status Events
//!
//! What the shell's status bar listens to.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  "sync://status" - { status: "syncing", lastSyncTime: "...",           │
//! │                      detail: null }                                     │
//! │                                                                         │
//! │  status ∈ idle | syncing | online | offline | error                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use ts_rs::TS;

use titan_core::{EntityType, PendingCounts};

// =============================================================================
// Event
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Idle,
    Syncing,
    Online,
    Offline,
    Error,
}

/// A status change published to the shell.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub status: StatusKind,

    /// Finish time of the last completed pass.
    #[ts(as = "Option<String>")]
    pub last_sync_time: Option<DateTime<Utc>>,

    /// Human-readable detail (error message, pass summary).
    pub detail: Option<String>,
}

impl SyncEvent {
    pub fn new(status: StatusKind, last_sync_time: Option<DateTime<Utc>>) -> Self {
        SyncEvent {
            status,
            last_sync_time,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// =============================================================================
// Emitters
// =============================================================================

/// Sink for status events (implemented by the desktop shell).
pub trait SyncEventEmitter: Send + Sync {
    fn emit(&self, event: &SyncEvent);
}

/// Drops every event.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit(&self, _event: &SyncEvent) {}
}

/// Fans events out to any number of in-process listeners.
///
/// Slow listeners lag and lose the oldest events; the emitter never blocks.
pub struct ChannelEmitter {
    tx: broadcast::Sender<SyncEvent>,
}

impl ChannelEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        ChannelEmitter { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

impl SyncEventEmitter for ChannelEmitter {
    fn emit(&self, event: &SyncEvent) {
        // no receivers is fine
        let _ = self.tx.send(event.clone());
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Backlog snapshot for the status surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub pending: BTreeMap<EntityType, PendingCounts>,

    #[ts(as = "Option<String>")]
    pub last_sync: Option<DateTime<Utc>>,

    pub is_online: bool,
}

impl SyncStats {
    /// Records waiting for the next pass, all entity types.
    pub fn total_pending(&self) -> u32 {
        self.pending.values().map(|c| c.pending).sum()
    }

    /// Records parked outside the retry loop, all entity types.
    pub fn total_parked(&self) -> u32 {
        self.pending.values().map(|c| c.failed + c.needs_review).sum()
    }
}
