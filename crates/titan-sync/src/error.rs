//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Network      │  │      Remote             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Network-       │  │  RemoteRejected         │ │
//! │  │  MissingDeviceId│  │   Unavailable   │  │  (validation/business)  │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Local        │  │    Conflict     │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  LocalStore-    │  │  Conflict-      │  │  ShuttingDown           │ │
//! │  │   Failure       │  │   Unresolved    │  │  Internal               │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Where Errors End Up
//! Entity-level failures are captured into the [`SyncReport`](crate::SyncReport)
//! of a pass. Only configuration problems reach the caller of `sync_all()`.

use serde::Serialize;
use thiserror::Error;
use titan_core::EntityType;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
///
/// Cloneable so a pass can store the failure of each entity type in its
/// report and still publish it on the status surface.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Missing device ID (required for sync).
    #[error("Device ID not configured. Run initial setup first.")]
    MissingDeviceId,

    /// Invalid backend URL.
    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Network Errors
    // =========================================================================
    /// The backend could not be reached.
    ///
    /// ## When This Occurs
    /// - DNS, connect or TLS failure
    /// - Backend answered 5xx (treated as unavailable, not as a rejection)
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// A gateway call exceeded its time bound.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// The backend refused a specific record.
    ///
    /// The record stays unsynced and is retried until the rejection
    /// threshold parks it as permanently failed.
    #[error("Backend rejected {entity_type}: {reason}")]
    RemoteRejected {
        entity_type: EntityType,
        reason: String,
    },

    // =========================================================================
    // Local Errors
    // =========================================================================
    /// Persistence layer failed; fatal to the current entity pass only.
    #[error("Local store failure: {0}")]
    LocalStoreFailure(String),

    // =========================================================================
    // Conflict Errors
    // =========================================================================
    /// The resolver could not produce a deterministic result.
    #[error("Unresolved conflict on {entity_type} {local_id}: {reason}")]
    ConflictUnresolved {
        entity_type: EntityType,
        local_id: String,
        reason: String,
    },

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Failed to serialize a payload.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to decode a backend response.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal sync agent error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Agent is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<titan_db::DbError> for SyncError {
    fn from(err: titan_db::DbError) -> Self {
        SyncError::LocalStoreFailure(err.to_string())
    }
}

impl From<titan_core::CoreError> for SyncError {
    fn from(err: titan_core::CoreError) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Constructors and Categorization
// =============================================================================

impl SyncError {
    /// Creates a RemoteRejected error.
    pub fn rejected(entity_type: EntityType, reason: impl Into<String>) -> Self {
        SyncError::RemoteRejected {
            entity_type,
            reason: reason.into(),
        }
    }

    /// Creates a ConflictUnresolved error.
    pub fn unresolved(
        entity_type: EntityType,
        local_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        SyncError::ConflictUnresolved {
            entity_type,
            local_id: local_id.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error means the backend is unreachable.
    ///
    /// A pass that ends with such an error flips the monitor offline.
    pub fn is_network(&self) -> bool {
        matches!(self, SyncError::NetworkUnavailable(_))
    }
}
