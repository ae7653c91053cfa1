//! # Error Types
//!
//! Domain-specific error types for titan-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  titan-core errors (this file)                                         │
//! │  └── CoreError        - Payload decoding and entity mismatches         │
//! │                                                                         │
//! │  titan-db errors (separate crate)                                      │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  titan-sync errors (separate crate)                                    │
//! │  └── SyncError        - Network, rejection, store, conflict failures   │
//! │                                                                         │
//! │  Flow: CoreError → DbError → SyncError → SyncReport / status event     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Core domain errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// An entity type name that is not one of product/customer/transaction.
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    /// A payload was decoded against the wrong entity type.
    ///
    /// ## When This Occurs
    /// - A remote record listed under `customer` carries a product body
    /// - A stored row's `entity_type` column disagrees with its payload
    #[error("Entity type mismatch: expected {expected}, got {actual}")]
    EntityMismatch { expected: String, actual: String },

    /// The JSON payload could not be decoded into the entity.
    #[error("Invalid {entity_type} payload: {message}")]
    InvalidPayload {
        entity_type: String,
        message: String,
    },
}

impl CoreError {
    /// Creates an InvalidPayload error.
    pub fn invalid_payload(entity_type: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::InvalidPayload {
            entity_type: entity_type.into(),
            message: message.into(),
        }
    }
}
