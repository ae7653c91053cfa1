//! # titan-core: Pure Domain Types for Titan Sync
//!
//! This crate holds the records that the point-of-sale client captures while
//! offline, together with the sync metadata the engine needs to reconcile
//! them with the backend. It has zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Titan Sync Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Desktop shell / checkout flow (external)           │   │
//! │  │     creates Products, Customers, Transactions; shows status     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ titan-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                  │   │
//! │  │   │   types   │  │  record   │  │   error   │                  │   │
//! │  │   │  Product  │  │ SyncMeta  │  │ CoreError │                  │   │
//! │  │   │ Customer  │  │  Record   │  │           │                  │   │
//! │  │   │   Txn     │  │ RemoteRec │  │           │                  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘                  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │            ┌───────────────────┴───────────────────┐                    │
//! │  ┌─────────▼─────────┐                   ┌─────────▼─────────┐          │
//! │  │     titan-db      │                   │    titan-sync     │          │
//! │  │  SQLite store     │◄──────────────────│  sync engine      │          │
//! │  └───────────────────┘                   └───────────────────┘          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain entities (Product, Customer, Transaction)
//! - [`record`] - Sync metadata and the record envelopes the engine moves
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use titan_core::{Entity, Product, Record};
//!
//! let product = Product::new("Widget", 999);
//! let record = Record::new_local(Entity::Product(product));
//!
//! assert!(!record.meta.synced);
//! assert!(record.meta.server_id.is_none());
//! assert!(record.is_pending());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod record;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult};
pub use record::{PendingCounts, Record, RecordFlag, RemoteRecord, SyncMeta};
pub use types::*;
