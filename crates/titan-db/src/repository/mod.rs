//! # Repository Module
//!
//! Database repository implementations for the sync store.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern Explained                         │
//! │                                                                         │
//! │  The Repository pattern abstracts database access behind a clean API.  │
//! │                                                                         │
//! │  Sync engine (through the LocalStore trait)                            │
//! │       │                                                                 │
//! │       │  db.records().get_unsynced(EntityType::Product)                │
//! │       │  ↓                                                              │
//! │       ▼                                                                 │
//! │  RecordRepository                                                      │
//! │  ├── get / find_by_server_id / get_unsynced                            │
//! │  ├── upsert / save_local_edit                                          │
//! │  ├── mark_synced                                                       │
//! │  └── record_rejection / flag_for_review                                │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Benefits:                                                              │
//! │  • Clean separation of concerns                                        │
//! │  • Easy to test (mock the repository)                                  │
//! │  • SQL is isolated in one place                                        │
//! │  • Can swap database implementations                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`RecordRepository`](records::RecordRepository) - Records and sync metadata
//! - [`CursorRepository`](cursors::CursorRepository) - Download watermarks

pub mod cursors;
pub mod records;
