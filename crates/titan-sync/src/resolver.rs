//! # Conflict Resolution
//!
//! Decides the surviving version when a downloaded record meets a local
//! record with pending changes.
//!
//! ## Strategies
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Conflict Strategies                                │
//! │                                                                         │
//! │  SERVER_WINS (default)   remote body replaces local, record synced     │
//! │                          refused when local was never uploaded         │
//! │                                                                         │
//! │  LOCAL_WINS              local body kept, pushed with update()         │
//! │                                                                         │
//! │  MERGE                   per field: later updated_at wins,             │
//! │                          equal clocks → remote                         │
//! │                          kind clash (string vs number) → unresolved    │
//! │                                                                         │
//! │  TRANSACTIONS            strategy ignored; only a duplicate carrying   │
//! │                          the same local id is resolvable               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use titan_core::{Entity, EntityType, Record, RemoteRecord};

// =============================================================================
// Strategy
// =============================================================================

/// How a product or customer conflict is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    #[default]
    ServerWins,
    LocalWins,
    Merge,
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictStrategy::ServerWins => write!(f, "server_wins"),
            ConflictStrategy::LocalWins => write!(f, "local_wins"),
            ConflictStrategy::Merge => write!(f, "merge"),
        }
    }
}

impl std::str::FromStr for ConflictStrategy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "server_wins" | "server" | "remote" => Ok(ConflictStrategy::ServerWins),
            "local_wins" | "local" | "client" => Ok(ConflictStrategy::LocalWins),
            "merge" => Ok(ConflictStrategy::Merge),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown conflict strategy: '{}'. Valid options: server_wins, local_wins, merge",
                other
            ))),
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Outcome of a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Remote copy replaces local; store as synced.
    ServerWins(Record),

    /// Local body survives; push it with `update()` before marking synced.
    LocalWins(Record),

    /// Field-level merge; push it with `update()` before marking synced.
    Merged(Record),

    /// Local transaction is the record the backend already holds; store the
    /// binding, nothing is uploaded again.
    DuplicateDiscarded(Record),
}

impl Resolution {
    pub fn record(&self) -> &Record {
        match self {
            Resolution::ServerWins(r)
            | Resolution::LocalWins(r)
            | Resolution::Merged(r)
            | Resolution::DuplicateDiscarded(r) => r,
        }
    }

    pub fn into_record(self) -> Record {
        match self {
            Resolution::ServerWins(r)
            | Resolution::LocalWins(r)
            | Resolution::Merged(r)
            | Resolution::DuplicateDiscarded(r) => r,
        }
    }

    /// True when the resolved body still has to reach the backend.
    pub fn needs_push(&self) -> bool {
        matches!(self, Resolution::LocalWins(_) | Resolution::Merged(_))
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Stateless conflict resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        ConflictResolver
    }

    /// Resolves `local` (with pending changes) against `remote`.
    ///
    /// ## Errors
    /// [`SyncError::ConflictUnresolved`] when no deterministic result exists.
    /// The caller parks the record for review.
    pub fn resolve(
        &self,
        entity_type: EntityType,
        local: &Record,
        remote: &RemoteRecord,
        strategy: ConflictStrategy,
    ) -> SyncResult<Resolution> {
        let unresolved = |reason: String| SyncError::unresolved(entity_type, local.local_id(), reason);

        if local.entity_type() != entity_type || remote.entity_type() != entity_type {
            return Err(unresolved(format!(
                "entity type mismatch: local {}, remote {}",
                local.entity_type(),
                remote.entity_type()
            )));
        }

        if let Some(bound) = local.server_id() {
            if bound != remote.server_id {
                return Err(unresolved(format!(
                    "local is bound to {}, remote is {}",
                    bound, remote.server_id
                )));
            }
        }

        if entity_type.is_immutable() {
            return self.resolve_transaction(local, remote).map_err(unresolved);
        }

        debug!(
            %entity_type,
            local_id = %local.local_id(),
            server_id = %remote.server_id,
            %strategy,
            "Resolving conflict"
        );

        match strategy {
            ConflictStrategy::ServerWins => {
                if local.server_id().is_none() {
                    return Err(unresolved(
                        "server-wins would discard a record that was never uploaded".into(),
                    ));
                }
                Ok(Resolution::ServerWins(local.overwritten_by(remote)))
            }

            ConflictStrategy::LocalWins => Ok(Resolution::LocalWins(pending_copy(
                local,
                remote,
                local.entity.clone(),
            ))),

            ConflictStrategy::Merge => {
                let local_fields = local.entity.to_fields()?;
                let remote_fields = remote.entity.to_fields()?;
                let prefer_local = local.meta.updated_at > remote.updated_at;

                let merged = merge_fields(&local_fields, &remote_fields, prefer_local)
                    .map_err(unresolved)?;
                let entity = Entity::from_value(entity_type, Value::Object(merged))
                    .map_err(|e| unresolved(format!("merged record is invalid: {}", e)))?;

                if entity == remote.entity {
                    // nothing of the local edit survived
                    return Ok(Resolution::ServerWins(local.overwritten_by(remote)));
                }
                Ok(Resolution::Merged(pending_copy(local, remote, entity)))
            }
        }
    }

    fn resolve_transaction(&self, local: &Record, remote: &RemoteRecord) -> Result<Resolution, String> {
        match remote.local_id.as_deref() {
            Some(echo) if echo == local.local_id() => {
                Ok(Resolution::DuplicateDiscarded(local.confirmed_by(remote)))
            }
            _ => Err(format!(
                "transactions are immutable; remote {} is not a copy of this sale",
                remote.server_id
            )),
        }
    }
}

/// Local record carrying `entity`, bound to the remote id, still pending.
fn pending_copy(local: &Record, remote: &RemoteRecord, entity: Entity) -> Record {
    let mut record = local.clone();
    record.entity = entity;
    record.meta.server_id = Some(remote.server_id.clone());
    record.meta.synced = false;
    record.meta.updated_at = local.meta.updated_at.max(remote.updated_at);
    record.meta.remote_updated_at = Some(remote.updated_at);
    record
}

/// Field-level merge of two JSON objects.
///
/// Equal fields are kept. A field present on one side only is taken from
/// that side. Differing fields come from the local side when `prefer_local`,
/// otherwise from the remote side. Differing non-null values of different
/// JSON kinds cannot be merged.
pub(crate) fn merge_fields(
    local: &Map<String, Value>,
    remote: &Map<String, Value>,
    prefer_local: bool,
) -> Result<Map<String, Value>, String> {
    let mut merged = remote.clone();

    for (key, local_value) in local {
        let Some(remote_value) = remote.get(key) else {
            merged.insert(key.clone(), local_value.clone());
            continue;
        };

        if local_value == remote_value {
            continue;
        }

        if !local_value.is_null() && !remote_value.is_null() && kind(local_value) != kind(remote_value) {
            return Err(format!(
                "field '{}' is {} locally and {} remotely",
                key,
                kind(local_value),
                kind(remote_value)
            ));
        }

        if prefer_local {
            merged.insert(key.clone(), local_value.clone());
        }
    }

    Ok(merged)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
