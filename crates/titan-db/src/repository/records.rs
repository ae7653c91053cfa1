//! # Sync Record Repository
//!
//! Stores every synchronized record together with its sync metadata.
//!
//! ## Write Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Who Writes What                                      │
//! │                                                                         │
//! │  CHECKOUT FLOW (outside the engine)                                    │
//! │       │                                                                 │
//! │       ├── upsert(new record)        synced = false, no server id       │
//! │       └── save_local_edit(record)   product/customer edit → pending    │
//! │                                                                         │
//! │  SYNC ENGINE                                                           │
//! │       │                                                                 │
//! │       ├── get_unsynced(type)        pending work, oldest first         │
//! │       ├── settle(record, seen)      write back unless edited since     │
//! │       ├── bind_remote(id, server)   binding only, record stays pending │
//! │       ├── mark_synced(id, server)   bind server id, synced = true      │
//! │       ├── upsert(remote copy)       download path                      │
//! │       ├── record_rejection(...)     attempts += 1, maybe park          │
//! │       └── flag_for_review(...)      unresolved conflict → park         │
//! │                                                                         │
//! │  INVARIANTS ENFORCED HERE                                              │
//! │  • server_id is bound once; a different value is refused               │
//! │  • upsert never turns synced back to false                             │
//! │  • transaction bodies are never rewritten                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use titan_core::{Entity, EntityType, PendingCounts, Record, RecordFlag, SyncMeta};

const RECORD_COLUMNS: &str = r#"
    entity_type, local_id, server_id, synced, updated_at,
    attempts, last_error, flag, payload, remote_updated_at
"#;

/// Raw row of `sync_records`.
#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    entity_type: EntityType,
    local_id: String,
    server_id: Option<String>,
    synced: bool,
    updated_at: DateTime<Utc>,
    attempts: i64,
    last_error: Option<String>,
    flag: RecordFlag,
    payload: String,
    remote_updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<RecordRow> for Record {
    type Error = DbError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let entity = Entity::from_json(row.entity_type, &row.payload)?;
        Ok(Record {
            meta: SyncMeta {
                local_id: row.local_id,
                server_id: row.server_id,
                synced: row.synced,
                updated_at: row.updated_at,
                attempts: u32::try_from(row.attempts).unwrap_or(u32::MAX),
                last_error: row.last_error,
                flag: row.flag,
                remote_updated_at: row.remote_updated_at,
            },
            entity,
        })
    }
}

/// Repository for `sync_records`.
#[derive(Debug, Clone)]
pub struct RecordRepository {
    pool: SqlitePool,
}

impl RecordRepository {
    /// Creates a new RecordRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RecordRepository { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets a record by its local id.
    pub async fn get(&self, entity_type: EntityType, local_id: &str) -> DbResult<Option<Record>> {
        let sql = format!(
            "SELECT {} FROM sync_records WHERE entity_type = ?1 AND local_id = ?2",
            RECORD_COLUMNS
        );
        let row: Option<RecordRow> = sqlx::query_as(&sql)
            .bind(entity_type)
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Record::try_from).transpose()
    }

    /// Gets the record bound to a server id.
    pub async fn find_by_server_id(
        &self,
        entity_type: EntityType,
        server_id: &str,
    ) -> DbResult<Option<Record>> {
        let sql = format!(
            "SELECT {} FROM sync_records WHERE entity_type = ?1 AND server_id = ?2",
            RECORD_COLUMNS
        );
        let row: Option<RecordRow> = sqlx::query_as(&sql)
            .bind(entity_type)
            .bind(server_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Record::try_from).transpose()
    }

    /// Gets records awaiting upload.
    ///
    /// ## Returns
    /// Unsynced records with a clear flag, ordered by `updated_at` (oldest
    /// first). Parked records are excluded.
    pub async fn get_unsynced(&self, entity_type: EntityType) -> DbResult<Vec<Record>> {
        let sql = format!(
            r#"
            SELECT {} FROM sync_records
            WHERE entity_type = ?1 AND synced = 0 AND flag = ?2
            ORDER BY updated_at ASC, local_id ASC
            "#,
            RECORD_COLUMNS
        );
        let rows: Vec<RecordRow> = sqlx::query_as(&sql)
            .bind(entity_type)
            .bind(RecordFlag::Clear)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Record::try_from).collect()
    }

    /// Lists every record of a type, in local id order.
    pub async fn list(&self, entity_type: EntityType) -> DbResult<Vec<Record>> {
        let sql = format!(
            "SELECT {} FROM sync_records WHERE entity_type = ?1 ORDER BY local_id ASC",
            RECORD_COLUMNS
        );
        let rows: Vec<RecordRow> = sqlx::query_as(&sql)
            .bind(entity_type)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Record::try_from).collect()
    }

    /// Counts the backlog of one entity type.
    pub async fn pending_counts(&self, entity_type: EntityType) -> DbResult<PendingCounts> {
        let (pending, failed, needs_review): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN synced = 0 AND flag = 'clear' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN flag = 'permanently_failed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN flag = 'needs_review' THEN 1 ELSE 0 END), 0)
            FROM sync_records
            WHERE entity_type = ?1
            "#,
        )
        .bind(entity_type)
        .fetch_one(&self.pool)
        .await?;

        let clamp = |n: i64| u32::try_from(n).unwrap_or(u32::MAX);
        Ok(PendingCounts {
            pending: clamp(pending),
            failed: clamp(failed),
            needs_review: clamp(needs_review),
        })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Inserts or updates a record.
    ///
    /// ## Merge Rules
    /// - `server_id`: kept once bound; a different non-empty value fails
    ///   with [`DbError::ServerIdConflict`]
    /// - `synced`: logical OR of stored and incoming value
    /// - transactions: only sync metadata is written, the body is kept
    pub async fn upsert(&self, record: &Record) -> DbResult<()> {
        let entity_type = record.entity_type();
        let mut tx = self.pool.begin().await?;

        let Some(existing) = fetch_row(&mut tx, entity_type, record.local_id()).await? else {
            insert_row(&mut tx, record).await?;
            tx.commit().await?;
            debug!(%entity_type, local_id = %record.local_id(), "Inserted record");
            return Ok(());
        };

        let server_id = bind_once(&existing, record.local_id(), record.server_id())?;
        let synced = existing.synced || record.meta.synced;
        let remote_updated_at = existing.remote_updated_at.max(record.meta.remote_updated_at);

        write_row(&mut tx, record, server_id, synced, remote_updated_at).await?;
        tx.commit().await?;
        debug!(%entity_type, local_id = %record.local_id(), synced, "Updated record");
        Ok(())
    }

    /// Writes back a record the engine reconciled from a copy read at
    /// `seen` (its `updated_at` then).
    ///
    /// Returns `false` and writes nothing when the stored row was edited in
    /// the meantime; the newer edit stays pending. Binding rules are those of
    /// [`RecordRepository::upsert`], except that `synced` is taken as given.
    pub async fn settle(&self, record: &Record, seen: DateTime<Utc>) -> DbResult<bool> {
        let entity_type = record.entity_type();
        let mut tx = self.pool.begin().await?;

        let existing = fetch_row(&mut tx, entity_type, record.local_id())
            .await?
            .ok_or_else(|| DbError::not_found(entity_type.to_string(), record.local_id()))?;

        if existing.updated_at != seen {
            debug!(%entity_type, local_id = %record.local_id(), "Edited during sync, write-back skipped");
            return Ok(false);
        }

        let server_id = bind_once(&existing, record.local_id(), record.server_id())?;
        let remote_updated_at = existing.remote_updated_at.max(record.meta.remote_updated_at);

        write_row(&mut tx, record, server_id, record.meta.synced, remote_updated_at).await?;
        tx.commit().await?;
        debug!(%entity_type, local_id = %record.local_id(), synced = record.meta.synced, "Settled record");
        Ok(true)
    }

    /// Binds a server id and notes the backend version it was seen at,
    /// leaving body and pending state alone.
    pub async fn bind_remote(
        &self,
        entity_type: EntityType,
        local_id: &str,
        server_id: &str,
        remote_updated_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let existing = fetch_row(&mut tx, entity_type, local_id)
            .await?
            .ok_or_else(|| DbError::not_found(entity_type.to_string(), local_id))?;
        let server_id = bind_once(&existing, local_id, Some(server_id))?;
        let remote_updated_at = existing.remote_updated_at.max(Some(remote_updated_at));

        sqlx::query(
            r#"
            UPDATE sync_records SET
                server_id = ?3,
                remote_updated_at = ?4
            WHERE entity_type = ?1 AND local_id = ?2
            "#,
        )
        .bind(entity_type)
        .bind(local_id)
        .bind(server_id)
        .bind(remote_updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Stores a local business edit of a product or customer.
    ///
    /// The new body becomes the pending version: `synced` is cleared, the
    /// clock is bumped and any parking flag is lifted. The server binding is
    /// kept so the next pass pushes the edit as an update.
    pub async fn save_local_edit(&self, record: &Record) -> DbResult<()> {
        let entity_type = record.entity_type();
        let mut tx = self.pool.begin().await?;

        let Some(existing) = fetch_row(&mut tx, entity_type, record.local_id()).await? else {
            let mut fresh = record.clone();
            fresh.meta.synced = false;
            insert_row(&mut tx, &fresh).await?;
            tx.commit().await?;
            return Ok(());
        };

        if entity_type.is_immutable() {
            return Err(DbError::Immutable {
                entity_type: entity_type.to_string(),
                local_id: existing.local_id,
            });
        }

        let payload = record.entity.to_json()?;
        sqlx::query(
            r#"
            UPDATE sync_records SET
                synced = 0,
                updated_at = ?3,
                attempts = 0,
                last_error = NULL,
                flag = ?4,
                payload = ?5
            WHERE entity_type = ?1 AND local_id = ?2
            "#,
        )
        .bind(entity_type)
        .bind(record.local_id())
        .bind(next_clock(existing.updated_at, record.meta.updated_at))
        .bind(RecordFlag::Clear)
        .bind(payload)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(%entity_type, local_id = %record.local_id(), "Saved local edit");
        Ok(())
    }

    /// Binds the server id and marks the record synced.
    ///
    /// Marking again with the same server id is a no-op; a different one
    /// fails with [`DbError::ServerIdConflict`].
    pub async fn mark_synced(
        &self,
        entity_type: EntityType,
        local_id: &str,
        server_id: &str,
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let existing = fetch_row(&mut tx, entity_type, local_id)
            .await?
            .ok_or_else(|| DbError::not_found(entity_type.to_string(), local_id))?;

        bind_once(&existing, local_id, Some(server_id))?;

        sqlx::query(
            r#"
            UPDATE sync_records SET
                server_id = ?3,
                synced = 1,
                last_error = NULL,
                flag = ?4
            WHERE entity_type = ?1 AND local_id = ?2
            "#,
        )
        .bind(entity_type)
        .bind(local_id)
        .bind(server_id)
        .bind(RecordFlag::Clear)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(%entity_type, %local_id, %server_id, "Marked synced");
        Ok(())
    }

    /// Records a backend rejection of an upload.
    ///
    /// ## Arguments
    /// * `permanent` - park the record as permanently failed
    pub async fn record_rejection(
        &self,
        entity_type: EntityType,
        local_id: &str,
        error: &str,
        permanent: bool,
    ) -> DbResult<()> {
        let flag = if permanent {
            RecordFlag::PermanentlyFailed
        } else {
            RecordFlag::Clear
        };

        let result = sqlx::query(
            r#"
            UPDATE sync_records SET
                attempts = attempts + 1,
                last_error = ?3,
                flag = ?4
            WHERE entity_type = ?1 AND local_id = ?2 AND synced = 0
            "#,
        )
        .bind(entity_type)
        .bind(local_id)
        .bind(error)
        .bind(flag)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(entity_type.to_string(), local_id));
        }
        Ok(())
    }

    /// Parks an unsynced record until a person reviews it.
    pub async fn flag_for_review(
        &self,
        entity_type: EntityType,
        local_id: &str,
        reason: &str,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_records SET
                last_error = ?3,
                flag = ?4
            WHERE entity_type = ?1 AND local_id = ?2 AND synced = 0
            "#,
        )
        .bind(entity_type)
        .bind(local_id)
        .bind(reason)
        .bind(RecordFlag::NeedsReview)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(entity_type.to_string(), local_id));
        }
        Ok(())
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

async fn fetch_row(
    tx: &mut Transaction<'_, Sqlite>,
    entity_type: EntityType,
    local_id: &str,
) -> DbResult<Option<RecordRow>> {
    let sql = format!(
        "SELECT {} FROM sync_records WHERE entity_type = ?1 AND local_id = ?2",
        RECORD_COLUMNS
    );
    let row = sqlx::query_as(&sql)
        .bind(entity_type)
        .bind(local_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row)
}

/// Keeps a bound server id; a different incoming one is refused.
fn bind_once(existing: &RecordRow, local_id: &str, incoming: Option<&str>) -> DbResult<Option<String>> {
    match (existing.server_id.as_deref(), incoming) {
        (Some(bound), Some(incoming)) if bound != incoming => {
            warn!(
                entity_type = %existing.entity_type,
                %local_id,
                %bound,
                %incoming,
                "Refusing to rebind server id"
            );
            Err(DbError::server_id_conflict(local_id, bound, incoming))
        }
        (Some(bound), _) => Ok(Some(bound.to_string())),
        (None, incoming) => Ok(incoming.map(str::to_string)),
    }
}

/// Clock for a local edit: now, but always past the stored clock so an
/// in-flight write-back can tell the row changed.
fn next_clock(stored: DateTime<Utc>, incoming: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now()
        .max(incoming)
        .max(stored + chrono::Duration::microseconds(1))
}

async fn write_row(
    tx: &mut Transaction<'_, Sqlite>,
    record: &Record,
    server_id: Option<String>,
    synced: bool,
    remote_updated_at: Option<DateTime<Utc>>,
) -> DbResult<()> {
    let entity_type = record.entity_type();

    if entity_type.is_immutable() {
        sqlx::query(
            r#"
            UPDATE sync_records SET
                server_id = ?3,
                synced = ?4,
                attempts = ?5,
                last_error = ?6,
                flag = ?7,
                remote_updated_at = ?8
            WHERE entity_type = ?1 AND local_id = ?2
            "#,
        )
        .bind(entity_type)
        .bind(record.local_id())
        .bind(server_id)
        .bind(synced)
        .bind(i64::from(record.meta.attempts))
        .bind(record.meta.last_error.as_deref())
        .bind(record.meta.flag)
        .bind(remote_updated_at)
        .execute(&mut **tx)
        .await?;
        return Ok(());
    }

    let payload = record.entity.to_json()?;
    sqlx::query(
        r#"
        UPDATE sync_records SET
            server_id = ?3,
            synced = ?4,
            updated_at = ?5,
            attempts = ?6,
            last_error = ?7,
            flag = ?8,
            payload = ?9,
            remote_updated_at = ?10
        WHERE entity_type = ?1 AND local_id = ?2
        "#,
    )
    .bind(entity_type)
    .bind(record.local_id())
    .bind(server_id)
    .bind(synced)
    .bind(record.meta.updated_at)
    .bind(i64::from(record.meta.attempts))
    .bind(record.meta.last_error.as_deref())
    .bind(record.meta.flag)
    .bind(payload)
    .bind(remote_updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_row(tx: &mut Transaction<'_, Sqlite>, record: &Record) -> DbResult<()> {
    let payload = record.entity.to_json()?;
    sqlx::query(
        r#"
        INSERT INTO sync_records (
            entity_type, local_id, server_id, synced, updated_at,
            attempts, last_error, flag, payload, remote_updated_at, created_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8, ?9, ?10, ?11
        )
        "#,
    )
    .bind(record.entity_type())
    .bind(record.local_id())
    .bind(record.server_id())
    .bind(record.meta.synced)
    .bind(record.meta.updated_at)
    .bind(i64::from(record.meta.attempts))
    .bind(record.meta.last_error.as_deref())
    .bind(record.meta.flag)
    .bind(payload)
    .bind(record.meta.remote_updated_at)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, DbConfig};
    use chrono::Duration;
    use titan_core::{Customer, PaymentMethod, Product, Transaction as Sale, TransactionLine};

    async fn repo() -> RecordRepository {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.records()
    }

    fn product(local_id: &str, name: &str) -> Record {
        Record::with_local_id(local_id, Entity::Product(Product::new(name, 999)))
    }

    fn sale(local_id: &str) -> Record {
        Record::with_local_id(
            local_id,
            Entity::Transaction(Sale {
                receipt_number: "R-0001".into(),
                customer_local_id: None,
                lines: vec![TransactionLine {
                    product_local_id: "P1".into(),
                    quantity: 2,
                    unit_price_cents: 999,
                }],
                total_cents: 1998,
                payment_method: PaymentMethod::Cash,
                completed_at: Utc::now(),
            }),
        )
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let repo = repo().await;
        let record = product("P1", "Widget");
        repo.upsert(&record).await.unwrap();

        let stored = repo.get(EntityType::Product, "P1").await.unwrap().unwrap();
        assert_eq!(stored.entity, record.entity);
        assert!(!stored.meta.synced);
        assert!(repo.get(EntityType::Customer, "P1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_unsynced_oldest_first_and_skips_parked() {
        let repo = repo().await;
        let now = Utc::now();

        let mut newer = product("P-new", "Newer");
        newer.meta.updated_at = now;
        let mut older = product("P-old", "Older");
        older.meta.updated_at = now - Duration::minutes(5);
        let mut parked = product("P-parked", "Parked");
        parked.meta.flag = RecordFlag::NeedsReview;

        for r in [&newer, &older, &parked] {
            repo.upsert(r).await.unwrap();
        }

        let pending = repo.get_unsynced(EntityType::Product).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|r| r.local_id()).collect();
        assert_eq!(ids, vec!["P-old", "P-new"]);
    }

    #[tokio::test]
    async fn test_mark_synced_binds_once() {
        let repo = repo().await;
        repo.upsert(&product("P1", "Widget")).await.unwrap();

        repo.mark_synced(EntityType::Product, "P1", "ITM-001").await.unwrap();
        // same binding again is fine
        repo.mark_synced(EntityType::Product, "P1", "ITM-001").await.unwrap();

        let err = repo
            .mark_synced(EntityType::Product, "P1", "ITM-002")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ServerIdConflict { .. }));

        let stored = repo
            .find_by_server_id(EntityType::Product, "ITM-001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.local_id(), "P1");
        assert!(stored.meta.synced);
    }

    #[tokio::test]
    async fn test_mark_synced_unknown_record() {
        let repo = repo().await;
        let err = repo
            .mark_synced(EntityType::Customer, "missing", "C1")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_upsert_never_clears_synced() {
        let repo = repo().await;
        repo.upsert(&product("P1", "Widget")).await.unwrap();
        repo.mark_synced(EntityType::Product, "P1", "ITM-001").await.unwrap();

        // an unsynced copy without a server id must not undo the binding
        repo.upsert(&product("P1", "Widget v2")).await.unwrap();

        let stored = repo.get(EntityType::Product, "P1").await.unwrap().unwrap();
        assert!(stored.meta.synced);
        assert_eq!(stored.server_id(), Some("ITM-001"));
    }

    #[tokio::test]
    async fn test_upsert_refuses_rebinding() {
        let repo = repo().await;
        let mut record = product("P1", "Widget");
        record.meta.server_id = Some("ITM-001".into());
        record.meta.synced = true;
        repo.upsert(&record).await.unwrap();

        record.meta.server_id = Some("ITM-999".into());
        let err = repo.upsert(&record).await.unwrap_err();
        assert!(matches!(err, DbError::ServerIdConflict { .. }));
    }

    #[tokio::test]
    async fn test_transaction_body_is_immutable() {
        let repo = repo().await;
        let original = sale("T1");
        repo.upsert(&original).await.unwrap();

        let mut altered = original.clone();
        if let Entity::Transaction(ref mut t) = altered.entity {
            t.total_cents = 1;
        }
        altered.meta.server_id = Some("SALE-1".into());
        altered.meta.synced = true;
        repo.upsert(&altered).await.unwrap();

        let stored = repo.get(EntityType::Transaction, "T1").await.unwrap().unwrap();
        assert_eq!(stored.entity, original.entity);
        assert_eq!(stored.server_id(), Some("SALE-1"));
        assert!(stored.meta.synced);

        let err = repo.save_local_edit(&altered).await.unwrap_err();
        assert!(matches!(err, DbError::Immutable { .. }));
    }

    #[tokio::test]
    async fn test_save_local_edit_makes_synced_record_pending() {
        let repo = repo().await;
        repo.upsert(&product("P1", "Widget")).await.unwrap();
        repo.mark_synced(EntityType::Product, "P1", "ITM-001").await.unwrap();

        repo.save_local_edit(&product("P1", "Widget Pro")).await.unwrap();

        let pending = repo.get_unsynced(EntityType::Product).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].server_id(), Some("ITM-001"));
        match &pending[0].entity {
            Entity::Product(p) => assert_eq!(p.name, "Widget Pro"),
            other => panic!("unexpected entity {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_settle_skips_row_edited_since_read() {
        let repo = repo().await;
        repo.upsert(&product("P1", "Widget")).await.unwrap();
        let read = repo.get(EntityType::Product, "P1").await.unwrap().unwrap();

        // the till edits while the upload is in flight
        repo.save_local_edit(&product("P1", "Widget Pro")).await.unwrap();

        let mut uploaded = read.clone();
        uploaded.meta.server_id = Some("ITM-001".into());
        uploaded.meta.synced = true;
        let written = repo.settle(&uploaded, read.meta.updated_at).await.unwrap();
        assert!(!written);

        let stored = repo.get(EntityType::Product, "P1").await.unwrap().unwrap();
        assert!(stored.is_pending());
        assert!(stored.server_id().is_none());
        match &stored.entity {
            Entity::Product(p) => assert_eq!(p.name, "Widget Pro"),
            other => panic!("unexpected entity {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_settle_writes_unchanged_row() {
        let repo = repo().await;
        repo.upsert(&product("P1", "Widget")).await.unwrap();
        let read = repo.get(EntityType::Product, "P1").await.unwrap().unwrap();
        let stamp = Utc::now();

        let mut uploaded = read.clone();
        uploaded.meta.server_id = Some("ITM-001".into());
        uploaded.meta.synced = true;
        uploaded.meta.remote_updated_at = Some(stamp);
        assert!(repo.settle(&uploaded, read.meta.updated_at).await.unwrap());

        let stored = repo.get(EntityType::Product, "P1").await.unwrap().unwrap();
        assert!(stored.meta.synced);
        assert_eq!(stored.server_id(), Some("ITM-001"));
        assert_eq!(stored.meta.remote_updated_at, Some(stamp));
    }

    #[tokio::test]
    async fn test_bind_remote_keeps_pending_body() {
        let repo = repo().await;
        repo.upsert(&product("P1", "Widget")).await.unwrap();
        let stamp = Utc::now();

        repo.bind_remote(EntityType::Product, "P1", "ITM-001", stamp)
            .await
            .unwrap();

        let stored = repo.get(EntityType::Product, "P1").await.unwrap().unwrap();
        assert!(stored.is_pending());
        assert_eq!(stored.server_id(), Some("ITM-001"));
        assert_eq!(stored.meta.remote_updated_at, Some(stamp));

        let err = repo
            .bind_remote(EntityType::Product, "P1", "ITM-002", stamp)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ServerIdConflict { .. }));
    }

    #[tokio::test]
    async fn test_local_edit_always_moves_clock_forward() {
        let repo = repo().await;
        let mut future = product("P1", "Widget");
        future.meta.updated_at = Utc::now() + Duration::hours(1);
        repo.upsert(&future).await.unwrap();

        repo.save_local_edit(&product("P1", "Widget Pro")).await.unwrap();

        let stored = repo.get(EntityType::Product, "P1").await.unwrap().unwrap();
        assert!(stored.meta.updated_at > future.meta.updated_at);
    }

    #[tokio::test]
    async fn test_rejections_and_review_counts() {
        let repo = repo().await;
        for id in ["C1", "C2", "C3"] {
            repo.upsert(&Record::with_local_id(id, Entity::Customer(Customer::new(id))))
                .await
                .unwrap();
        }

        repo.record_rejection(EntityType::Customer, "C1", "422 invalid email", false)
            .await
            .unwrap();
        repo.record_rejection(EntityType::Customer, "C2", "422 invalid email", true)
            .await
            .unwrap();
        repo.flag_for_review(EntityType::Customer, "C3", "type clash on field 'phone'")
            .await
            .unwrap();

        let c1 = repo.get(EntityType::Customer, "C1").await.unwrap().unwrap();
        assert_eq!(c1.meta.attempts, 1);
        assert!(c1.is_pending());

        let counts = repo.pending_counts(EntityType::Customer).await.unwrap();
        assert_eq!(
            counts,
            PendingCounts {
                pending: 1,
                failed: 1,
                needs_review: 1
            }
        );
        assert_eq!(counts.total(), 3);
    }
}
