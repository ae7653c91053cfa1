//! # Download Cursor Repository
//!
//! One watermark per entity type: the greatest remote `updated_at` already
//! applied locally. The next download asks only for records changed after it.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use titan_core::EntityType;

/// Repository for `sync_cursors`.
#[derive(Debug, Clone)]
pub struct CursorRepository {
    pool: SqlitePool,
}

impl CursorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CursorRepository { pool }
    }

    /// Gets the watermark, `None` before the first completed download.
    pub async fn last_pulled_at(&self, entity_type: EntityType) -> DbResult<Option<DateTime<Utc>>> {
        let at: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT last_pulled_at FROM sync_cursors WHERE entity_type = ?1")
                .bind(entity_type)
                .fetch_optional(&self.pool)
                .await?;

        Ok(at)
    }

    /// Stores the watermark after a download completed.
    pub async fn set_last_pulled_at(&self, entity_type: EntityType, at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_cursors (entity_type, last_pulled_at, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (entity_type) DO UPDATE SET
                last_pulled_at = excluded.last_pulled_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(entity_type)
        .bind(at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(%entity_type, %at, "Advanced download watermark");
        Ok(())
    }
}
