//! # SQLite Local Store
//!
//! [`LocalStore`] backed by the titan-db repositories. Database errors
//! become [`SyncError::LocalStoreFailure`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{SyncError, SyncResult};
use crate::gateway::LocalStore;
use titan_core::{EntityType, PendingCounts, Record};
use titan_db::Database;

#[async_trait]
impl LocalStore for Database {
    async fn get_unsynced(&self, entity_type: EntityType) -> SyncResult<Vec<Record>> {
        Ok(self.records().get_unsynced(entity_type).await?)
    }

    async fn get(&self, entity_type: EntityType, local_id: &str) -> SyncResult<Option<Record>> {
        Ok(self.records().get(entity_type, local_id).await?)
    }

    async fn find_by_server_id(
        &self,
        entity_type: EntityType,
        server_id: &str,
    ) -> SyncResult<Option<Record>> {
        Ok(self.records().find_by_server_id(entity_type, server_id).await?)
    }

    async fn upsert(&self, entity_type: EntityType, record: &Record) -> SyncResult<()> {
        record
            .entity
            .expect_type(entity_type)
            .map_err(|e| SyncError::LocalStoreFailure(e.to_string()))?;
        Ok(self.records().upsert(record).await?)
    }

    async fn settle(
        &self,
        entity_type: EntityType,
        record: &Record,
        seen: DateTime<Utc>,
    ) -> SyncResult<bool> {
        record
            .entity
            .expect_type(entity_type)
            .map_err(|e| SyncError::LocalStoreFailure(e.to_string()))?;
        Ok(self.records().settle(record, seen).await?)
    }

    async fn bind_remote(
        &self,
        entity_type: EntityType,
        local_id: &str,
        server_id: &str,
        remote_updated_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        Ok(self
            .records()
            .bind_remote(entity_type, local_id, server_id, remote_updated_at)
            .await?)
    }

    async fn mark_synced(
        &self,
        entity_type: EntityType,
        local_id: &str,
        server_id: &str,
    ) -> SyncResult<()> {
        Ok(self.records().mark_synced(entity_type, local_id, server_id).await?)
    }

    async fn record_rejection(
        &self,
        entity_type: EntityType,
        local_id: &str,
        reason: &str,
        permanent: bool,
    ) -> SyncResult<()> {
        Ok(self
            .records()
            .record_rejection(entity_type, local_id, reason, permanent)
            .await?)
    }

    async fn flag_for_review(
        &self,
        entity_type: EntityType,
        local_id: &str,
        reason: &str,
    ) -> SyncResult<()> {
        Ok(self.records().flag_for_review(entity_type, local_id, reason).await?)
    }

    async fn pending_counts(&self, entity_type: EntityType) -> SyncResult<PendingCounts> {
        Ok(self.records().pending_counts(entity_type).await?)
    }

    async fn last_pulled_at(&self, entity_type: EntityType) -> SyncResult<Option<DateTime<Utc>>> {
        Ok(self.cursors().last_pulled_at(entity_type).await?)
    }

    async fn set_last_pulled_at(&self, entity_type: EntityType, at: DateTime<Utc>) -> SyncResult<()> {
        Ok(self.cursors().set_last_pulled_at(entity_type, at).await?)
    }
}
