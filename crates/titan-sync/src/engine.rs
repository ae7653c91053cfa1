//! # Sync Engine
//!
//! Runs sync passes: for every entity type, push local changes, pull remote
//! changes, settle conflicts.
//!
//! ## Pass Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          One Sync Pass                                  │
//! │                                                                         │
//! │   try_lock ──► busy? ──► AlreadySyncing (no I/O)                        │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │   for entity_type in [Product, Customer, Transaction]:                  │
//! │                                                                         │
//! │   1. UPLOAD CREATES   pending records without server id                 │
//! │      • transactions wait until every referenced record has a server id │
//! │        (a missing or parked reference flags the sale for review)       │
//! │      • create() is idempotent on local_id, so a retry after a timeout  │
//! │        binds to the record the backend already made                    │
//! │                                                                         │
//! │   2. DOWNLOAD         list(updated_since = watermark), page by page     │
//! │      • unknown          → insert as synced                              │
//! │      • already seen     → skipped (echo of our own upload)              │
//! │      • known, synced    → overwrite                                     │
//! │      • known, pending   → ConflictResolver                              │
//! │      • parked (flagged) → left alone                                    │
//! │                                                                         │
//! │   3. PUSH EDITS       pending records with a server id not touched by   │
//! │                       the download → update()                           │
//! │                                                                         │
//! │   Write-backs are conditional on the updated_at read before the call:   │
//! │   a record edited meanwhile only gets its server id and stays pending.  │
//! │                                                                         │
//! │   Each entity type succeeds or fails on its own. A network error or a  │
//! │   timeout ends that entity's pass; a rejection only affects its record.│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use ts_rs::TS;

use titan_core::{Entity, EntityType, Record, RemoteRecord};

use crate::config::{ConflictSettings, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::events::{NoOpEmitter, StatusKind, SyncEvent, SyncEventEmitter};
use crate::gateway::{ListFilter, LocalStore, RemoteGateway, UploadPayload};
use crate::resolver::ConflictResolver;

// =============================================================================
// Options
// =============================================================================

/// Engine tuning, usually derived from [`SyncConfig`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Bound for each create/update/list call.
    pub request_timeout: Duration,

    /// Records per download page.
    pub page_size: usize,

    /// Rejections before a record is parked as permanently failed.
    pub max_rejections: u32,

    pub conflicts: ConflictSettings,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            request_timeout: Duration::from_secs(15),
            page_size: 100,
            max_rejections: 5,
            conflicts: ConflictSettings::default(),
        }
    }
}

impl From<&SyncConfig> for EngineOptions {
    fn from(config: &SyncConfig) -> Self {
        EngineOptions {
            request_timeout: config.request_timeout(),
            page_size: config.sync.page_size,
            max_rejections: config.sync.max_rejections,
            conflicts: config.conflicts.clone(),
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// Outcome of one entity type within a pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySyncResult {
    pub entity_type: EntityType,

    /// Records created or updated on the backend.
    pub uploaded: u32,

    /// Pending records bound to a backend copy that already existed.
    pub adopted: u32,

    /// Remote records inserted or overwritten locally.
    pub downloaded: u32,

    pub conflicts_resolved: u32,

    /// Uploads refused by the backend this pass.
    pub rejected: u32,

    /// Transactions waiting for their references.
    pub deferred: u32,

    /// Records parked for manual review this pass.
    pub flagged: u32,

    /// The failure that stopped this entity type, else its first
    /// rejection or unresolved conflict.
    pub error: Option<SyncError>,
}

impl EntitySyncResult {
    pub fn new(entity_type: EntityType) -> Self {
        EntitySyncResult {
            entity_type,
            uploaded: 0,
            adopted: 0,
            downloaded: 0,
            conflicts_resolved: 0,
            rejected: 0,
            deferred: 0,
            flagged: 0,
            error: None,
        }
    }

    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    fn note(&mut self, error: SyncError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

/// Outcome of a whole pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<EntitySyncResult>,
}

impl SyncReport {
    /// True when every entity type succeeded.
    pub fn success(&self) -> bool {
        self.results.iter().all(EntitySyncResult::success)
    }

    pub fn result(&self, entity_type: EntityType) -> Option<&EntitySyncResult> {
        self.results
            .iter()
            .find(|r| r.entity_type == entity_type)
    }

    pub fn errors(&self) -> impl Iterator<Item = &SyncError> {
        self.results.iter().filter_map(|r| r.error.as_ref())
    }

    /// True when some entity type could not reach the backend.
    pub fn hit_network_failure(&self) -> bool {
        self.errors().any(SyncError::is_network)
    }

    /// One-line summary for logs and status events.
    pub fn summary(&self) -> String {
        let (up, down, conflicts) = self.results.iter().fold((0, 0, 0), |acc, r| {
            (
                acc.0 + r.uploaded + r.adopted,
                acc.1 + r.downloaded,
                acc.2 + r.conflicts_resolved,
            )
        });
        format!("{} up, {} down, {} conflicts", up, down, conflicts)
    }
}

/// What a sync request amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAttempt {
    Completed(SyncReport),

    /// Another pass held the guard; nothing was done.
    AlreadySyncing,

    /// Backend unreachable; nothing was attempted.
    Offline,
}

impl SyncAttempt {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncAttempt::Completed(report) => Some(report),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SyncAttempt::Completed(_))
    }
}

// =============================================================================
// Session
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Syncing,
    Error,
}

/// Observable state of the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSession {
    pub status: SessionStatus,

    /// Start of the running or last pass.
    pub started_at: Option<DateTime<Utc>>,

    /// Finish time of the last completed pass.
    pub last_sync_at: Option<DateTime<Utc>>,

    pub last_report: Option<SyncReport>,

    pub completed_passes: u64,
}

/// Whether a pending record can be created on the backend yet.
enum Readiness {
    Ready(UploadPayload),

    /// A referenced record has not been uploaded yet.
    Waiting,

    /// A referenced record is missing or parked; the upload can never
    /// succeed as is.
    Blocked(String),
}

// =============================================================================
// Engine
// =============================================================================

pub struct SyncEngine {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteGateway>,
    resolver: ConflictResolver,
    options: EngineOptions,
    emitter: Arc<dyn SyncEventEmitter>,

    /// Held for the duration of a pass.
    pass_lock: Mutex<()>,

    session: RwLock<SyncSession>,
    closed: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteGateway>,
        options: EngineOptions,
    ) -> Self {
        Self::with_emitter(local, remote, options, Arc::new(NoOpEmitter))
    }

    pub fn with_emitter(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteGateway>,
        mut options: EngineOptions,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        options.page_size = options.page_size.max(1);
        options.max_rejections = options.max_rejections.max(1);

        SyncEngine {
            local,
            remote,
            resolver: ConflictResolver::new(),
            options,
            emitter,
            pass_lock: Mutex::new(()),
            session: RwLock::new(SyncSession::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn session(&self) -> SyncSession {
        self.session.read().await.clone()
    }

    /// Refuses every later pass. A running pass finishes normally.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Waits until no pass is running.
    pub async fn wait_idle(&self) {
        let _idle = self.pass_lock.lock().await;
    }

    /// Runs a pass over every entity type in dependency order.
    ///
    /// ## Errors
    /// Only [`SyncError::ShuttingDown`]; per-entity failures are in the
    /// report.
    pub async fn sync_all(&self) -> SyncResult<SyncAttempt> {
        self.run(&EntityType::SYNC_ORDER).await
    }

    /// Runs a pass over a single entity type.
    pub async fn sync_entity(&self, entity_type: EntityType) -> SyncResult<SyncAttempt> {
        self.run(&[entity_type]).await
    }

    async fn run(&self, entity_types: &[EntityType]) -> SyncResult<SyncAttempt> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::ShuttingDown);
        }

        let Ok(_pass) = self.pass_lock.try_lock() else {
            debug!("Sync pass already running, skipping");
            return Ok(SyncAttempt::AlreadySyncing);
        };

        let started_at = Utc::now();
        self.begin(started_at).await;
        info!(entities = ?entity_types, "Sync pass started");

        let mut results = Vec::with_capacity(entity_types.len());
        for &entity_type in entity_types {
            results.push(self.sync_one(entity_type).await);
        }

        let report = SyncReport {
            started_at,
            finished_at: Utc::now(),
            results,
        };
        self.finish(&report).await;

        Ok(SyncAttempt::Completed(report))
    }

    async fn begin(&self, started_at: DateTime<Utc>) {
        let last_sync = {
            let mut session = self.session.write().await;
            session.status = SessionStatus::Syncing;
            session.started_at = Some(started_at);
            session.last_sync_at
        };
        self.emitter
            .emit(&SyncEvent::new(StatusKind::Syncing, last_sync));
    }

    async fn finish(&self, report: &SyncReport) {
        let mut session = self.session.write().await;
        session.last_sync_at = Some(report.finished_at);
        session.last_report = Some(report.clone());
        session.completed_passes += 1;

        let event = match report.errors().next() {
            None => {
                session.status = SessionStatus::Idle;
                info!(summary = %report.summary(), "Sync pass finished");
                SyncEvent::new(StatusKind::Idle, session.last_sync_at).with_detail(report.summary())
            }
            Some(error) => {
                session.status = SessionStatus::Error;
                warn!(summary = %report.summary(), %error, "Sync pass finished with errors");
                SyncEvent::new(StatusKind::Error, session.last_sync_at).with_detail(error.to_string())
            }
        };
        drop(session);

        self.emitter.emit(&event);
    }

    async fn sync_one(&self, entity_type: EntityType) -> EntitySyncResult {
        let mut result = EntitySyncResult::new(entity_type);

        if let Err(e) = self.sync_entity_type(entity_type, &mut result).await {
            warn!(%entity_type, error = %e, "Entity pass stopped");
            result.error = Some(e);
        }

        debug!(
            %entity_type,
            uploaded = result.uploaded,
            adopted = result.adopted,
            downloaded = result.downloaded,
            conflicts = result.conflicts_resolved,
            rejected = result.rejected,
            deferred = result.deferred,
            flagged = result.flagged,
            "Entity pass done"
        );
        result
    }

    async fn sync_entity_type(
        &self,
        entity_type: EntityType,
        result: &mut EntitySyncResult,
    ) -> SyncResult<()> {
        let creates: Vec<Record> = self
            .local
            .get_unsynced(entity_type)
            .await?
            .into_iter()
            .filter(|r| r.server_id().is_none())
            .collect();

        self.upload_creates(entity_type, creates, result).await?;

        let mut touched = HashSet::new();
        self.download(entity_type, result, &mut touched).await?;

        // read again: creates edited mid-flight are bound by now
        let edits: Vec<Record> = self
            .local
            .get_unsynced(entity_type)
            .await?
            .into_iter()
            .filter(|r| r.server_id().is_some() && !touched.contains(r.local_id()))
            .collect();

        self.push_edits(entity_type, edits, result).await
    }

    // =========================================================================
    // Upload
    // =========================================================================

    async fn upload_creates(
        &self,
        entity_type: EntityType,
        creates: Vec<Record>,
        result: &mut EntitySyncResult,
    ) -> SyncResult<()> {
        for record in creates {
            let payload = match self.build_payload(&record).await? {
                Readiness::Ready(payload) => payload,
                Readiness::Waiting => {
                    result.deferred += 1;
                    continue;
                }
                Readiness::Blocked(reason) => {
                    let error = SyncError::unresolved(entity_type, record.local_id(), reason);
                    warn!(%entity_type, local_id = %record.local_id(), error = %error, "Upload can never succeed, parked for review");
                    self.local
                        .flag_for_review(entity_type, record.local_id(), &error.to_string())
                        .await?;
                    result.flagged += 1;
                    result.note(error);
                    continue;
                }
            };

            match self.call(self.remote.create(entity_type, &payload)).await {
                Ok(created) => {
                    self.write_back(entity_type, &record, &record.confirmed_by(&created), &created)
                        .await?;
                    debug!(
                        %entity_type,
                        local_id = %record.local_id(),
                        server_id = %created.server_id,
                        "Uploaded"
                    );
                    result.uploaded += 1;
                }
                Err(e @ SyncError::RemoteRejected { .. }) => {
                    self.reject(entity_type, &record, e, result).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Stores the outcome of a successful create or update of `sent`.
    ///
    /// When the till edited the record while the call was in flight, only
    /// the binding is kept; the newer body stays pending for the next push.
    async fn write_back(
        &self,
        entity_type: EntityType,
        sent: &Record,
        settled: &Record,
        echo: &RemoteRecord,
    ) -> SyncResult<()> {
        if self
            .local
            .settle(entity_type, settled, sent.meta.updated_at)
            .await?
        {
            return Ok(());
        }

        debug!(%entity_type, local_id = %sent.local_id(), "Edited while uploading, kept pending");
        self.local
            .bind_remote(entity_type, sent.local_id(), &echo.server_id, echo.updated_at)
            .await
    }

    /// Upload body for a record, unless it is a transaction whose references
    /// are not on the backend.
    async fn build_payload(&self, record: &Record) -> SyncResult<Readiness> {
        let payload = UploadPayload::from_record(record);
        let Entity::Transaction(ref sale) = record.entity else {
            return Ok(Readiness::Ready(payload));
        };

        let mut references = BTreeMap::new();
        for (ref_type, ref_local_id) in sale.references() {
            let Some(target) = self.local.get(ref_type, ref_local_id).await? else {
                return Ok(Readiness::Blocked(format!(
                    "references unknown {} {}",
                    ref_type, ref_local_id
                )));
            };

            if let Some(server_id) = target.meta.server_id {
                references.insert(ref_local_id.to_string(), server_id);
                continue;
            }

            if !target.meta.flag.is_clear() {
                return Ok(Readiness::Blocked(format!(
                    "references {} {} which is parked ({:?})",
                    ref_type, ref_local_id, target.meta.flag
                )));
            }

            debug!(
                local_id = %record.local_id(),
                %ref_type,
                reference = %ref_local_id,
                "Deferring transaction until its references are uploaded"
            );
            return Ok(Readiness::Waiting);
        }

        Ok(Readiness::Ready(payload.with_references(references)))
    }

    async fn reject(
        &self,
        entity_type: EntityType,
        record: &Record,
        error: SyncError,
        result: &mut EntitySyncResult,
    ) -> SyncResult<()> {
        let reason = match &error {
            SyncError::RemoteRejected { reason, .. } => reason.clone(),
            other => other.to_string(),
        };
        let attempts = record.meta.attempts + 1;
        let permanent = attempts >= self.options.max_rejections;

        self.local
            .record_rejection(entity_type, record.local_id(), &reason, permanent)
            .await?;

        if permanent {
            warn!(
                %entity_type,
                local_id = %record.local_id(),
                attempts,
                %reason,
                "Record permanently failed, parked for the user"
            );
        } else {
            warn!(%entity_type, local_id = %record.local_id(), attempts, %reason, "Upload rejected");
        }

        result.rejected += 1;
        result.note(error);
        Ok(())
    }

    // =========================================================================
    // Download
    // =========================================================================

    async fn download(
        &self,
        entity_type: EntityType,
        result: &mut EntitySyncResult,
        touched: &mut HashSet<String>,
    ) -> SyncResult<()> {
        let since = self.local.last_pulled_at(entity_type).await?;

        // Fetch every page before applying; pushes made while resolving
        // conflicts would otherwise shift the offsets.
        let mut filter = ListFilter::since(since, self.options.page_size);
        let mut incoming = Vec::new();
        loop {
            let page = self.call(self.remote.list(entity_type, &filter)).await?;
            let last_page = page.len() < filter.limit;
            incoming.extend(page);
            if last_page {
                break;
            }
            filter = filter.next_page();
        }

        let mut watermark = since;
        for remote in incoming {
            if remote.entity_type() != entity_type {
                warn!(%entity_type, server_id = %remote.server_id, "Ignoring remote record of another type");
                continue;
            }
            let stamp = remote.updated_at;
            self.apply_remote(entity_type, remote, result, touched).await?;
            watermark = watermark.max(Some(stamp));
        }

        if let (true, Some(at)) = (watermark > since, watermark) {
            self.local.set_last_pulled_at(entity_type, at).await?;
        }
        Ok(())
    }

    async fn apply_remote(
        &self,
        entity_type: EntityType,
        remote: RemoteRecord,
        result: &mut EntitySyncResult,
        touched: &mut HashSet<String>,
    ) -> SyncResult<()> {
        let local = match self.local.find_by_server_id(entity_type, &remote.server_id).await? {
            Some(found) => Some(found),
            None => match remote.local_id.as_deref() {
                Some(key) => self.local.get(entity_type, key).await?,
                None => None,
            },
        };

        let Some(mut local) = local else {
            self.local
                .upsert(entity_type, &Record::from_remote(&remote))
                .await?;
            result.downloaded += 1;
            return Ok(());
        };

        if local
            .meta
            .remote_updated_at
            .is_some_and(|known| remote.updated_at <= known)
        {
            // our own upload coming back; a pending edit is pushed later
            return Ok(());
        }
        touched.insert(local.local_id().to_string());

        if !local.meta.flag.is_clear() {
            debug!(%entity_type, local_id = %local.local_id(), "Parked record, remote change not applied");
            return Ok(());
        }

        if let Some(bound) = local.server_id() {
            if bound != remote.server_id {
                warn!(
                    %entity_type,
                    local_id = %local.local_id(),
                    bound = %bound,
                    remote = %remote.server_id,
                    "Remote record echoes a local id bound elsewhere, skipping"
                );
                return Ok(());
            }
        }

        let seen = local.meta.updated_at;

        if local.meta.synced {
            if local.entity != remote.entity
                && self
                    .local
                    .settle(entity_type, &local.overwritten_by(&remote), seen)
                    .await?
            {
                result.downloaded += 1;
            }
            return Ok(());
        }

        if local.server_id().is_none() {
            if local.entity == remote.entity {
                // an earlier create reached the backend but its answer was lost
                self.write_back(entity_type, &local, &local.confirmed_by(&remote), &remote)
                    .await?;
                info!(%entity_type, local_id = %local.local_id(), server_id = %remote.server_id, "Adopted remote copy");
                result.adopted += 1;
                return Ok(());
            }
            local.meta.server_id = Some(remote.server_id.clone());
        }

        self.resolve_conflict(entity_type, local, &remote, result)
            .await
    }

    async fn resolve_conflict(
        &self,
        entity_type: EntityType,
        local: Record,
        remote: &RemoteRecord,
        result: &mut EntitySyncResult,
    ) -> SyncResult<()> {
        let strategy = self.options.conflicts.strategy_for(entity_type);

        let resolution = match self.resolver.resolve(entity_type, &local, remote, strategy) {
            Ok(resolution) => resolution,
            Err(e @ SyncError::ConflictUnresolved { .. }) => {
                warn!(%entity_type, local_id = %local.local_id(), error = %e, "Conflict needs manual review");
                self.local
                    .flag_for_review(entity_type, local.local_id(), &e.to_string())
                    .await?;
                result.flagged += 1;
                result.note(e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        result.conflicts_resolved += 1;
        let seen = local.meta.updated_at;

        if !resolution.needs_push() {
            if !self.local.settle(entity_type, resolution.record(), seen).await? {
                // edited meanwhile; the next download re-resolves it
                debug!(%entity_type, local_id = %local.local_id(), "Edited while resolving, kept pending");
            }
            return Ok(());
        }

        let record = resolution.into_record();
        let payload = UploadPayload::from_record(&record);
        match self
            .call(self.remote.update(entity_type, &remote.server_id, &payload))
            .await
        {
            Ok(pushed) => {
                self.write_back(entity_type, &local, &record.overwritten_by(&pushed), &pushed)
                    .await
            }
            Err(e @ SyncError::RemoteRejected { .. }) => {
                if self.local.settle(entity_type, &record, seen).await? {
                    self.reject(entity_type, &record, e, result).await?;
                }
                Ok(())
            }
            Err(e) => {
                // keep the resolved body pending for the next pass
                self.local.settle(entity_type, &record, seen).await?;
                Err(e)
            }
        }
    }

    // =========================================================================
    // Push
    // =========================================================================

    async fn push_edits(
        &self,
        entity_type: EntityType,
        edits: Vec<Record>,
        result: &mut EntitySyncResult,
    ) -> SyncResult<()> {
        for record in edits {
            let Some(server_id) = record.meta.server_id.clone() else {
                continue;
            };

            if entity_type.is_immutable() {
                // nothing to push for a bound sale
                self.local
                    .mark_synced(entity_type, record.local_id(), &server_id)
                    .await?;
                continue;
            }

            let payload = UploadPayload::from_record(&record);
            match self
                .call(self.remote.update(entity_type, &server_id, &payload))
                .await
            {
                Ok(pushed) => {
                    self.write_back(entity_type, &record, &record.overwritten_by(&pushed), &pushed)
                        .await?;
                    result.uploaded += 1;
                }
                Err(e @ SyncError::RemoteRejected { .. }) => {
                    self.reject(entity_type, &record, e, result).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn call<T>(&self, request: impl Future<Output = SyncResult<T>>) -> SyncResult<T> {
        let timeout = self.options.request_timeout;
        tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| SyncError::Timeout(timeout.as_millis() as u64))?
    }
}
