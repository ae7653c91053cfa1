//! In-memory gateways for unit tests.
//!
//! `MemoryStore` follows the same metadata rules as the SQLite store.
//! `FakeRemote` is an idempotent backend whose failures and latency can be
//! scripted per call.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::events::{SyncEvent, SyncEventEmitter};
use crate::gateway::{ListFilter, LocalStore, RemoteGateway, UploadPayload};
use titan_core::{Entity, EntityType, PendingCounts, Record, RecordFlag, RemoteRecord};

// =============================================================================
// Memory Store
// =============================================================================

#[derive(Default)]
pub(crate) struct MemoryStore {
    records: Mutex<BTreeMap<(EntityType, String), Record>>,
    cursors: Mutex<HashMap<EntityType, DateTime<Utc>>>,
    broken: Mutex<HashSet<EntityType>>,
    synced_regressions: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record as the checkout flow would.
    pub fn put(&self, record: Record) {
        let key = (record.entity_type(), record.local_id().to_string());
        self.records.lock().unwrap().insert(key, record);
    }

    pub fn record(&self, entity_type: EntityType, local_id: &str) -> Option<Record> {
        self.records
            .lock()
            .unwrap()
            .get(&(entity_type, local_id.to_string()))
            .cloned()
    }

    pub fn all(&self, entity_type: EntityType) -> Vec<Record> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|((t, _), _)| *t == entity_type)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Stores a business edit the way `save_local_edit` does.
    pub fn edit(&self, entity_type: EntityType, local_id: &str, entity: Entity) {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&(entity_type, local_id.to_string()))
            .expect("edited record exists");
        record.entity = entity;
        record.meta.synced = false;
        record.meta.updated_at =
            Utc::now().max(record.meta.updated_at + ChronoDuration::microseconds(1));
        record.meta.attempts = 0;
        record.meta.last_error = None;
        record.meta.flag = RecordFlag::Clear;
    }

    /// Makes every call for this entity type fail.
    pub fn break_entity(&self, entity_type: EntityType) {
        self.broken.lock().unwrap().insert(entity_type);
    }

    /// Number of writes that would have turned `synced` back to false.
    pub fn synced_regressions(&self) -> usize {
        self.synced_regressions.load(Ordering::SeqCst)
    }

    fn check(&self, entity_type: EntityType) -> SyncResult<()> {
        if self.broken.lock().unwrap().contains(&entity_type) {
            return Err(SyncError::LocalStoreFailure(format!("{} table is locked", entity_type)));
        }
        Ok(())
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get_unsynced(&self, entity_type: EntityType) -> SyncResult<Vec<Record>> {
        self.check(entity_type)?;
        let mut pending: Vec<Record> = self
            .all(entity_type)
            .into_iter()
            .filter(Record::is_pending)
            .collect();
        pending.sort_by(|a, b| {
            a.meta
                .updated_at
                .cmp(&b.meta.updated_at)
                .then_with(|| a.local_id().cmp(b.local_id()))
        });
        Ok(pending)
    }

    async fn get(&self, entity_type: EntityType, local_id: &str) -> SyncResult<Option<Record>> {
        self.check(entity_type)?;
        Ok(self.record(entity_type, local_id))
    }

    async fn find_by_server_id(
        &self,
        entity_type: EntityType,
        server_id: &str,
    ) -> SyncResult<Option<Record>> {
        self.check(entity_type)?;
        Ok(self
            .all(entity_type)
            .into_iter()
            .find(|r| r.server_id() == Some(server_id)))
    }

    async fn upsert(&self, entity_type: EntityType, record: &Record) -> SyncResult<()> {
        self.check(entity_type)?;
        record
            .entity
            .expect_type(entity_type)
            .map_err(|e| SyncError::LocalStoreFailure(e.to_string()))?;

        let key = (entity_type, record.local_id().to_string());
        let mut records = self.records.lock().unwrap();

        let Some(existing) = records.get(&key).cloned() else {
            records.insert(key, record.clone());
            return Ok(());
        };

        let mut next = record.clone();
        match (existing.server_id(), record.server_id()) {
            (Some(bound), Some(incoming)) if bound != incoming => {
                return Err(SyncError::LocalStoreFailure(format!(
                    "Record {} is bound to {}, refusing {}",
                    record.local_id(),
                    bound,
                    incoming
                )));
            }
            (Some(bound), _) => next.meta.server_id = Some(bound.to_string()),
            _ => {}
        }
        if existing.meta.synced && !record.meta.synced {
            self.synced_regressions.fetch_add(1, Ordering::SeqCst);
        }
        next.meta.synced = existing.meta.synced || record.meta.synced;
        next.meta.remote_updated_at = existing.meta.remote_updated_at.max(record.meta.remote_updated_at);
        if entity_type.is_immutable() {
            next.entity = existing.entity.clone();
            next.meta.updated_at = existing.meta.updated_at;
        }

        records.insert(key, next);
        Ok(())
    }

    async fn settle(
        &self,
        entity_type: EntityType,
        record: &Record,
        seen: DateTime<Utc>,
    ) -> SyncResult<bool> {
        self.check(entity_type)?;
        let key = (entity_type, record.local_id().to_string());
        let mut records = self.records.lock().unwrap();
        let existing = records
            .get(&key)
            .cloned()
            .ok_or_else(|| SyncError::LocalStoreFailure(format!("{} not found", record.local_id())))?;

        if existing.meta.updated_at != seen {
            return Ok(false);
        }

        let mut next = record.clone();
        match (existing.server_id(), record.server_id()) {
            (Some(bound), Some(incoming)) if bound != incoming => {
                return Err(SyncError::LocalStoreFailure(format!(
                    "Record {} is bound to {}, refusing {}",
                    record.local_id(),
                    bound,
                    incoming
                )));
            }
            (Some(bound), _) => next.meta.server_id = Some(bound.to_string()),
            _ => {}
        }
        next.meta.remote_updated_at = existing.meta.remote_updated_at.max(record.meta.remote_updated_at);
        if entity_type.is_immutable() {
            next.entity = existing.entity.clone();
            next.meta.updated_at = existing.meta.updated_at;
        }

        records.insert(key, next);
        Ok(true)
    }

    async fn bind_remote(
        &self,
        entity_type: EntityType,
        local_id: &str,
        server_id: &str,
        remote_updated_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        self.check(entity_type)?;
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&(entity_type, local_id.to_string()))
            .ok_or_else(|| SyncError::LocalStoreFailure(format!("{} not found", local_id)))?;

        if let Some(bound) = record.server_id() {
            if bound != server_id {
                return Err(SyncError::LocalStoreFailure(format!(
                    "Record {} is bound to {}, refusing {}",
                    local_id, bound, server_id
                )));
            }
        }
        record.meta.server_id = Some(server_id.to_string());
        record.meta.remote_updated_at = record.meta.remote_updated_at.max(Some(remote_updated_at));
        Ok(())
    }

    async fn mark_synced(
        &self,
        entity_type: EntityType,
        local_id: &str,
        server_id: &str,
    ) -> SyncResult<()> {
        self.check(entity_type)?;
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&(entity_type, local_id.to_string()))
            .ok_or_else(|| SyncError::LocalStoreFailure(format!("{} not found", local_id)))?;

        if let Some(bound) = record.server_id() {
            if bound != server_id {
                return Err(SyncError::LocalStoreFailure(format!(
                    "Record {} is bound to {}, refusing {}",
                    local_id, bound, server_id
                )));
            }
        }
        record.meta.server_id = Some(server_id.to_string());
        record.meta.synced = true;
        record.meta.last_error = None;
        record.meta.flag = RecordFlag::Clear;
        Ok(())
    }

    async fn record_rejection(
        &self,
        entity_type: EntityType,
        local_id: &str,
        reason: &str,
        permanent: bool,
    ) -> SyncResult<()> {
        self.check(entity_type)?;
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&(entity_type, local_id.to_string()))
            .filter(|r| !r.meta.synced)
            .ok_or_else(|| SyncError::LocalStoreFailure(format!("{} not found", local_id)))?;

        record.meta.attempts += 1;
        record.meta.last_error = Some(reason.to_string());
        if permanent {
            record.meta.flag = RecordFlag::PermanentlyFailed;
        }
        Ok(())
    }

    async fn flag_for_review(
        &self,
        entity_type: EntityType,
        local_id: &str,
        reason: &str,
    ) -> SyncResult<()> {
        self.check(entity_type)?;
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&(entity_type, local_id.to_string()))
            .filter(|r| !r.meta.synced)
            .ok_or_else(|| SyncError::LocalStoreFailure(format!("{} not found", local_id)))?;

        record.meta.last_error = Some(reason.to_string());
        record.meta.flag = RecordFlag::NeedsReview;
        Ok(())
    }

    async fn pending_counts(&self, entity_type: EntityType) -> SyncResult<PendingCounts> {
        self.check(entity_type)?;
        let mut counts = PendingCounts::default();
        for record in self.all(entity_type) {
            match record.meta.flag {
                RecordFlag::PermanentlyFailed => counts.failed += 1,
                RecordFlag::NeedsReview => counts.needs_review += 1,
                RecordFlag::Clear if !record.meta.synced => counts.pending += 1,
                RecordFlag::Clear => {}
            }
        }
        Ok(counts)
    }

    async fn last_pulled_at(&self, entity_type: EntityType) -> SyncResult<Option<DateTime<Utc>>> {
        self.check(entity_type)?;
        Ok(self.cursors.lock().unwrap().get(&entity_type).copied())
    }

    async fn set_last_pulled_at(&self, entity_type: EntityType, at: DateTime<Utc>) -> SyncResult<()> {
        self.check(entity_type)?;
        self.cursors.lock().unwrap().insert(entity_type, at);
        Ok(())
    }
}

// =============================================================================
// Fake Remote
// =============================================================================

/// Which remote call a scripted fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    Create,
    Update,
    List,
}

/// A scripted failure.
#[derive(Debug, Clone)]
pub(crate) enum Fault {
    Reject(String),
    Unavailable,
}

#[derive(Default)]
struct RemoteState {
    records: BTreeMap<(EntityType, String), RemoteRecord>,
    keys: HashMap<(EntityType, String), String>,
    next_id: u64,
    last_stamp: Option<DateTime<Utc>>,
    one_shot: HashMap<(Op, EntityType), VecDeque<Fault>>,
    rejected_keys: HashMap<String, String>,
    stalls: HashMap<String, Duration>,
}

impl RemoteState {
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + ChronoDuration::milliseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn next_server_id(&mut self, entity_type: EntityType) -> String {
        self.next_id += 1;
        let prefix = match entity_type {
            EntityType::Product => "ITM",
            EntityType::Customer => "CUS",
            EntityType::Transaction => "SALE",
        };
        format!("{}-{:03}", prefix, self.next_id)
    }
}

pub(crate) struct FakeRemote {
    state: Mutex<RemoteState>,
    healthy: AtomicBool,
    reachable: AtomicBool,
    health_delay: Mutex<Option<Duration>>,
    latency: Mutex<Option<Duration>>,
    health_calls: AtomicUsize,
    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        FakeRemote {
            state: Mutex::new(RemoteState::default()),
            healthy: AtomicBool::new(true),
            reachable: AtomicBool::new(true),
            health_delay: Mutex::new(None),
            latency: Mutex::new(None),
            health_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Unreachable backend: every call fails and probes report unhealthy.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
        self.set_healthy(reachable);
    }

    pub fn set_health_delay(&self, delay: Duration) {
        *self.health_delay.lock().unwrap() = Some(delay);
    }

    /// Delay applied before every create/update/list.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    /// Fails the next `op` call for an entity type.
    pub fn fail_next(&self, op: Op, entity_type: EntityType, fault: Fault) {
        self.state
            .lock()
            .unwrap()
            .one_shot
            .entry((op, entity_type))
            .or_default()
            .push_back(fault);
    }

    /// Rejects every create of this local id.
    pub fn reject_key(&self, local_id: &str, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .rejected_keys
            .insert(local_id.to_string(), reason.to_string());
    }

    pub fn accept_key(&self, local_id: &str) {
        self.state.lock().unwrap().rejected_keys.remove(local_id);
    }

    /// Commits the first create of this local id, then stalls before
    /// answering.
    pub fn stall_key(&self, local_id: &str, stall: Duration) {
        self.state
            .lock()
            .unwrap()
            .stalls
            .insert(local_id.to_string(), stall);
    }

    /// Adds a record created elsewhere (another till, the back office).
    pub fn seed(&self, local_id: Option<&str>, entity: Entity) -> String {
        let mut state = self.state.lock().unwrap();
        let entity_type = entity.entity_type();
        let server_id = state.next_server_id(entity_type);
        let updated_at = state.stamp();

        if let Some(key) = local_id {
            state
                .keys
                .insert((entity_type, key.to_string()), server_id.clone());
        }
        state.records.insert(
            (entity_type, server_id.clone()),
            RemoteRecord {
                server_id: server_id.clone(),
                local_id: local_id.map(str::to_string),
                updated_at,
                entity,
            },
        );
        server_id
    }

    /// Changes a record on the backend side.
    pub fn edit(&self, server_id: &str, entity: Entity) {
        let mut state = self.state.lock().unwrap();
        let updated_at = state.stamp();
        let key = (entity.entity_type(), server_id.to_string());
        if let Some(record) = state.records.get_mut(&key) {
            record.entity = entity;
            record.updated_at = updated_at;
        }
    }

    pub fn record(&self, entity_type: EntityType, server_id: &str) -> Option<RemoteRecord> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(&(entity_type, server_id.to_string()))
            .cloned()
    }

    pub fn count(&self, entity_type: EntityType) -> usize {
        self.state
            .lock()
            .unwrap()
            .records
            .keys()
            .filter(|(t, _)| *t == entity_type)
            .count()
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Create, update and list calls; probes excluded.
    pub fn sync_calls(&self) -> usize {
        self.create_calls() + self.update_calls() + self.list_calls.load(Ordering::SeqCst)
    }

    async fn enter(&self, op: Op, entity_type: EntityType) -> SyncResult<()> {
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(SyncError::NetworkUnavailable("connection refused".into()));
        }

        let fault = self
            .state
            .lock()
            .unwrap()
            .one_shot
            .get_mut(&(op, entity_type))
            .and_then(VecDeque::pop_front);
        match fault {
            None => Ok(()),
            Some(Fault::Reject(reason)) => Err(SyncError::rejected(entity_type, reason)),
            Some(Fault::Unavailable) => {
                Err(SyncError::NetworkUnavailable("503 Service Unavailable".into()))
            }
        }
    }
}

#[async_trait]
impl RemoteGateway for FakeRemote {
    async fn create(
        &self,
        entity_type: EntityType,
        payload: &UploadPayload,
    ) -> SyncResult<RemoteRecord> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(Op::Create, entity_type).await?;

        let (record, stall) = {
            let mut state = self.state.lock().unwrap();

            if let Some(reason) = state.rejected_keys.get(&payload.local_id) {
                return Err(SyncError::rejected(entity_type, reason.clone()));
            }

            let key = (entity_type, payload.local_id.clone());
            if let Some(server_id) = state.keys.get(&key).cloned() {
                // idempotent replay
                let existing = state.records.get(&(entity_type, server_id)).cloned();
                if let Some(existing) = existing {
                    return Ok(existing);
                }
            }

            if let Entity::Transaction(ref sale) = payload.entity {
                for (ref_type, ref_local_id) in sale.references() {
                    let known = payload
                        .references
                        .get(ref_local_id)
                        .map(|sid| state.records.contains_key(&(ref_type, sid.clone())))
                        .unwrap_or(false);
                    if !known {
                        return Err(SyncError::rejected(
                            entity_type,
                            format!("unknown {} reference {}", ref_type, ref_local_id),
                        ));
                    }
                }
            }

            let server_id = state.next_server_id(entity_type);
            let updated_at = state.stamp();
            let record = RemoteRecord {
                server_id: server_id.clone(),
                local_id: Some(payload.local_id.clone()),
                updated_at,
                entity: payload.entity.clone(),
            };
            state.keys.insert(key, server_id.clone());
            state.records.insert((entity_type, server_id), record.clone());
            let stall = state.stalls.remove(&payload.local_id);
            (record, stall)
        };

        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        Ok(record)
    }

    async fn update(
        &self,
        entity_type: EntityType,
        server_id: &str,
        payload: &UploadPayload,
    ) -> SyncResult<RemoteRecord> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(Op::Update, entity_type).await?;

        let mut state = self.state.lock().unwrap();
        let updated_at = state.stamp();
        let record = state
            .records
            .get_mut(&(entity_type, server_id.to_string()))
            .ok_or_else(|| SyncError::rejected(entity_type, format!("unknown id {}", server_id)))?;
        record.entity = payload.entity.clone();
        record.updated_at = updated_at;
        Ok(record.clone())
    }

    async fn list(&self, entity_type: EntityType, filter: &ListFilter) -> SyncResult<Vec<RemoteRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(Op::List, entity_type).await?;

        let state = self.state.lock().unwrap();
        let mut matching: Vec<RemoteRecord> = state
            .records
            .values()
            .filter(|r| r.entity_type() == entity_type)
            .filter(|r| filter.updated_since.map_or(true, |since| r.updated_at > since))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.server_id.cmp(&b.server_id))
        });
        Ok(matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect())
    }

    async fn health_check(&self) -> bool {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.health_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.healthy.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Recording Emitter
// =============================================================================

#[derive(Default)]
pub(crate) struct RecordingEmitter {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingEmitter {
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl SyncEventEmitter for RecordingEmitter {
    fn emit(&self, event: &SyncEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
