//! # Sync Agent
//!
//! Main orchestrator for the sync engine. Wires the local store, the remote
//! gateway, connectivity, scheduling and status events together.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         SyncAgent                                │  │
//! │  │                                                                  │  │
//! │  │  • Spawns the probe loop, the scheduler and the status forwarder │  │
//! │  │  • Exposes force sync, stats and network signals to the shell    │  │
//! │  │  • Emits status events to the desktop frontend                   │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Connectivity   │  │ SyncScheduler  │  │   SyncEngine           │    │
//! │  │ Monitor        │──►                │──►                        │    │
//! │  │ probes health  │  │ interval and   │  │ upload, download,      │    │
//! │  │ with backoff   │  │ reconnect      │  │ resolve conflicts      │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  STATUS EVENTS:                                                        │
//! │  ──────────────                                                        │
//! │  { status: "syncing" | "idle" | "error" }   from the engine            │
//! │  { status: "online"  | "offline" }          from connectivity          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use titan_core::EntityType;
use titan_db::Database;

use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityMonitor, ConnectivityState, NetworkSignal, ProbeSettings};
use crate::engine::{EngineOptions, SyncAttempt, SyncEngine, SyncSession};
use crate::error::{SyncError, SyncResult};
use crate::events::{NoOpEmitter, StatusKind, SyncEvent, SyncEventEmitter, SyncStats};
use crate::gateway::{LocalStore, RemoteGateway};
use crate::http::HttpRemoteGateway;
use crate::scheduler::{SchedulerSettings, SchedulerState, SyncScheduler};

// =============================================================================
// Agent Handle (for external control)
// =============================================================================

/// Cloneable control surface of a [`SyncAgent`].
///
/// The desktop shell keeps one in its state so commands can force a sync or
/// read stats without owning the agent.
#[derive(Clone)]
pub struct SyncAgentHandle {
    local: Arc<dyn LocalStore>,
    engine: Arc<SyncEngine>,
    monitor: Arc<ConnectivityMonitor>,
    scheduler: Arc<SyncScheduler>,
}

impl SyncAgentHandle {
    /// Runs a full pass now.
    ///
    /// Returns [`SyncAttempt::Offline`] without touching the network when
    /// the backend is unreachable and [`SyncAttempt::AlreadySyncing`] when a
    /// pass is running.
    pub async fn force_sync(&self) -> SyncResult<SyncAttempt> {
        self.scheduler.trigger().await
    }

    /// Runs a pass over one entity type now.
    pub async fn force_sync_entity(&self, entity_type: EntityType) -> SyncResult<SyncAttempt> {
        self.scheduler.trigger_entity(entity_type).await
    }

    /// Backlog per entity type plus last sync time and reachability.
    pub async fn sync_stats(&self) -> SyncResult<SyncStats> {
        let mut stats = SyncStats {
            last_sync: self.engine.session().await.last_sync_at,
            is_online: self.monitor.is_online(),
            ..Default::default()
        };
        for entity_type in EntityType::SYNC_ORDER {
            stats
                .pending
                .insert(entity_type, self.local.pending_counts(entity_type).await?);
        }
        Ok(stats)
    }

    pub async fn session(&self) -> SyncSession {
        self.engine.session().await
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.monitor.state()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Forwards a host network notification; returns the resulting
    /// reachability.
    pub async fn handle_network_signal(&self, signal: NetworkSignal) -> bool {
        self.monitor.handle_network_signal(signal).await
    }
}

// =============================================================================
// Sync Agent
// =============================================================================

/// Main sync agent that orchestrates all sync operations.
pub struct SyncAgent {
    /// Sync configuration.
    config: Arc<SyncConfig>,

    handle: SyncAgentHandle,

    /// Event emitter for frontend notifications.
    emitter: Arc<dyn SyncEventEmitter>,

    /// Shutdown sender (set while running).
    shutdown_tx: Option<watch::Sender<bool>>,

    tasks: Vec<JoinHandle<()>>,
}

impl SyncAgent {
    /// Creates a new sync agent.
    pub fn new(
        config: SyncConfig,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteGateway>,
    ) -> Self {
        Self::with_emitter(config, local, remote, Arc::new(NoOpEmitter))
    }

    /// Creates a new sync agent with a custom event emitter.
    pub fn with_emitter(
        config: SyncConfig,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteGateway>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        let engine = Arc::new(SyncEngine::with_emitter(
            local.clone(),
            remote.clone(),
            EngineOptions::from(&config),
            emitter.clone(),
        ));
        let monitor = Arc::new(ConnectivityMonitor::new(remote, ProbeSettings::from(&config)));
        let scheduler = Arc::new(SyncScheduler::new(
            engine.clone(),
            monitor.clone(),
            SchedulerSettings::from(&config),
        ));

        SyncAgent {
            config: Arc::new(config),
            handle: SyncAgentHandle {
                local,
                engine,
                monitor,
                scheduler,
            },
            emitter,
            shutdown_tx: None,
            tasks: Vec::new(),
        }
    }

    pub fn handle(&self) -> SyncAgentHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Starts the sync agent.
    ///
    /// Probes the backend once, then spawns the probe loop, the scheduler
    /// and the status forwarder. They run until [`SyncAgent::shutdown`].
    pub async fn start(&mut self) -> SyncResult<()> {
        if !self.config.is_sync_enabled() {
            info!("Sync is disabled");
            return Ok(());
        }
        if self.is_running() {
            debug!("Sync agent already running");
            return Ok(());
        }

        self.config.validate()?;

        info!(
            device_id = %self.config.device_id(),
            api_url = %self.config.api.base_url,
            interval_secs = self.config.sync.interval_secs,
            "Starting sync agent"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.tasks.push(self.spawn_status_forwarder(shutdown_rx.clone()));

        let online = self.handle.monitor.check_connection().await;

        self.tasks
            .push(self.handle.monitor.spawn_probe_loop(shutdown_rx.clone()));
        self.tasks.push(self.handle.scheduler.spawn(shutdown_rx));
        self.shutdown_tx = Some(shutdown_tx);

        info!(online, "Sync agent started");
        Ok(())
    }

    /// Stops the sync agent gracefully.
    ///
    /// Background loops stop, a pass already running is allowed to finish,
    /// and later sync requests fail with [`SyncError::ShuttingDown`].
    pub async fn shutdown(&mut self) -> SyncResult<()> {
        info!("Shutting down sync agent");

        self.handle.engine.close();

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                return Err(SyncError::Internal(format!("Sync task panicked: {}", e)));
            }
        }

        self.handle.engine.wait_idle().await;

        info!("Sync agent stopped");
        Ok(())
    }

    pub async fn force_sync(&self) -> SyncResult<SyncAttempt> {
        self.handle.force_sync().await
    }

    pub async fn force_sync_entity(&self, entity_type: EntityType) -> SyncResult<SyncAttempt> {
        self.handle.force_sync_entity(entity_type).await
    }

    pub async fn sync_stats(&self) -> SyncResult<SyncStats> {
        self.handle.sync_stats().await
    }

    pub async fn session(&self) -> SyncSession {
        self.handle.session().await
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.handle.connectivity()
    }

    pub async fn handle_network_signal(&self, signal: NetworkSignal) -> bool {
        self.handle.handle_network_signal(signal).await
    }

    /// Publishes online/offline flips as status events.
    fn spawn_status_forwarder(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let mut connectivity = self.handle.monitor.subscribe();
        let engine = self.handle.engine.clone();
        let emitter = self.emitter.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = connectivity.borrow_and_update().is_online;
                        let status = if online { StatusKind::Online } else { StatusKind::Offline };
                        let last_sync = engine.session().await.last_sync_at;
                        emitter.emit(&SyncEvent::new(status, last_sync));
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Status forwarder stopped");
        })
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating SyncAgent with options.
pub struct SyncAgentBuilder {
    config: SyncConfig,
    local: Option<Arc<dyn LocalStore>>,
    remote: Option<Arc<dyn RemoteGateway>>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
}

impl SyncAgentBuilder {
    /// Creates a new builder with the given config.
    pub fn new(config: SyncConfig) -> Self {
        SyncAgentBuilder {
            config,
            local: None,
            remote: None,
            emitter: None,
        }
    }

    /// Uses the SQLite database as the local store.
    pub fn with_database(mut self, db: Arc<Database>) -> Self {
        self.local = Some(db);
        self
    }

    pub fn with_local_store(mut self, local: Arc<dyn LocalStore>) -> Self {
        self.local = Some(local);
        self
    }

    /// Overrides the HTTP gateway built from the config.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteGateway>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Builds the SyncAgent.
    pub fn build(self) -> SyncResult<SyncAgent> {
        let local = self
            .local
            .ok_or_else(|| SyncError::InvalidConfig("Local store required".into()))?;

        let remote = match self.remote {
            Some(remote) => remote,
            None => Arc::new(HttpRemoteGateway::from_config(&self.config)?),
        };

        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));

        Ok(SyncAgent::with_emitter(self.config, local, remote, emitter))
    }
}
