//! # Sync Scheduler
//!
//! Decides when passes run.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Scheduler State Machine                           │
//! │                                                                         │
//! │   ┌──────────┐   went online    ┌──────────┐                            │
//! │   │ STOPPED  │ ───────────────► │ RUNNING  │ ── every interval ──► pass │
//! │   │          │ ◄─────────────── │          │ ── settle after          │
//! │   └──────────┘   went offline   └──────────┘    reconnect ───────► pass │
//! │                  or shutdown                                            │
//! │                                                                         │
//! │  • nothing touches the network while STOPPED                           │
//! │  • reconnect flapping inside the settle window re-arms the timer,      │
//! │    so it still produces one pass                                       │
//! │  • a pass that cannot reach the backend flips the monitor offline      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use titan_core::EntityType;

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::engine::{SyncAttempt, SyncEngine};
use crate::error::SyncResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Running,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Time between periodic passes.
    pub interval: Duration,

    /// Wait after a reconnect before the catch-up pass.
    pub settle_delay: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            interval: Duration::from_secs(300),
            settle_delay: Duration::from_secs(2),
        }
    }
}

impl From<&SyncConfig> for SchedulerSettings {
    fn from(config: &SyncConfig) -> Self {
        SchedulerSettings {
            interval: config.interval(),
            settle_delay: config.settle_delay(),
        }
    }
}

pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    monitor: Arc<ConnectivityMonitor>,
    settings: SchedulerSettings,
    state_tx: watch::Sender<SchedulerState>,
}

impl SyncScheduler {
    pub fn new(
        engine: Arc<SyncEngine>,
        monitor: Arc<ConnectivityMonitor>,
        settings: SchedulerSettings,
    ) -> Self {
        let (state_tx, _) = watch::channel(SchedulerState::Stopped);
        SyncScheduler {
            engine,
            monitor,
            settings,
            state_tx,
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state_tx.borrow()
    }

    /// Runs a full pass now, unless the backend is unreachable.
    pub async fn trigger(&self) -> SyncResult<SyncAttempt> {
        self.run_pass(None).await
    }

    /// Runs a pass over one entity type now.
    pub async fn trigger_entity(&self, entity_type: EntityType) -> SyncResult<SyncAttempt> {
        self.run_pass(Some(entity_type)).await
    }

    async fn run_pass(&self, scope: Option<EntityType>) -> SyncResult<SyncAttempt> {
        if !self.monitor.is_online() {
            debug!("Backend offline, pass not attempted");
            return Ok(SyncAttempt::Offline);
        }

        let attempt = match scope {
            None => self.engine.sync_all().await?,
            Some(entity_type) => self.engine.sync_entity(entity_type).await?,
        };

        if let SyncAttempt::Completed(ref report) = attempt {
            if report.hit_network_failure() {
                self.monitor
                    .mark_unreachable("sync pass could not reach the backend");
            }
        }
        Ok(attempt)
    }

    fn spawn_pass(self: &Arc<Self>, reason: &'static str) {
        let scheduler = Arc::clone(self);

        tokio::spawn(async move {
            debug!(reason, "Scheduled pass");
            match scheduler.run_pass(None).await {
                Ok(SyncAttempt::AlreadySyncing) => debug!(reason, "Pass already running, trigger dropped"),
                Ok(_) => {}
                Err(e) => warn!(reason, error = %e, "Scheduled pass failed"),
            }
        });
    }

    fn set_state(&self, state: SchedulerState) {
        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    /// Spawns the scheduling loop; it exits when `shutdown` turns true.
    pub fn spawn(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);

        tokio::spawn(async move {
            let period = scheduler.settings.interval;
            let settle_delay = scheduler.settings.settle_delay;

            let mut connectivity = scheduler.monitor.subscribe();
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let settle = tokio::time::sleep(settle_delay);
            tokio::pin!(settle);

            // already online at start counts as a reconnect
            let mut online = connectivity.borrow_and_update().is_online;
            let mut settle_armed = online;
            if online {
                scheduler.set_state(SchedulerState::Running);
            }
            info!(interval_secs = period.as_secs(), online, "Sync scheduler started");

            loop {
                if *shutdown.borrow() {
                    break;
                }

                tokio::select! {
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let now_online = connectivity.borrow_and_update().is_online;

                        if now_online && !online {
                            info!(settle_ms = settle_delay.as_millis() as u64, "Backend reachable, catch-up pass after settle delay");
                            scheduler.set_state(SchedulerState::Running);
                            settle.as_mut().reset(Instant::now() + settle_delay);
                            settle_armed = true;
                            ticker.reset();
                        } else if !now_online && online {
                            info!("Backend unreachable, scheduler paused");
                            scheduler.set_state(SchedulerState::Stopped);
                            settle_armed = false;
                        }
                        online = now_online;
                    }

                    _ = &mut settle, if settle_armed => {
                        settle_armed = false;
                        scheduler.spawn_pass("reconnect");
                    }

                    _ = ticker.tick(), if online => {
                        scheduler.spawn_pass("interval");
                    }

                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            scheduler.set_state(SchedulerState::Stopped);
            info!("Sync scheduler stopped");
        })
    }
}
