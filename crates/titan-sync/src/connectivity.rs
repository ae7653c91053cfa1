//! # Connectivity Monitor
//!
//! Single source of truth for "is the backend usable right now".
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Connectivity State Machine                           │
//! │                                                                         │
//! │            probe ok                         probe failed               │
//! │         ┌──────────┐                    ┌──────────────┐               │
//! │         │          ▼                    │              ▼               │
//! │      ┌──┴─────────────┐  probe failed  ┌┴───────────────────┐          │
//! │      │     ONLINE     │ ─────────────► │      OFFLINE       │          │
//! │      │                │  signal down   │                    │          │
//! │      │ probe every    │  pass failed   │ probe after        │          │
//! │      │ probe_interval │ ◄───────────── │ 1s, 2s, 4s … cap   │          │
//! │      └────────────────┘    probe ok    └────────────────────┘          │
//! │                                                                         │
//! │  • host "network available" never flips online by itself; a probe     │
//! │    has to confirm the backend answers                                  │
//! │  • subscribers are woken only when is_online flips                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ts_rs::TS;

use crate::config::SyncConfig;
use crate::gateway::RemoteGateway;

// =============================================================================
// State
// =============================================================================

/// Snapshot of backend reachability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
    pub is_online: bool,

    #[ts(as = "Option<String>")]
    pub last_checked_at: Option<DateTime<Utc>>,

    /// Failed probes since the last success.
    pub consecutive_failures: u32,
}

/// Host-level network notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkSignal {
    Available,
    Unavailable,
}

impl std::fmt::Display for NetworkSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkSignal::Available => write!(f, "available"),
            NetworkSignal::Unavailable => write!(f, "unavailable"),
        }
    }
}

// =============================================================================
// Probe Settings
// =============================================================================

/// Timing of the reachability probe.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Bound for one health check.
    pub timeout: Duration,

    /// Cadence while online.
    pub interval: Duration,

    /// First delay after going offline.
    pub initial_backoff: Duration,

    /// Cap for the offline delay.
    pub max_backoff: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        ProbeSettings {
            timeout: Duration::from_secs(5),
            interval: Duration::from_secs(30),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl From<&SyncConfig> for ProbeSettings {
    fn from(config: &SyncConfig) -> Self {
        ProbeSettings {
            timeout: config.probe_timeout(),
            interval: config.probe_interval(),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
        }
    }
}

/// Offline probe delay: doubles from `initial_backoff` up to `max_backoff`,
/// without jitter, and starts over after a successful probe.
#[derive(Debug)]
pub struct ProbeBackoff {
    inner: ExponentialBackoff,
    cap: Duration,
}

impl ProbeBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let mut inner = ExponentialBackoff {
            initial_interval: initial,
            max_interval: max,
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: None, // No limit on total time
            ..Default::default()
        };
        inner.reset();

        ProbeBackoff { inner, cap: max }
    }

    pub fn next_delay(&mut self) -> Duration {
        self.inner.next_backoff().unwrap_or(self.cap)
    }

    pub fn reset(&mut self) {
        self.inner.reset();
    }
}

// =============================================================================
// Monitor
// =============================================================================

/// Tracks backend reachability and publishes it on a watch channel.
pub struct ConnectivityMonitor {
    remote: Arc<dyn RemoteGateway>,
    settings: ProbeSettings,
    state_tx: watch::Sender<ConnectivityState>,
    backoff: Mutex<ProbeBackoff>,
}

impl ConnectivityMonitor {
    /// Creates a monitor that starts offline until the first probe.
    pub fn new(remote: Arc<dyn RemoteGateway>, settings: ProbeSettings) -> Self {
        let (state_tx, _) = watch::channel(ConnectivityState::default());
        let backoff = ProbeBackoff::new(settings.initial_backoff, settings.max_backoff);

        ConnectivityMonitor {
            remote,
            settings,
            state_tx,
            backoff: Mutex::new(backoff),
        }
    }

    /// Receiver woken on every online/offline flip.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectivityState {
        self.state_tx.borrow().clone()
    }

    pub fn is_online(&self) -> bool {
        self.state_tx.borrow().is_online
    }

    /// Probes the health endpoint within the probe timeout.
    ///
    /// Returns `false` on timeout or an unhealthy answer; never errors.
    pub async fn check_connection(&self) -> bool {
        let healthy = matches!(
            tokio::time::timeout(self.settings.timeout, self.remote.health_check()).await,
            Ok(true)
        );

        if healthy {
            self.backoff.lock().await.reset();
            self.record_probe(true, None);
        } else {
            self.record_probe(false, Some("health check failed"));
        }
        healthy
    }

    /// Fast path for host network notifications.
    ///
    /// `Unavailable` goes offline at once; `Available` only goes online if
    /// the probe confirms it.
    pub async fn handle_network_signal(&self, signal: NetworkSignal) -> bool {
        debug!(%signal, "Network signal");
        match signal {
            NetworkSignal::Unavailable => {
                self.set_offline("host network unavailable");
                false
            }
            NetworkSignal::Available => self.check_connection().await,
        }
    }

    /// Flips offline after a pass failed to reach the backend.
    pub fn mark_unreachable(&self, reason: &str) {
        self.set_offline(reason);
    }

    /// Delay before the next scheduled probe.
    pub async fn next_probe_delay(&self) -> Duration {
        if self.is_online() {
            self.settings.interval
        } else {
            self.backoff.lock().await.next_delay()
        }
    }

    /// Spawns the probe loop; it exits when `shutdown` turns true.
    pub fn spawn_probe_loop(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                let delay = monitor.next_probe_delay().await;

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        monitor.check_connection().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Probe loop stopped");
        })
    }

    fn set_offline(&self, reason: &str) {
        self.state_tx.send_if_modified(|state| {
            state.last_checked_at = Some(Utc::now());
            if state.is_online {
                warn!(%reason, "Backend unreachable, going offline");
                state.is_online = false;
                true
            } else {
                false
            }
        });
    }

    fn record_probe(&self, healthy: bool, reason: Option<&str>) {
        self.state_tx.send_if_modified(|state| {
            state.last_checked_at = Some(Utc::now());

            if healthy {
                state.consecutive_failures = 0;
                if !state.is_online {
                    info!("Backend reachable, going online");
                    state.is_online = true;
                    return true;
                }
                return false;
            }

            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            if state.is_online {
                warn!(
                    reason = reason.unwrap_or("probe failed"),
                    failures = state.consecutive_failures,
                    "Backend unreachable, going offline"
                );
                state.is_online = false;
                return true;
            }
            debug!(failures = state.consecutive_failures, "Backend still unreachable");
            false
        });
    }
}
