//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TITAN_API_URL=https://api.example.com/v1                           │
//! │     TITAN_DEVICE_ID=abc-123                                            │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/pos/sync.toml (Linux)                                    │
//! │     ~/Library/Application Support/com.titan.pos/sync.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     5 minute interval, server-wins conflicts, generated device_id      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Register 1"
//!
//! [api]
//! base_url = "https://api.example.com/v1"
//! request_timeout_secs = 15
//!
//! [sync]
//! interval_secs = 300
//! settle_delay_ms = 2000
//! max_rejections = 5
//!
//! [conflicts]
//! product = "server_wins"
//! customer = "merge"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::resolver::ConflictStrategy;
use titan_core::EntityType;

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name (e.g., "Register 1").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "POS Terminal".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Backend Settings
// =============================================================================

/// How to reach the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL; entity endpoints are resolved relative to it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent with every request, if set.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Upper bound for one create/update/list call (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Upper bound for one reachability probe (seconds).
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080/api/v1".to_string()
}
fn default_request_timeout() -> u64 {
    15
}
fn default_probe_timeout() -> u64 {
    5
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: default_base_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Master switch; when false the scheduler never starts.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Periodic pass interval (seconds).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Delay between reconnect and the immediate pass (milliseconds).
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,

    /// Probe cadence while online (seconds).
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// First probe delay after going offline (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Cap for the offline probe delay (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Records requested per download page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Rejections after which a record is parked as permanently failed.
    #[serde(default = "default_max_rejections")]
    pub max_rejections: u32,
}

fn default_true() -> bool {
    true
}
fn default_interval() -> u64 {
    300
}
fn default_settle_delay() -> u64 {
    2_000
}
fn default_probe_interval() -> u64 {
    30
}
fn default_initial_backoff() -> u64 {
    1_000
}
fn default_max_backoff() -> u64 {
    300
}
fn default_page_size() -> usize {
    100
}
fn default_max_rejections() -> u32 {
    5
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            enabled: true,
            interval_secs: default_interval(),
            settle_delay_ms: default_settle_delay(),
            probe_interval_secs: default_probe_interval(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            page_size: default_page_size(),
            max_rejections: default_max_rejections(),
        }
    }
}

// =============================================================================
// Conflict Settings
// =============================================================================

/// Conflict strategy for the mutable entity types.
///
/// Transactions have no setting: they are settled by duplicate detection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSettings {
    #[serde(default)]
    pub product: ConflictStrategy,

    #[serde(default)]
    pub customer: ConflictStrategy,
}

impl ConflictSettings {
    /// Returns the strategy configured for an entity type.
    pub fn strategy_for(&self, entity_type: EntityType) -> ConflictStrategy {
        match entity_type {
            EntityType::Product => self.product,
            EntityType::Customer => self.customer,
            // never consulted, see ConflictResolver::resolve
            EntityType::Transaction => ConflictStrategy::default(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Device-specific configuration.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Backend access.
    #[serde(default)]
    pub api: ApiSettings,

    /// Sync behavior settings.
    #[serde(default)]
    pub sync: SyncSettings,

    /// Conflict strategies.
    #[serde(default)]
    pub conflicts: ConflictSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        let url = Url::parse(&self.api.base_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "API URL must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        if self.api.request_timeout_secs == 0 || self.api.probe_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request and probe timeouts must be greater than 0".into(),
            ));
        }

        if self.sync.interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "interval_secs must be greater than 0".into(),
            ));
        }

        if self.sync.probe_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "probe_interval_secs must be greater than 0".into(),
            ));
        }

        if self.sync.page_size == 0 {
            return Err(SyncError::InvalidConfig(
                "page_size must be greater than 0".into(),
            ));
        }

        if self.sync.max_rejections == 0 {
            return Err(SyncError::InvalidConfig(
                "max_rejections must be greater than 0".into(),
            ));
        }

        if self.sync.initial_backoff_ms == 0
            || Duration::from_millis(self.sync.initial_backoff_ms) > self.max_backoff()
        {
            return Err(SyncError::InvalidConfig(
                "initial_backoff_ms must be positive and not exceed max_backoff_secs".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("TITAN_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Some(url) = lookup("TITAN_API_URL") {
            debug!(url = %url, "Overriding API URL from environment");
            self.api.base_url = url;
        }

        if let Some(key) = lookup("TITAN_API_KEY") {
            debug!("Overriding API key from environment");
            self.api.api_key = Some(key);
        }

        if let Some(secs) = lookup("TITAN_SYNC_INTERVAL_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => {
                    debug!(interval_secs = s, "Overriding sync interval from environment");
                    self.sync.interval_secs = s;
                }
                Err(_) => warn!(value = %secs, "Ignoring invalid TITAN_SYNC_INTERVAL_SECS"),
            }
        }

        if let Some(enabled) = lookup("TITAN_SYNC_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.sync.enabled = true,
                "0" | "false" | "no" | "off" => self.sync.enabled = false,
                _ => warn!(value = %enabled, "Ignoring invalid TITAN_SYNC_ENABLED"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "titan", "pos").map(|dirs| {
            let config_dir = dirs.config_dir();
            config_dir.join("sync.toml")
        })
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the device ID.
    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Returns true if sync is enabled.
    pub fn is_sync_enabled(&self) -> bool {
        self.sync.enabled
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.sync.settle_delay_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.sync.probe_interval_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.sync.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.sync.max_backoff_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.api.probe_timeout_secs)
    }
}
