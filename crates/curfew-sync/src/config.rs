//! # Bridge Configuration
//!
//! Configuration management for the sync daemon.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     CURFEW_CHILD_NAME=emma                                             │
//! │     CURFEW_SYNC_INTERVAL_SECS=120                                      │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/curfew-bridge/bridge.toml (Linux)                        │
//! │     ~/Library/Application Support/com.curfew.bridge/bridge.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │                                                                         │
//! │  Validated once at startup; out-of-range values are fatal.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # bridge.toml
//! [child]
//! name = "Emma"          # matched case-insensitively; empty = first child
//!
//! [sync]
//! interval_secs = 300
//! debounce_ms = 2000
//! call_timeout_secs = 30
//!
//! [auth]
//! bundle_path = "/data/auth.json"
//! refresh_margin_secs = 14400
//!
//! [limits]
//! step = 15
//! min = 0
//! max = 480
//!
//! [bus]
//! discovery_prefix = "homeassistant"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use curfew_core::{AuthPolicy, MinuteGrid, DEFAULT_REQUIRED_ARTIFACTS};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Child
// =============================================================================

/// Which child account the bridge controls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChildConfig {
    /// Display name to match against the dashboard's child list.
    #[serde(default)]
    pub name: String,

    /// Skips resolution entirely when set.
    #[serde(default)]
    pub id: Option<String>,

    /// Prefix for bus unique ids. Derived from `name` when unset.
    #[serde(default)]
    pub slug: Option<String>,
}

impl ChildConfig {
    /// Lowercase `[a-z0-9_]` slug used to prefix entity unique ids.
    pub fn slug(&self) -> String {
        if let Some(slug) = &self.slug {
            return slug.clone();
        }
        let derived: String = self
            .name
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();
        let derived = derived.trim_matches('_').to_string();
        if derived.is_empty() {
            "child".to_string()
        } else {
            derived
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Scheduling and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Full sync period.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Quiet window for coalescing bus commands.
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,

    /// Upper bound on any single dashboard call.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Attempts per call for transient failures (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Consecutive transient pass failures before `Degraded(Unreachable)`.
    #[serde(default = "default_unreachable_ticks")]
    pub unreachable_ticks_before_degraded: u32,

    /// Failed passes after which the cached child profile is re-resolved.
    #[serde(default = "default_child_stale_after")]
    pub child_stale_after_failures: u32,
}

fn default_interval() -> u64 {
    300
}
fn default_debounce() -> u64 {
    2000
}
fn default_call_timeout() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    1000
}
fn default_max_backoff() -> u64 {
    30_000
}
fn default_unreachable_ticks() -> u32 {
    3
}
fn default_child_stale_after() -> u32 {
    3
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            debounce_ms: default_debounce(),
            call_timeout_secs: default_call_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            unreachable_ticks_before_degraded: default_unreachable_ticks(),
            child_stale_after_failures: default_child_stale_after(),
        }
    }
}

// =============================================================================
// Auth Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Storage-state JSON file. Defaults to `auth.json` in the data dir.
    #[serde(default)]
    pub bundle_path: Option<PathBuf>,

    /// Refresh this long before the earliest required expiry.
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,

    #[serde(default = "default_required_artifacts")]
    pub required_artifacts: Vec<String>,

    /// Upper bound on a login/refresh call.
    #[serde(default = "default_login_timeout")]
    pub login_timeout_secs: u64,
}

fn default_refresh_margin() -> u64 {
    4 * 60 * 60
}
fn default_required_artifacts() -> Vec<String> {
    DEFAULT_REQUIRED_ARTIFACTS.iter().map(|s| s.to_string()).collect()
}
fn default_login_timeout() -> u64 {
    120
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            bundle_path: None,
            refresh_margin_secs: default_refresh_margin(),
            required_artifacts: default_required_artifacts(),
            login_timeout_secs: default_login_timeout(),
        }
    }
}

// =============================================================================
// Limits & Bus
// =============================================================================

/// Minute grid accepted by the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitSettings {
    #[serde(default = "default_step")]
    pub step: u32,
    #[serde(default)]
    pub min: u32,
    #[serde(default = "default_max_minutes")]
    pub max: u32,
}

fn default_step() -> u32 {
    15
}
fn default_max_minutes() -> u32 {
    480
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            step: default_step(),
            min: 0,
            max: default_max_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSettings {
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
    #[serde(default = "default_device_name")]
    pub device_name: String,
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}
fn default_device_name() -> String {
    "Parental Controls".to_string()
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            discovery_prefix: default_discovery_prefix(),
            device_name: default_device_name(),
        }
    }
}

// =============================================================================
// Main Config Structure
// =============================================================================

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub child: ChildConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub limits: LimitSettings,
    #[serde(default)]
    pub bus: BusSettings,
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (bridge.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading bridge config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| SyncError::ConfigLoadFailed(e.to_string()))?;
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
            warn!("Failed to load bridge config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Bridge config saved");
        Ok(())
    }

    /// Validates every range once. Any failure is a startup error.
    pub fn validate(&self) -> SyncResult<()> {
        let sync = &self.sync;

        if !(10..=86_400).contains(&sync.interval_secs) {
            return Err(SyncError::InvalidConfig(format!(
                "sync.interval_secs must be between 10 and 86400, got {}",
                sync.interval_secs
            )));
        }
        if sync.debounce_ms > 60_000 || sync.debounce_ms >= sync.interval_secs * 1000 {
            return Err(SyncError::InvalidConfig(format!(
                "sync.debounce_ms must be at most 60000 and below the sync interval, got {}",
                sync.debounce_ms
            )));
        }
        if !(1..=300).contains(&sync.call_timeout_secs) {
            return Err(SyncError::InvalidConfig(format!(
                "sync.call_timeout_secs must be between 1 and 300, got {}",
                sync.call_timeout_secs
            )));
        }
        if !(1..=10).contains(&sync.max_attempts) {
            return Err(SyncError::InvalidConfig(format!(
                "sync.max_attempts must be between 1 and 10, got {}",
                sync.max_attempts
            )));
        }
        if sync.initial_backoff_ms == 0 || sync.initial_backoff_ms > sync.max_backoff_ms {
            return Err(SyncError::InvalidConfig(
                "sync.initial_backoff_ms must be positive and not exceed max_backoff_ms".into(),
            ));
        }
        if sync.unreachable_ticks_before_degraded == 0 || sync.child_stale_after_failures == 0 {
            return Err(SyncError::InvalidConfig(
                "failure thresholds must be greater than 0".into(),
            ));
        }

        if self.auth.refresh_margin_secs > 7 * 24 * 60 * 60 {
            return Err(SyncError::InvalidConfig(format!(
                "auth.refresh_margin_secs must be at most one week, got {}",
                self.auth.refresh_margin_secs
            )));
        }
        if self.auth.required_artifacts.iter().any(|n| n.trim().is_empty()) {
            return Err(SyncError::InvalidConfig(
                "auth.required_artifacts must not contain empty names".into(),
            ));
        }
        if self.auth.login_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "auth.login_timeout_secs must be greater than 0".into(),
            ));
        }

        MinuteGrid::new(self.limits.step, self.limits.min, self.limits.max)
            .map_err(|e| SyncError::InvalidConfig(format!("limits: {e}")))?;

        let slug = self.child.slug();
        if !slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(SyncError::InvalidConfig(format!(
                "child.slug must be lowercase [a-z0-9_], got '{slug}'"
            )));
        }
        if self.bus.discovery_prefix.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "bus.discovery_prefix must not be empty".into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies `CURFEW_*` overrides from any lookup (environment in
    /// production, a map in tests).
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(name) = lookup("CURFEW_CHILD_NAME") {
            debug!(child = %name, "Overriding child name from environment");
            self.child.name = name;
        }
        if let Some(id) = lookup("CURFEW_CHILD_ID") {
            self.child.id = Some(id);
        }
        if let Some(path) = lookup("CURFEW_AUTH_BUNDLE_PATH") {
            debug!(path = %path, "Overriding auth bundle path from environment");
            self.auth.bundle_path = Some(PathBuf::from(path));
        }

        let numeric = |key: &str, target: &mut u64| {
            if let Some(raw) = lookup(key) {
                match raw.parse::<u64>() {
                    Ok(v) => *target = v,
                    Err(_) => warn!(key, value = %raw, "Ignoring non-numeric override"),
                }
            }
        };
        numeric("CURFEW_SYNC_INTERVAL_SECS", &mut self.sync.interval_secs);
        numeric("CURFEW_DEBOUNCE_MS", &mut self.sync.debounce_ms);
        numeric("CURFEW_CALL_TIMEOUT_SECS", &mut self.sync.call_timeout_secs);
        numeric("CURFEW_REFRESH_MARGIN_SECS", &mut self.auth.refresh_margin_secs);
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "curfew", "bridge")
            .map(|dirs| dirs.config_dir().join("bridge.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.sync.debounce_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.call_timeout_secs)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.auth.login_timeout_secs)
    }

    /// The validated minute grid. Falls back to the default grid only if
    /// called on an unvalidated config.
    pub fn grid(&self) -> MinuteGrid {
        MinuteGrid::new(self.limits.step, self.limits.min, self.limits.max).unwrap_or_default()
    }

    pub fn auth_policy(&self) -> AuthPolicy {
        AuthPolicy {
            required: self.auth.required_artifacts.clone(),
            refresh_margin: chrono::Duration::seconds(self.auth.refresh_margin_secs as i64),
        }
    }

    /// Explicit bundle path, or `auth.json` in the platform data dir.
    pub fn bundle_path(&self) -> Option<PathBuf> {
        self.auth.bundle_path.clone().or_else(|| {
            directories::ProjectDirs::from("com", "curfew", "bridge")
                .map(|dirs| dirs.data_dir().join("auth.json"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.sync.interval_secs, 300);
        assert_eq!(config.sync.debounce_ms, 2000);
        assert_eq!(config.auth.refresh_margin_secs, 14_400);
        assert_eq!(config.grid(), MinuteGrid::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = BridgeConfig::default();
        config.sync.interval_secs = 1;
        assert!(config.validate().unwrap_err().is_config_error());

        let mut config = BridgeConfig::default();
        config.limits.step = 0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.limits.max = 5000;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.sync.debounce_ms = 400_000;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.child.slug = Some("Emma Rose".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_child_slug() {
        let mut child = ChildConfig {
            name: "Emma Rose".to_string(),
            ..ChildConfig::default()
        };
        assert_eq!(child.slug(), "emma_rose");
        child.name = String::new();
        assert_eq!(child.slug(), "child");
        child.slug = Some("kid1".to_string());
        assert_eq!(child.slug(), "kid1");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CURFEW_CHILD_NAME", "Leo"),
            ("CURFEW_SYNC_INTERVAL_SECS", "120"),
            ("CURFEW_DEBOUNCE_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let mut config = BridgeConfig::default();
        config.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.child.name, "Leo");
        assert_eq!(config.sync.interval_secs, 120);
        assert_eq!(config.sync.debounce_ms, 2000);
    }

    #[test]
    fn test_toml_round_trip() {
        let toml_str = r#"
            [child]
            name = "Emma"

            [limits]
            step = 30
            max = 360
        "#;
        let config: BridgeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.child.name, "Emma");
        assert_eq!(config.limits.step, 30);
        assert_eq!(config.limits.min, 0);
        assert_eq!(config.sync.interval_secs, 300);

        let rendered = toml::to_string_pretty(&config).unwrap();
        assert!(rendered.contains("[child]"));
        assert!(rendered.contains("[limits]"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bridge.toml");
        let mut config = BridgeConfig::default();
        config.child.name = "Emma".to_string();
        config.save(Some(path.clone())).unwrap();

        let loaded = BridgeConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.child.name, "Emma");
    }
}
