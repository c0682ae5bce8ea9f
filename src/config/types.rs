//! Configuration type definitions for Bandstack
//!
//! This module defines all configuration structs used throughout the orchestrator.
//! All types implement serde traits for JSON serialization and have sensible defaults.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Main configuration struct for Bandstack
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Project naming (stack name, device name)
    pub project: ProjectConfig,
    /// Optional path to a deployment descriptor (catalog) overriding the built-in one
    pub catalog: Option<PathBuf>,
    /// Where credentials are read from and persisted to
    pub credentials: CredentialsConfig,
    /// Per-vendor enable/disable selection
    pub vendors: BTreeMap<String, VendorSelection>,
    /// Update watcher settings
    pub watcher: WatcherConfig,
    /// Lifecycle supervisor settings
    pub supervisor: SupervisorConfig,
    /// Notification sink settings
    pub notifications: NotificationsConfig,
    /// Additional proxied stack instances
    pub proxies: ProxiesConfig,
    /// Host platform mapping tables
    pub system: SystemConfig,
    /// Logging output
    pub logging: LoggingConfig,
}

impl Config {
    /// Immutable snapshot of the vendors switched on in this config.
    pub fn enabled_vendors(&self) -> BTreeSet<String> {
        self.vendors
            .iter()
            .filter(|(_, sel)| sel.enabled)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

// ============================================================================
// Project
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Base stack name; container names are `<stack>-<vendor>`.
    pub name: String,
    /// Device name reported to vendors that ask for one.
    pub device_name: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "bandstack".to_string(),
            device_name: "bandstack-node".to_string(),
        }
    }
}

// ============================================================================
// Credentials
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// User-edited env file read on every `up` (default `./.env`).
    pub env_file: PathBuf,
    /// Validated credentials persisted for reuse (default `~/.bandstack/credentials.env`).
    pub store_path: Option<PathBuf>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            env_file: PathBuf::from(".env"),
            store_path: None,
        }
    }
}

// ============================================================================
// Vendors
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct VendorSelection {
    pub enabled: bool,
}

// ============================================================================
// Watcher
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Seconds between poll cycles.
    pub poll_interval_secs: u64,
    /// Maximum vendors checked at the same time.
    pub max_concurrency: usize,
    /// Timeout for one registry digest fetch.
    pub registry_timeout_secs: u64,
    /// Also notify when a check finds nothing new.
    pub notify_on_up_to_date: bool,
    /// Update record log (default `~/.bandstack/updates.jsonl`).
    pub log_path: Option<PathBuf>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 3600,
            max_concurrency: 4,
            registry_timeout_secs: 30,
            notify_on_up_to_date: false,
            log_path: None,
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Timeout for a single container engine call.
    pub engine_timeout_secs: u64,
    /// Timeout for an image pull, which moves far more data than other calls.
    pub pull_timeout_secs: u64,
    /// A started instance must stay up this long to count as started.
    pub start_grace_secs: u64,
    /// Immediate retries before a failure is reported.
    pub immediate_retries: u32,
    /// Base delay for restart backoff.
    pub backoff_base_secs: u64,
    /// Cap for restart backoff.
    pub backoff_max_secs: u64,
    /// Seconds between health sweeps in `watch` mode.
    pub health_interval_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            engine_timeout_secs: 60,
            pull_timeout_secs: 600,
            start_grace_secs: 15,
            immediate_retries: 2,
            backoff_base_secs: 10,
            backoff_max_secs: 300,
            health_interval_secs: 30,
        }
    }
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Webhook receiving JSON update notifications. None disables delivery.
    pub webhook_url: Option<String>,
    /// Optional bearer token sent with webhook requests.
    pub webhook_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_token: None,
            timeout_secs: 10,
        }
    }
}

// ============================================================================
// Proxies
// ============================================================================

/// Extra stack instances, one per proxy, each egressing through its proxy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProxiesConfig {
    pub enabled: bool,
    pub urls: Vec<String>,
}

// ============================================================================
// System
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Rust OS name -> reported OS type.
    pub os_map: BTreeMap<String, String>,
    /// Rust arch name -> docker platform architecture.
    pub arch_map: BTreeMap<String, String>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let os_map = [
            ("linux", "linux"),
            ("macos", "macos"),
            ("windows", "windows"),
        ];
        let arch_map = [
            ("x86_64", "amd64"),
            ("x86", "386"),
            ("aarch64", "arm64"),
            ("arm", "arm/v7"),
        ];
        Self {
            os_map: os_map
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            arch_map: arch_map
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Output format for tracing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human readable output.
    Pretty,
    /// Compact one-line output; pairs with `log_component!`.
    #[default]
    Component,
    /// JSON lines for log aggregators.
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Append logs to this file instead of stderr.
    pub file: Option<String>,
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Component,
            file: None,
            level: "info".to_string(),
        }
    }
}
