//! Configuration management for Bandstack
//!
//! This module provides configuration loading and saving.
//! Configuration is loaded from `~/.bandstack/config.json` with environment variable overrides.
//! A loaded [`Config`] is an immutable snapshot handed to each component; there is no
//! process-wide config state.

mod types;
pub mod validate;

pub use types::*;

use crate::error::{BandstackError, Result};
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the Bandstack configuration directory path (~/.bandstack)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".bandstack")
    }

    /// Returns the path to the config file (~/.bandstack/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    /// Environment variables can override config values using the pattern:
    /// `BANDSTACK_SECTION_KEY`
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Save configuration as pretty JSON, creating parent directories.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Where validated credentials are persisted.
    pub fn credentials_store_path(&self) -> PathBuf {
        self.credentials
            .store_path
            .clone()
            .unwrap_or_else(|| Self::dir().join("credentials.env"))
    }

    /// Where update records are appended.
    pub fn update_log_path(&self) -> PathBuf {
        self.watcher
            .log_path
            .clone()
            .unwrap_or_else(|| Self::dir().join("updates.jsonl"))
    }

    /// Reject values the orchestrator cannot run with.
    pub fn check(&self) -> Result<()> {
        if self.project.name.trim().is_empty() {
            return Err(BandstackError::Config(
                "project.name must not be empty".into(),
            ));
        }
        if !self
            .project
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(BandstackError::Config(format!(
                "project.name '{}' may only contain letters, digits, '-' and '_'",
                self.project.name
            )));
        }
        if self.watcher.poll_interval_secs == 0 {
            return Err(BandstackError::Config(
                "watcher.poll_interval_secs must be positive".into(),
            ));
        }
        if self.watcher.max_concurrency == 0 {
            return Err(BandstackError::Config(
                "watcher.max_concurrency must be positive".into(),
            ));
        }
        if self.supervisor.backoff_base_secs == 0
            || self.supervisor.backoff_base_secs > self.supervisor.backoff_max_secs
        {
            return Err(BandstackError::Config(format!(
                "supervisor backoff base ({}s) must be positive and not exceed the cap ({}s)",
                self.supervisor.backoff_base_secs, self.supervisor.backoff_max_secs
            )));
        }
        if self.proxies.enabled && self.proxies.urls.is_empty() {
            return Err(BandstackError::Config(
                "proxies.enabled is set but proxies.urls is empty".into(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: BANDSTACK_SECTION_KEY
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("BANDSTACK_PROJECT_NAME") {
            self.project.name = val;
        }
        if let Ok(val) = std::env::var("BANDSTACK_PROJECT_DEVICE_NAME") {
            self.project.device_name = val;
        }
        if let Ok(val) = std::env::var("BANDSTACK_CATALOG") {
            self.catalog = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("BANDSTACK_CREDENTIALS_ENV_FILE") {
            self.credentials.env_file = PathBuf::from(val);
        }

        // Watcher
        if let Ok(val) = std::env::var("BANDSTACK_WATCHER_POLL_INTERVAL_SECS") {
            if let Ok(v) = val.parse() {
                self.watcher.poll_interval_secs = v;
            }
        }
        if let Ok(val) = std::env::var("BANDSTACK_WATCHER_MAX_CONCURRENCY") {
            if let Ok(v) = val.parse() {
                self.watcher.max_concurrency = v;
            }
        }
        if let Ok(val) = std::env::var("BANDSTACK_WATCHER_REGISTRY_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                self.watcher.registry_timeout_secs = v;
            }
        }

        // Supervisor
        if let Ok(val) = std::env::var("BANDSTACK_SUPERVISOR_ENGINE_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                self.supervisor.engine_timeout_secs = v;
            }
        }

        // Notifications
        if let Ok(val) = std::env::var("BANDSTACK_NOTIFICATIONS_WEBHOOK_URL") {
            self.notifications.webhook_url = Some(val);
        }
        if let Ok(val) = std::env::var("BANDSTACK_NOTIFICATIONS_WEBHOOK_TOKEN") {
            self.notifications.webhook_token = Some(val);
        }

        // Logging
        if let Ok(val) = std::env::var("BANDSTACK_LOGGING_LEVEL") {
            self.logging.level = val;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.project.name, "bandstack");
        assert_eq!(config.watcher.poll_interval_secs, 3600);
        assert_eq!(config.watcher.max_concurrency, 4);
        assert_eq!(config.supervisor.backoff_base_secs, 10);
        assert_eq!(config.supervisor.backoff_max_secs, 300);
        assert!(config.vendors.is_empty());
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"vendors": {"earnapp": {"enabled": true}, "honeygain": {}}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.project.name, "bandstack");
        let enabled = config.enabled_vendors();
        assert!(enabled.contains("earnapp"));
        assert!(!enabled.contains("honeygain"));
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.watcher.registry_timeout_secs, 30);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = Config::default();
        config.project.name = "lab".into();
        config
            .vendors
            .insert("repocket".into(), VendorSelection { enabled: true });
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.project.name, "lab");
        assert!(loaded.enabled_vendors().contains("repocket"));
    }

    #[test]
    fn test_invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn test_check_rejects_zero_interval() {
        let mut config = Config::default();
        config.watcher.poll_interval_secs = 0;
        assert!(config.check().is_err());
    }

    #[test]
    fn test_check_rejects_inverted_backoff() {
        let mut config = Config::default();
        config.supervisor.backoff_base_secs = 600;
        assert!(config.check().is_err());
    }

    #[test]
    fn test_check_rejects_bad_project_name() {
        let mut config = Config::default();
        config.project.name = "my stack".into();
        assert!(config.check().is_err());
    }

    #[test]
    fn test_check_rejects_proxies_without_urls() {
        let mut config = Config::default();
        config.proxies.enabled = true;
        assert!(config.check().is_err());
        config.proxies.urls.push("socks5://10.0.0.2:1080".into());
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_derived_paths() {
        let config = Config::default();
        assert!(config.credentials_store_path().ends_with("credentials.env"));
        assert!(config.update_log_path().ends_with("updates.jsonl"));
    }

    #[test]
    fn test_default_arch_map() {
        let system = SystemConfig::default();
        assert_eq!(system.arch_map.get("x86_64").map(String::as_str), Some("amd64"));
        assert_eq!(system.arch_map.get("aarch64").map(String::as_str), Some("arm64"));
    }
}
