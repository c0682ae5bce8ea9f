//! Update notifications
//!
//! A [`Notifier`] fans one [`UpdateNotification`] out to every configured
//! [`NotificationSink`]. Delivery failures are logged and counted; they never
//! fail the update that triggered them.

pub mod webhook;

pub use webhook::WebhookSink;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::NotificationsConfig;
use crate::error::Result;
use crate::registry::Digest;
use crate::secret::SecretValue;

/// Outcome being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    /// New digest running.
    Updated,
    /// New digest failed to start; the old one runs again.
    RolledBack,
    /// Update failed and no instance is running.
    Failed,
    UpToDate,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Updated => "updated",
            NotificationStatus::RolledBack => "rolled_back",
            NotificationStatus::Failed => "failed",
            NotificationStatus::UpToDate => "up_to_date",
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message handed to sinks. Carries digests only, never credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateNotification {
    pub stack: String,
    pub vendor: String,
    pub old_digest: Option<Digest>,
    pub new_digest: Option<Digest>,
    pub timestamp: DateTime<Utc>,
    pub status: NotificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl UpdateNotification {
    /// One-line human summary.
    pub fn summary(&self) -> String {
        let short = |d: &Option<Digest>| {
            d.as_ref()
                .map(|d| d.short().to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        let mut line = format!(
            "[{}] {}: {} ({} -> {})",
            self.stack,
            self.vendor,
            self.status,
            short(&self.old_digest),
            short(&self.new_digest)
        );
        if let Some(detail) = &self.detail {
            line.push_str(": ");
            line.push_str(detail);
        }
        line
    }
}

/// Destination for update notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, notification: &UpdateNotification) -> Result<()>;
}

/// Emits notifications as tracing events.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, n: &UpdateNotification) -> Result<()> {
        crate::log_component!(
            info,
            "notify",
            "Update notification",
            stack = n.stack.as_str(),
            vendor = n.vendor.as_str(),
            status = n.status.as_str(),
            old = n.old_digest.as_ref().map(Digest::as_str).unwrap_or("-"),
            new = n.new_digest.as_ref().map(Digest::as_str).unwrap_or("-"),
        );
        Ok(())
    }
}

// ============================================================================
// Notifier
// ============================================================================

pub struct Notifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
    failures: AtomicU64,
}

impl Notifier {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self {
            sinks,
            failures: AtomicU64::new(0),
        }
    }

    /// Log sink always; webhook sink when a URL is configured.
    pub fn from_config(config: &NotificationsConfig) -> Result<Self> {
        let mut sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(LogSink)];
        if let Some(url) = config.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) {
            let token = config
                .webhook_token
                .as_deref()
                .filter(|t| !t.is_empty())
                .map(SecretValue::new);
            sinks.push(Arc::new(WebhookSink::new(
                url,
                token,
                Duration::from_secs(config.timeout_secs.max(1)),
            )?));
        }
        Ok(Self::new(sinks))
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Deliver to every sink. Returns `true` if at least one accepted it.
    pub async fn notify(&self, notification: &UpdateNotification) -> bool {
        let mut delivered = false;
        for sink in &self.sinks {
            match sink.deliver(notification).await {
                Ok(()) => {
                    debug!(sink = sink.name(), vendor = %notification.vendor, "Notification delivered");
                    delivered = true;
                }
                Err(e) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(sink = sink.name(), vendor = %notification.vendor, error = %e, "Notification delivery failed");
                }
            }
        }
        delivered
    }

    /// Delivery failures since start.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use crate::error::BandstackError;
    use std::sync::Mutex;

    /// Keeps every notification; optionally rejects them all.
    #[derive(Default)]
    pub struct RecordingSink {
        received: Mutex<Vec<UpdateNotification>>,
        fail: bool,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                received: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn received(&self) -> Vec<UpdateNotification> {
            self.received.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn deliver(&self, n: &UpdateNotification) -> Result<()> {
            if self.fail {
                return Err(BandstackError::Config("sink offline".into()));
            }
            self.received.lock().unwrap().push(n.clone());
            Ok(())
        }
    }
}
