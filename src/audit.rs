//! Structured audit logging for state-changing operations.
//!
//! Emits structured `tracing` events with consistent field names so that
//! downstream log aggregators can filter on `audit=true` and query by
//! `category`, `event_type`, `severity`, `vendor`. Details never carry
//! credential values.

use tracing::{error, info, warn};

/// Broad category of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditCategory {
    /// Validated credentials written to the store.
    Credentials,
    /// Instance started, restarted or removed by bring-up.
    Deployment,
    /// Image update applied.
    Update,
    /// Update failed and the previous image was restored (or could not be).
    Rollback,
    /// Stack or vendor torn down on request.
    Teardown,
}

impl std::fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Credentials => write!(f, "credentials"),
            Self::Deployment => write!(f, "deployment"),
            Self::Update => write!(f, "update"),
            Self::Rollback => write!(f, "rollback"),
            Self::Teardown => write!(f, "teardown"),
        }
    }
}

/// Severity level for audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditSeverity {
    /// Expected state change.
    Info,
    /// State change after a failure (rollback, retry).
    Warning,
    /// A vendor was left without a running instance.
    Critical,
}

impl std::fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Emit a structured audit event via `tracing`.
///
/// All audit events carry `audit = true` so log pipelines can filter on them.
pub fn log_audit_event(
    category: AuditCategory,
    severity: AuditSeverity,
    event_type: &str,
    vendor: &str,
    detail: &str,
) {
    match severity {
        AuditSeverity::Info => {
            info!(
                audit = true,
                category = %category,
                severity = %severity,
                event_type = event_type,
                vendor = vendor,
                detail = detail,
                "audit event"
            );
        }
        AuditSeverity::Warning => {
            warn!(
                audit = true,
                category = %category,
                severity = %severity,
                event_type = event_type,
                vendor = vendor,
                detail = detail,
                "audit event"
            );
        }
        AuditSeverity::Critical => {
            error!(
                audit = true,
                category = %category,
                severity = %severity,
                event_type = event_type,
                vendor = vendor,
                detail = detail,
                "audit event"
            );
        }
    }
}
