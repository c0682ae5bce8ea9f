//! Error types for Bandstack
//!
//! This module defines the error taxonomy used throughout the orchestrator.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.
//!
//! The four domain errors map onto how a failure is handled:
//! - [`ValidationErrors`]: bad or missing user config, fatal during setup
//! - [`PlanError`]: config and catalog disagree, surfaced with diagnostics
//! - [`DeployError`]: container engine failure for one vendor, retried with backoff
//! - [`RegistryError`]: transient update-check failure, retried next poll cycle

use std::fmt;
use thiserror::Error;

// ============================================================================
// Validation
// ============================================================================

/// Why a single credential field failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationReason {
    /// Required field not supplied at all.
    Missing,
    /// Field supplied but blank.
    Empty,
    /// Value does not start with the expected prefix.
    BadPrefix { expected: String },
    /// Value is not a UUID.
    NotUuid,
    /// Value does not match the field's pattern.
    PatternMismatch { pattern: String },
    /// Value is shorter than allowed.
    TooShort { min: usize },
    /// Vendor enabled in config but absent from the catalog.
    UnknownVendor,
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationReason::Missing => write!(f, "missing"),
            ValidationReason::Empty => write!(f, "empty"),
            ValidationReason::BadPrefix { expected } => {
                write!(f, "must start with '{}'", expected)
            }
            ValidationReason::NotUuid => write!(f, "not a valid UUID"),
            ValidationReason::PatternMismatch { pattern } => {
                write!(f, "does not match pattern {}", pattern)
            }
            ValidationReason::TooShort { min } => {
                write!(f, "must be at least {} characters", min)
            }
            ValidationReason::UnknownVendor => write!(f, "unknown vendor"),
        }
    }
}

/// A single invalid credential field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub vendor: String,
    pub field: String,
    pub reason: ValidationReason,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.vendor, self.field, self.reason)
    }
}

/// Every invalid field found in one materialization pass.
///
/// Never empty when returned as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    /// Returns the errors as a slice.
    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }

    /// Find the first error for the given field name.
    pub fn for_field(&self, field: &str) -> Option<&ValidationError> {
        self.0.iter().find(|e| e.field == field)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} invalid field(s)", self.0.len())?;
        for err in &self.0 {
            write!(f, "\n  - {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

// ============================================================================
// Planning
// ============================================================================

/// Inconsistency between the credential set and the catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// Enabled vendor lacks a required credential (stale or partial config).
    #[error("vendor '{vendor}' is enabled but field '{missing_field}' is absent")]
    MissingField {
        vendor: String,
        missing_field: String,
    },

    /// Enabled vendor is not in the catalog.
    #[error("vendor '{vendor}' is not in the catalog")]
    UnknownVendor { vendor: String },

    /// Template references a placeholder that cannot be resolved.
    #[error("vendor '{vendor}' template references unknown placeholder '{placeholder}'")]
    Template { vendor: String, placeholder: String },
}

// ============================================================================
// Deployment
// ============================================================================

/// A container engine operation failed for one vendor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("deploy of '{vendor}' failed: {reason}")]
pub struct DeployError {
    pub vendor: String,
    pub reason: String,
}

impl DeployError {
    pub fn new(vendor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Registry Error Classification
// ============================================================================

/// Structured registry error classification.
///
/// Every variant is handled the same way by the watcher (log and retry next
/// cycle); the split exists so logs and status output say what went wrong.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Connection failure, DNS error, reset.
    #[error("network error: {0}")]
    Network(String),
    /// Request exceeded the configured timeout.
    #[error("timed out after {0}s")]
    Timeout(u64),
    /// 401/403 even after token exchange.
    #[error("authentication error: {0}")]
    Auth(String),
    /// 429 from the registry.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Repository or tag does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Unexpected response shape (missing digest header, bad JSON).
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RegistryError {
    /// Returns `true` if the same request may succeed later without config changes.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RegistryError::Network(_) | RegistryError::Timeout(_) | RegistryError::RateLimited(_)
        )
    }

    /// Returns the HTTP status code associated with this error, if applicable.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RegistryError::Auth(_) => Some(401),
            RegistryError::RateLimited(_) => Some(429),
            RegistryError::NotFound(_) => Some(404),
            RegistryError::Network(_) | RegistryError::Timeout(_) | RegistryError::Protocol(_) => {
                None
            }
        }
    }
}

// ============================================================================
// Container engine
// ============================================================================

/// Failure talking to the container engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Engine binary missing or daemon not running.
    #[error("container engine unavailable: {0}")]
    Unavailable(String),
    /// Engine call exceeded its timeout.
    #[error("container engine call timed out after {0}s")]
    Timeout(u64),
    /// Engine command ran and reported failure.
    #[error("container engine command failed: {0}")]
    CommandFailed(String),
    /// Engine output could not be parsed.
    #[error("unexpected container engine output: {0}")]
    Parse(String),
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for Bandstack operations.
#[derive(Error, Debug)]
pub enum BandstackError {
    /// Configuration-related errors (unreadable file, invalid values, bad catalog).
    #[error("Configuration error: {0}")]
    Config(String),

    /// User-fixable credential problems, all fields at once.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Deploy error: {0}")]
    Deploy(#[from] DeployError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A specialized `Result` type for Bandstack operations.
pub type Result<T> = std::result::Result<T, BandstackError>;
