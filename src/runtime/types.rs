//! Container engine boundary types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::EngineError;
use crate::planner::ServiceSpec;
use crate::registry::{Digest, ImageRef};

/// Stack the container belongs to.
pub const LABEL_STACK: &str = "bandstack.stack";
/// Vendor id the container runs.
pub const LABEL_VENDOR: &str = "bandstack.vendor";
/// [`ServiceSpec::spec_hash`] of the spec it was started from.
pub const LABEL_SPEC_HASH: &str = "bandstack.spec-hash";
/// Image digest it was started from.
pub const LABEL_DIGEST: &str = "bandstack.digest";

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Everything the engine needs to start one instance.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub spec: ServiceSpec,
    /// Image reference pinned to a digest.
    pub image: String,
    pub labels: BTreeMap<String, String>,
}

impl LaunchRequest {
    /// Run `spec` at exactly `digest`.
    pub fn pinned(spec: &ServiceSpec, digest: &Digest) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_STACK.to_string(), spec.stack.clone());
        labels.insert(LABEL_VENDOR.to_string(), spec.vendor.clone());
        labels.insert(LABEL_SPEC_HASH.to_string(), spec.spec_hash());
        labels.insert(LABEL_DIGEST.to_string(), digest.to_string());
        Self {
            spec: spec.clone(),
            image: spec.image.pinned(digest),
            labels,
        }
    }
}

/// Engine-reported health check state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineHealth {
    /// Image defines no health check.
    None,
    Starting,
    Healthy,
    Unhealthy,
}

impl EngineHealth {
    pub fn parse(s: &str) -> Self {
        match s {
            "starting" => EngineHealth::Starting,
            "healthy" => EngineHealth::Healthy,
            "unhealthy" => EngineHealth::Unhealthy,
            _ => EngineHealth::None,
        }
    }
}

/// Observed state of one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub name: String,
    pub id: String,
    pub image: String,
    pub running: bool,
    /// Engine status word (`running`, `exited`, `restarting`, ...).
    pub status: String,
    pub health: EngineHealth,
    pub exit_code: Option<i64>,
    pub restart_count: u64,
    pub labels: BTreeMap<String, String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl ContainerState {
    pub fn vendor(&self) -> Option<&str> {
        self.labels.get(LABEL_VENDOR).map(String::as_str)
    }

    pub fn spec_hash(&self) -> Option<&str> {
        self.labels.get(LABEL_SPEC_HASH).map(String::as_str)
    }

    pub fn digest(&self) -> Option<Digest> {
        self.labels
            .get(LABEL_DIGEST)
            .and_then(|d| Digest::parse(d).ok())
    }

    /// Running and not failing its health check.
    pub fn is_up(&self) -> bool {
        self.running && self.health != EngineHealth::Unhealthy
    }
}

/// The container engine the supervisor drives.
///
/// Implementations must treat stopping or removing a container that does not
/// exist as success.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Engine reachable and usable.
    async fn is_available(&self) -> bool;

    /// Fetch `image`; returns the digest it resolved to.
    async fn pull(&self, image: &ImageRef, platform: Option<&str>) -> EngineResult<Digest>;

    /// Whether `reference` is available locally without a pull.
    async fn image_present(&self, reference: &str) -> EngineResult<bool>;

    /// Create and start a container; returns its id.
    async fn run(&self, request: &LaunchRequest) -> EngineResult<String>;

    async fn stop(&self, name: &str) -> EngineResult<()>;

    async fn remove(&self, name: &str) -> EngineResult<()>;

    async fn inspect(&self, name: &str) -> EngineResult<Option<ContainerState>>;

    /// Every container labelled with `stack`, running or not.
    async fn list(&self, stack: &str) -> EngineResult<Vec<ContainerState>>;
}
