//! Lifecycle supervisor
//!
//! Owns the running instances of one stack. Operations on different vendors
//! run in parallel; operations on the same vendor are serialized by a
//! per-vendor mutex, so a scheduled update can never race a manual `up` or
//! `down` for that vendor.
//!
//! Container names are `<stack>-<vendor>`, which makes the engine itself
//! refuse a second instance of a vendor in the same stack. `replace` relies on
//! that: the old instance is always removed before the new one is created.
//!
//! Instance state is rebuilt from container labels ([`Supervisor::attach`]), so
//! separate CLI invocations agree on what is running.

pub mod backoff;

pub use backoff::Backoff;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::{log_audit_event, AuditCategory, AuditSeverity};
use crate::config::SupervisorConfig;
use crate::error::{DeployError, EngineError};
use crate::planner::ServiceSpec;
use crate::registry::Digest;
use crate::runtime::{ContainerEngine, ContainerState, EngineHealth, LaunchRequest};

/// Pause between immediate retries of a failed start.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

// ============================================================================
// Types
// ============================================================================

/// Observable health of a vendor's instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Starting,
    Healthy,
    Unhealthy,
    Stopped,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Starting => write!(f, "starting"),
            Status::Healthy => write!(f, "healthy"),
            Status::Unhealthy => write!(f, "unhealthy"),
            Status::Stopped => write!(f, "stopped"),
        }
    }
}

/// Map engine state to a status. Running counts as healthy unless the image's
/// own health check says otherwise.
pub fn status_of(state: Option<&ContainerState>) -> Status {
    let Some(state) = state else {
        return Status::Stopped;
    };
    if state.running {
        return match state.health {
            EngineHealth::Starting => Status::Starting,
            EngineHealth::Unhealthy => Status::Unhealthy,
            EngineHealth::Healthy | EngineHealth::None => Status::Healthy,
        };
    }
    match state.status.as_str() {
        "created" | "restarting" => Status::Starting,
        _ => Status::Unhealthy,
    }
}

/// The deployed realization of a [`ServiceSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningInstance {
    pub vendor: String,
    pub container_name: String,
    pub spec_hash: Option<String>,
    pub digest: Option<Digest>,
    pub status: Status,
    pub last_restart: Option<DateTime<Utc>>,
    /// Consecutive failed restart attempts; reset on a healthy start.
    pub restart_attempts: u32,
    pub last_error: Option<String>,
}

impl RunningInstance {
    fn new(vendor: &str, container_name: &str) -> Self {
        Self {
            vendor: vendor.to_string(),
            container_name: container_name.to_string(),
            spec_hash: None,
            digest: None,
            status: Status::Stopped,
            last_restart: None,
            restart_attempts: 0,
            last_error: None,
        }
    }
}

/// Result of [`Supervisor::bring_up`].
#[derive(Debug, Default)]
pub struct BringUpReport {
    pub started: Vec<String>,
    pub unchanged: Vec<String>,
    /// Instances of vendors no longer in the plan.
    pub removed: Vec<String>,
    pub failed: Vec<DeployError>,
}

impl BringUpReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of [`Supervisor::tear_down`].
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub removed: Vec<String>,
    pub failed: Vec<DeployError>,
}

/// Result of a successful or rolled-back [`Supervisor::replace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// New instance running.
    Replaced { old: Option<Digest>, new: Digest },
    /// Already running the latest digest with the same spec.
    Unchanged { digest: Digest },
    /// New instance failed; the old one runs again.
    RolledBack { digest: Digest, error: DeployError },
}

enum EnsureOutcome {
    Started,
    Unchanged,
}

// ============================================================================
// Supervisor
// ============================================================================

pub struct Supervisor {
    stack: String,
    engine: Arc<dyn ContainerEngine>,
    config: SupervisorConfig,
    backoff: Backoff,
    retry_delay: Duration,
    start_grace: Duration,
    instances: RwLock<BTreeMap<String, RunningInstance>>,
    desired: RwLock<BTreeMap<String, ServiceSpec>>,
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    next_attempt: Mutex<HashMap<String, tokio::time::Instant>>,
}

impl Supervisor {
    pub fn new(stack: &str, engine: Arc<dyn ContainerEngine>, config: SupervisorConfig) -> Self {
        Self {
            stack: stack.to_string(),
            engine,
            backoff: Backoff::from_config(&config),
            retry_delay: DEFAULT_RETRY_DELAY,
            start_grace: Duration::from_secs(config.start_grace_secs),
            config,
            instances: RwLock::new(BTreeMap::new()),
            desired: RwLock::new(BTreeMap::new()),
            locks: std::sync::Mutex::new(HashMap::new()),
            next_attempt: Mutex::new(HashMap::new()),
        }
    }

    /// Pause between immediate retries.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// How long a new instance must stay up to count as started.
    pub fn with_start_grace(mut self, grace: Duration) -> Self {
        self.start_grace = grace;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    fn container_name(&self, vendor: &str) -> String {
        crate::planner::container_name(&self.stack, vendor)
    }

    fn vendor_lock(&self, vendor: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(vendor.to_string()).or_default().clone()
    }

    async fn update_instance<F>(&self, vendor: &str, f: F)
    where
        F: FnOnce(&mut RunningInstance),
    {
        let name = self.container_name(vendor);
        let mut instances = self.instances.write().await;
        let instance = instances
            .entry(vendor.to_string())
            .or_insert_with(|| RunningInstance::new(vendor, &name));
        f(instance);
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Snapshot of every tracked instance, ordered by vendor.
    pub async fn instances(&self) -> Vec<RunningInstance> {
        self.instances.read().await.values().cloned().collect()
    }

    pub async fn instance(&self, vendor: &str) -> Option<RunningInstance> {
        self.instances.read().await.get(vendor).cloned()
    }

    /// Spec the vendor should currently be running.
    pub async fn desired_spec(&self, vendor: &str) -> Option<ServiceSpec> {
        self.desired.read().await.get(vendor).cloned()
    }

    /// Every desired spec, ordered by vendor.
    pub async fn desired_specs(&self) -> Vec<ServiceSpec> {
        self.desired.read().await.values().cloned().collect()
    }

    /// Record what the stack should run without touching the engine.
    pub async fn set_desired(&self, specs: Vec<ServiceSpec>) {
        let mut desired = self.desired.write().await;
        desired.clear();
        for spec in specs {
            desired.insert(spec.vendor.clone(), spec);
        }
    }

    /// Rebuild instance state from labelled containers of this stack.
    pub async fn attach(&self) -> Result<usize, EngineError> {
        let states = self.engine.list(&self.stack).await?;
        let mut instances = self.instances.write().await;
        instances.clear();
        for state in &states {
            let Some(vendor) = state.vendor() else {
                continue;
            };
            let mut instance = RunningInstance::new(vendor, &state.name);
            instance.spec_hash = state.spec_hash().map(String::from);
            instance.digest = state.digest();
            instance.status = status_of(Some(state));
            instance.last_restart = state.started_at;
            instances.insert(vendor.to_string(), instance);
        }
        debug!(stack = %self.stack, instances = instances.len(), "Attached to stack");
        Ok(instances.len())
    }

    /// Current status of `vendor`, refreshed from the engine.
    pub async fn health(&self, vendor: &str) -> Status {
        let name = self.container_name(vendor);
        match self.engine.inspect(&name).await {
            Ok(state) => {
                let status = status_of(state.as_ref());
                if status == Status::Stopped && self.instance(vendor).await.is_none() {
                    return status;
                }
                self.update_instance(vendor, |i| i.status = status).await;
                status
            }
            Err(e) => {
                warn!(stack = %self.stack, vendor, error = %e, "Health check failed");
                self.instance(vendor)
                    .await
                    .map(|i| i.status)
                    .unwrap_or(Status::Unhealthy)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Bring-up
    // ------------------------------------------------------------------------

    /// Make the stack run exactly `specs`.
    ///
    /// Idempotent: a vendor already running its spec is left alone. Instances
    /// of vendors absent from `specs` are removed. Starts are independent and
    /// run concurrently; one vendor failing does not affect the others.
    pub async fn bring_up(&self, specs: Vec<ServiceSpec>) -> BringUpReport {
        let mut report = BringUpReport::default();
        let wanted: BTreeSet<String> = specs.iter().map(|s| s.vendor.clone()).collect();
        self.set_desired(specs.clone()).await;

        match self.engine.list(&self.stack).await {
            Ok(states) => {
                for state in states {
                    let Some(vendor) = state.vendor().map(String::from) else {
                        continue;
                    };
                    if wanted.contains(&vendor) {
                        continue;
                    }
                    match self.remove_vendor(&vendor).await {
                        Ok(()) => report.removed.push(vendor),
                        Err(e) => report.failed.push(e),
                    }
                }
            }
            Err(e) => warn!(stack = %self.stack, error = %e, "Could not list stack for pruning"),
        }

        let results = join_all(specs.iter().map(|spec| self.ensure(spec))).await;
        for (spec, result) in specs.iter().zip(results) {
            match result {
                Ok(EnsureOutcome::Started) => report.started.push(spec.vendor.clone()),
                Ok(EnsureOutcome::Unchanged) => report.unchanged.push(spec.vendor.clone()),
                Err(e) => report.failed.push(e),
            }
        }
        info!(
            stack = %self.stack,
            started = report.started.len(),
            unchanged = report.unchanged.len(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Bring-up complete"
        );
        report
    }

    async fn ensure(&self, spec: &ServiceSpec) -> Result<EnsureOutcome, DeployError> {
        let lock = self.vendor_lock(&spec.vendor);
        let _guard = lock.lock().await;

        let hash = spec.spec_hash();
        let current = self
            .engine
            .inspect(&spec.container_name)
            .await
            .map_err(|e| DeployError::new(&spec.vendor, e.to_string()))?;

        let mut known_digest = None;
        if let Some(state) = &current {
            if state.spec_hash() == Some(hash.as_str()) && state.is_up() {
                let digest = state.digest();
                let status = status_of(Some(state));
                self.update_instance(&spec.vendor, |i| {
                    i.spec_hash = Some(hash.clone());
                    i.digest = digest;
                    i.status = status;
                    i.restart_attempts = 0;
                    i.last_error = None;
                })
                .await;
                debug!(stack = %self.stack, vendor = %spec.vendor, "Instance already up to date");
                return Ok(EnsureOutcome::Unchanged);
            }
            known_digest = state.digest();
            debug!(stack = %self.stack, vendor = %spec.vendor, running = state.running, "Replacing stale instance");
            self.stop_and_remove(&spec.vendor, &spec.container_name)
                .await?;
        }

        self.start_with_retries(spec, known_digest).await?;
        Ok(EnsureOutcome::Started)
    }

    /// Start `spec`, retrying immediately up to `immediate_retries` times.
    /// On final failure the vendor is left `Unhealthy` with the error recorded.
    async fn start_with_retries(
        &self,
        spec: &ServiceSpec,
        known_digest: Option<Digest>,
    ) -> Result<Digest, DeployError> {
        let attempts = self.config.immediate_retries + 1;
        let mut last_err = DeployError::new(&spec.vendor, "not attempted");
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay).await;
            }
            let result = match self.resolve_digest(spec, known_digest.as_ref()).await {
                Ok(digest) => self.launch(spec, &digest).await.map(|_| digest),
                Err(e) => Err(e),
            };
            match result {
                Ok(digest) => {
                    let hash = spec.spec_hash();
                    let started = digest.clone();
                    self.update_instance(&spec.vendor, |i| {
                        i.spec_hash = Some(hash);
                        i.digest = Some(started);
                        i.status = Status::Healthy;
                        i.last_restart = Some(Utc::now());
                        i.restart_attempts = 0;
                        i.last_error = None;
                    })
                    .await;
                    info!(stack = %self.stack, vendor = %spec.vendor, digest = %digest.short(), "Instance started");
                    log_audit_event(
                        AuditCategory::Deployment,
                        AuditSeverity::Info,
                        "instance_started",
                        &spec.vendor,
                        &format!("{} at {}", spec.container_name, digest),
                    );
                    return Ok(digest);
                }
                Err(e) => {
                    warn!(
                        stack = %self.stack,
                        vendor = %spec.vendor,
                        attempt = attempt + 1,
                        of = attempts,
                        error = %e.reason,
                        "Start failed"
                    );
                    last_err = e;
                }
            }
        }

        let reason = last_err.reason.clone();
        self.update_instance(&spec.vendor, |i| {
            i.status = Status::Unhealthy;
            i.last_error = Some(reason);
        })
        .await;
        error!(stack = %self.stack, vendor = %spec.vendor, error = %last_err.reason, "Giving up on immediate retries");
        Err(last_err)
    }

    /// Pull the spec's image. If the registry is unreachable but a previously
    /// run digest is still present locally, run that instead.
    async fn resolve_digest(
        &self,
        spec: &ServiceSpec,
        known: Option<&Digest>,
    ) -> Result<Digest, DeployError> {
        match self.engine.pull(&spec.image, spec.platform.as_deref()).await {
            Ok(digest) => Ok(digest),
            Err(pull_err) => {
                if let Some(digest) = known {
                    let pinned = spec.image.pinned(digest);
                    if matches!(self.engine.image_present(&pinned).await, Ok(true)) {
                        warn!(vendor = %spec.vendor, error = %pull_err, "Pull failed, using local image");
                        return Ok(digest.clone());
                    }
                }
                Err(DeployError::new(&spec.vendor, format!("pull: {}", pull_err)))
            }
        }
    }

    /// Run `spec` pinned to `digest` and wait out the start grace period.
    /// A container that dies within it is removed.
    async fn launch(&self, spec: &ServiceSpec, digest: &Digest) -> Result<(), DeployError> {
        let request = LaunchRequest::pinned(spec, digest);
        if let Err(run_err) = self.engine.run(&request).await {
            // A failed `run` can still leave a created container holding the name.
            if let Err(e) = self.engine.remove(&spec.container_name).await {
                warn!(vendor = %spec.vendor, error = %e, "Could not remove failed instance");
            }
            return Err(DeployError::new(&spec.vendor, format!("run: {}", run_err)));
        }

        if !self.start_grace.is_zero() {
            tokio::time::sleep(self.start_grace).await;
        }
        let state = self
            .engine
            .inspect(&spec.container_name)
            .await
            .map_err(|e| DeployError::new(&spec.vendor, format!("inspect: {}", e)))?;
        if state.as_ref().is_some_and(ContainerState::is_up) {
            return Ok(());
        }

        let detail = match &state {
            Some(s) => format!(
                "instance {} within start grace (exit code {})",
                s.status,
                s.exit_code.map_or_else(|| "?".to_string(), |c| c.to_string())
            ),
            None => "instance disappeared within start grace".to_string(),
        };
        if let Err(e) = self.engine.remove(&spec.container_name).await {
            warn!(vendor = %spec.vendor, error = %e, "Could not remove failed instance");
        }
        Err(DeployError::new(&spec.vendor, detail))
    }

    async fn stop_and_remove(&self, vendor: &str, name: &str) -> Result<(), DeployError> {
        self.engine
            .stop(name)
            .await
            .map_err(|e| DeployError::new(vendor, format!("stop: {}", e)))?;
        self.engine
            .remove(name)
            .await
            .map_err(|e| DeployError::new(vendor, format!("remove: {}", e)))
    }

    async fn remove_vendor(&self, vendor: &str) -> Result<(), DeployError> {
        let lock = self.vendor_lock(vendor);
        let _guard = lock.lock().await;
        let name = self.container_name(vendor);
        self.stop_and_remove(vendor, &name).await?;
        self.instances.write().await.remove(vendor);
        self.desired.write().await.remove(vendor);
        info!(stack = %self.stack, vendor, "Instance removed");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Replace
    // ------------------------------------------------------------------------

    /// Swap `vendor`'s instance for one running `new_spec`.
    ///
    /// The new image is pulled before the old instance is touched. The old
    /// instance is removed before the new one starts, so two never run at
    /// once. If the new one fails to start, the old digest is restarted when
    /// still present locally; otherwise the vendor is left stopped and the
    /// error returned.
    pub async fn replace(
        &self,
        vendor: &str,
        new_spec: ServiceSpec,
    ) -> Result<ReplaceOutcome, DeployError> {
        let lock = self.vendor_lock(vendor);
        let _guard = lock.lock().await;
        let name = self.container_name(vendor);

        let old_state = self
            .engine
            .inspect(&name)
            .await
            .map_err(|e| DeployError::new(vendor, format!("inspect: {}", e)))?;
        let old_digest = match old_state.as_ref().and_then(ContainerState::digest) {
            Some(d) => Some(d),
            None => self.instance(vendor).await.and_then(|i| i.digest),
        };
        let old_spec = self
            .desired_spec(vendor)
            .await
            .unwrap_or_else(|| new_spec.clone());

        let new_digest = self
            .engine
            .pull(&new_spec.image, new_spec.platform.as_deref())
            .await
            .map_err(|e| DeployError::new(vendor, format!("pull: {}", e)))?;

        let new_hash = new_spec.spec_hash();
        if let Some(state) = &old_state {
            if state.is_up()
                && old_digest.as_ref() == Some(&new_digest)
                && state.spec_hash() == Some(new_hash.as_str())
            {
                return Ok(ReplaceOutcome::Unchanged { digest: new_digest });
            }
        }

        if old_state.is_some() {
            self.stop_and_remove(vendor, &name).await?;
        }
        info!(
            stack = %self.stack,
            vendor,
            old = %old_digest.as_ref().map(Digest::short).unwrap_or("-"),
            new = %new_digest.short(),
            "Replacing instance"
        );

        match self.launch(&new_spec, &new_digest).await {
            Ok(()) => {
                let digest = new_digest.clone();
                self.update_instance(vendor, |i| {
                    i.spec_hash = Some(new_hash);
                    i.digest = Some(digest);
                    i.status = Status::Healthy;
                    i.last_restart = Some(Utc::now());
                    i.restart_attempts = 0;
                    i.last_error = None;
                })
                .await;
                self.desired
                    .write()
                    .await
                    .insert(vendor.to_string(), new_spec);
                log_audit_event(
                    AuditCategory::Update,
                    AuditSeverity::Info,
                    "instance_replaced",
                    vendor,
                    &format!(
                        "{} -> {}",
                        old_digest.as_ref().map(Digest::as_str).unwrap_or("none"),
                        new_digest
                    ),
                );
                Ok(ReplaceOutcome::Replaced {
                    old: old_digest,
                    new: new_digest,
                })
            }
            Err(start_err) => self.roll_back(vendor, &old_spec, old_digest, start_err).await,
        }
    }

    async fn roll_back(
        &self,
        vendor: &str,
        old_spec: &ServiceSpec,
        old_digest: Option<Digest>,
        start_err: DeployError,
    ) -> Result<ReplaceOutcome, DeployError> {
        let restorable = match &old_digest {
            Some(d) => matches!(
                self.engine.image_present(&old_spec.image.pinned(d)).await,
                Ok(true)
            ),
            None => false,
        };

        if let (true, Some(digest)) = (restorable, old_digest) {
            match self.launch(old_spec, &digest).await {
                Ok(()) => {
                    let hash = old_spec.spec_hash();
                    let reason = start_err.reason.clone();
                    let restored = digest.clone();
                    self.update_instance(vendor, |i| {
                        i.spec_hash = Some(hash);
                        i.digest = Some(restored);
                        i.status = Status::Healthy;
                        i.last_restart = Some(Utc::now());
                        i.last_error = Some(reason);
                    })
                    .await;
                    warn!(stack = %self.stack, vendor, digest = %digest.short(), error = %start_err.reason, "Update failed, rolled back");
                    log_audit_event(
                        AuditCategory::Rollback,
                        AuditSeverity::Warning,
                        "update_rolled_back",
                        vendor,
                        &format!("restored {}: {}", digest, start_err.reason),
                    );
                    return Ok(ReplaceOutcome::RolledBack {
                        digest,
                        error: start_err,
                    });
                }
                Err(rollback_err) => {
                    let err = DeployError::new(
                        vendor,
                        format!(
                            "{}; rollback failed: {}",
                            start_err.reason, rollback_err.reason
                        ),
                    );
                    self.mark_stopped(vendor, &err).await;
                    return Err(err);
                }
            }
        }

        let err = DeployError::new(
            vendor,
            format!("{}; previous image not available for rollback", start_err.reason),
        );
        self.mark_stopped(vendor, &err).await;
        Err(err)
    }

    async fn mark_stopped(&self, vendor: &str, err: &DeployError) {
        let reason = err.reason.clone();
        self.update_instance(vendor, |i| {
            i.status = Status::Stopped;
            i.last_error = Some(reason);
        })
        .await;
        error!(stack = %self.stack, vendor, error = %err.reason, "Vendor left without an instance");
        log_audit_event(
            AuditCategory::Rollback,
            AuditSeverity::Critical,
            "rollback_failed",
            vendor,
            &err.reason,
        );
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Stop and remove the given vendors' instances; all of them when empty.
    pub async fn tear_down(&self, vendors: &[String]) -> TeardownReport {
        let targets: BTreeSet<String> = if vendors.is_empty() {
            let mut all: BTreeSet<String> = self.instances.read().await.keys().cloned().collect();
            all.extend(self.desired.read().await.keys().cloned());
            match self.engine.list(&self.stack).await {
                Ok(states) => all.extend(states.iter().filter_map(|s| s.vendor().map(String::from))),
                Err(e) => warn!(stack = %self.stack, error = %e, "Could not list stack"),
            }
            all
        } else {
            vendors.iter().cloned().collect()
        };

        let results = join_all(targets.iter().map(|v| self.remove_vendor(v))).await;
        let mut report = TeardownReport::default();
        for (vendor, result) in targets.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    log_audit_event(
                        AuditCategory::Teardown,
                        AuditSeverity::Info,
                        "instance_removed",
                        &vendor,
                        &self.stack,
                    );
                    report.removed.push(vendor);
                }
                Err(e) => report.failed.push(e),
            }
        }
        report
    }

    // ------------------------------------------------------------------------
    // Healing
    // ------------------------------------------------------------------------

    /// One health sweep: restart every desired vendor that is down and due
    /// for another attempt. Returns the vendors restarted.
    pub async fn heal_once(&self) -> Vec<String> {
        let desired = self.desired_specs().await;
        let results = join_all(desired.iter().map(|spec| self.heal_vendor(spec))).await;
        desired
            .into_iter()
            .zip(results)
            .filter(|(_, restarted)| *restarted)
            .map(|(spec, _)| spec.vendor)
            .collect()
    }

    async fn heal_vendor(&self, spec: &ServiceSpec) -> bool {
        let status = self.health(&spec.vendor).await;
        if matches!(status, Status::Healthy | Status::Starting) {
            self.next_attempt.lock().await.remove(&spec.vendor);
            return false;
        }

        let now = tokio::time::Instant::now();
        if let Some(due) = self.next_attempt.lock().await.get(&spec.vendor) {
            if now < *due {
                return false;
            }
        }

        match self.ensure(spec).await {
            Ok(_) => {
                self.next_attempt.lock().await.remove(&spec.vendor);
                true
            }
            Err(e) => {
                let mut attempts = 0;
                self.update_instance(&spec.vendor, |i| {
                    i.restart_attempts = i.restart_attempts.saturating_add(1);
                    attempts = i.restart_attempts;
                })
                .await;
                let delay = self.backoff.delay(attempts.saturating_sub(1));
                warn!(
                    stack = %self.stack,
                    vendor = %spec.vendor,
                    attempts,
                    retry_in_secs = delay.as_secs(),
                    error = %e.reason,
                    "Restart failed, backing off"
                );
                self.next_attempt
                    .lock()
                    .await
                    .insert(spec.vendor.clone(), now + delay);
                false
            }
        }
    }

    /// Health sweeps every `health_interval_secs` until cancelled.
    pub async fn supervise(&self, cancel: CancellationToken) {
        let interval = Duration::from_secs(self.config.health_interval_secs.max(1));
        info!(stack = %self.stack, interval_secs = interval.as_secs(), "Supervisor started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            let restarted = self.heal_once().await;
            if !restarted.is_empty() {
                info!(stack = %self.stack, vendors = ?restarted, "Restarted failed instances");
            }
        }
        info!(stack = %self.stack, "Supervisor stopped");
    }
}
