//! Update watcher
//!
//! Each poll cycle spawns one task per (stack, vendor) onto a `JoinSet`. A
//! semaphore bounds how many run at once. Tasks share nothing except the
//! supervisor (whose per-vendor locks serialize replaces), the notifier and
//! the single-writer [`UpdateLog`].
//!
//! Per vendor the state moves
//! `Idle -> Checking -> (UpToDate | UpdateAvailable -> Replacing) -> Idle`.
//!
//! A registry failure only affects its own vendor and is retried next cycle.
//! Cancellation stops new cycles and keeps tasks that have not started from
//! starting; a replace already underway always runs to completion.

pub mod log;

pub use log::{UpdateLog, UpdateOutcome, UpdateRecord};

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::config::WatcherConfig;
use crate::error::RegistryError;
use crate::notify::{NotificationStatus, Notifier, UpdateNotification};
use crate::planner::ServiceSpec;
use crate::registry::{Digest, RegistryClient};
use crate::supervisor::{ReplaceOutcome, Supervisor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    Idle,
    Checking,
    UpToDate,
    UpdateAvailable,
    Replacing,
}

/// Result of checking one vendor in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    UpToDate { digest: Digest },
    /// Newer digest found; not applied (report-only cycle).
    UpdateAvailable { current: Digest, latest: Digest },
    Updated { old: Option<Digest>, new: Digest },
    RolledBack { digest: Digest, error: String },
    /// Replace failed and the vendor is left stopped.
    Failed { error: String },
    /// Registry fetch failed; retried next cycle.
    RegistryFailed { error: RegistryError },
    /// Nothing running to compare against.
    NotRunning,
    /// Shutdown arrived before the check started.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct VendorCheck {
    pub stack: String,
    pub vendor: String,
    pub outcome: CheckOutcome,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub checks: Vec<VendorCheck>,
}

impl CycleReport {
    pub fn get(&self, stack: &str, vendor: &str) -> Option<&CheckOutcome> {
        self.checks
            .iter()
            .find(|c| c.stack == stack && c.vendor == vendor)
            .map(|c| &c.outcome)
    }

    /// Checks that ended in a failed replace.
    pub fn failures(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| matches!(c.outcome, CheckOutcome::Failed { .. }))
            .count()
    }

    pub fn updated(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| matches!(c.outcome, CheckOutcome::Updated { .. }))
            .count()
    }
}

type StateMap = BTreeMap<(String, String), WatchState>;

#[derive(Clone)]
pub struct UpdateWatcher {
    supervisors: Vec<Arc<Supervisor>>,
    registry: Arc<dyn RegistryClient>,
    notifier: Arc<Notifier>,
    log: UpdateLog,
    permits: Arc<Semaphore>,
    registry_timeout: Duration,
    poll_interval: Duration,
    notify_on_up_to_date: bool,
    states: Arc<Mutex<StateMap>>,
}

impl UpdateWatcher {
    pub fn new(
        supervisors: Vec<Arc<Supervisor>>,
        registry: Arc<dyn RegistryClient>,
        notifier: Arc<Notifier>,
        log: UpdateLog,
        config: &WatcherConfig,
    ) -> Self {
        Self {
            supervisors,
            registry,
            notifier,
            log,
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            registry_timeout: Duration::from_secs(config.registry_timeout_secs.max(1)),
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            notify_on_up_to_date: config.notify_on_up_to_date,
            states: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn with_registry_timeout(mut self, timeout: Duration) -> Self {
        self.registry_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn log(&self) -> &UpdateLog {
        &self.log
    }

    pub fn state(&self, stack: &str, vendor: &str) -> WatchState {
        self.states
            .lock()
            .ok()
            .and_then(|s| s.get(&(stack.to_string(), vendor.to_string())).copied())
            .unwrap_or(WatchState::Idle)
    }

    fn set_state(&self, stack: &str, vendor: &str, state: WatchState) {
        if let Ok(mut states) = self.states.lock() {
            states.insert((stack.to_string(), vendor.to_string()), state);
        }
    }

    /// Poll until `cancel` fires. Every cycle applies updates.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.poll_interval.as_secs(), "Update watcher started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let report = self.run_cycle(&cancel, true).await;
            info!(
                checked = report.checks.len(),
                updated = report.updated(),
                failed = report.failures(),
                "Update cycle complete"
            );
        }
        self.log.flush().await;
        info!("Update watcher stopped");
    }

    /// Check every desired vendor of every stack once.
    ///
    /// With `apply` false, available updates are only reported.
    pub async fn run_cycle(&self, cancel: &CancellationToken, apply: bool) -> CycleReport {
        let mut tasks = JoinSet::new();
        for supervisor in &self.supervisors {
            for spec in supervisor.desired_specs().await {
                let this = self.clone();
                let supervisor = supervisor.clone();
                let cancel = cancel.clone();
                let span = tracing::info_span!(
                    "vendor_check",
                    stack = %spec.stack,
                    vendor = %spec.vendor
                );
                tasks.spawn(
                    async move { this.check_vendor(supervisor, spec, cancel, apply).await }
                        .instrument(span),
                );
            }
        }

        let mut report = CycleReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(check) => report.checks.push(check),
                Err(e) => warn!(error = %e, "Vendor check task panicked"),
            }
        }
        report
            .checks
            .sort_by(|a, b| (&a.stack, &a.vendor).cmp(&(&b.stack, &b.vendor)));
        self.log.flush().await;
        report
    }

    async fn check_vendor(
        &self,
        supervisor: Arc<Supervisor>,
        spec: ServiceSpec,
        cancel: CancellationToken,
        apply: bool,
    ) -> VendorCheck {
        let stack = spec.stack.clone();
        let vendor = spec.vendor.clone();
        let outcome = self.check(&supervisor, spec, &cancel, apply).await;
        self.set_state(&stack, &vendor, WatchState::Idle);
        VendorCheck {
            stack,
            vendor,
            outcome,
        }
    }

    async fn check(
        &self,
        supervisor: &Supervisor,
        spec: ServiceSpec,
        cancel: &CancellationToken,
        apply: bool,
    ) -> CheckOutcome {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return CheckOutcome::Skipped,
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => return CheckOutcome::Skipped,
            },
        };
        let stack = spec.stack.as_str();
        let vendor = spec.vendor.as_str();
        self.set_state(stack, vendor, WatchState::Checking);

        let Some(current) = supervisor.instance(vendor).await.and_then(|i| i.digest) else {
            debug!("No running digest to compare");
            return CheckOutcome::NotRunning;
        };

        let latest = match tokio::time::timeout(
            self.registry_timeout,
            self.registry.latest_digest(&spec.image),
        )
        .await
        {
            Ok(Ok(d)) => d,
            Ok(Err(error)) => {
                warn!(error = %error, transient = error.is_transient(), "Registry check failed, retrying next cycle");
                return CheckOutcome::RegistryFailed { error };
            }
            Err(_) => {
                let error = RegistryError::Timeout(self.registry_timeout.as_secs());
                warn!(error = %error, "Registry check timed out, retrying next cycle");
                return CheckOutcome::RegistryFailed { error };
            }
        };

        if latest == current {
            self.set_state(stack, vendor, WatchState::UpToDate);
            debug!(digest = %current.short(), "Up to date");
            if self.notify_on_up_to_date {
                self.notifier
                    .notify(&notification(&spec, Some(current.clone()), Some(current.clone()), NotificationStatus::UpToDate, None))
                    .await;
            }
            return CheckOutcome::UpToDate { digest: current };
        }

        self.set_state(stack, vendor, WatchState::UpdateAvailable);
        info!(current = %current.short(), latest = %latest.short(), "Update available");
        if !apply {
            return CheckOutcome::UpdateAvailable { current, latest };
        }
        if cancel.is_cancelled() {
            return CheckOutcome::Skipped;
        }

        self.set_state(stack, vendor, WatchState::Replacing);
        let target = supervisor.desired_spec(vendor).await.unwrap_or_else(|| spec.clone());
        match supervisor.replace(vendor, target).await {
            Ok(ReplaceOutcome::Replaced { old, new }) => {
                self.finish(&spec, old.clone(), Some(new.clone()), UpdateOutcome::Applied, NotificationStatus::Updated, None)
                    .await;
                CheckOutcome::Updated { old, new }
            }
            // Registry and local pull disagree (tag moved back); nothing to record.
            Ok(ReplaceOutcome::Unchanged { digest }) => CheckOutcome::UpToDate { digest },
            Ok(ReplaceOutcome::RolledBack { digest, error }) => {
                self.finish(
                    &spec,
                    Some(current),
                    Some(latest),
                    UpdateOutcome::RolledBack { reason: error.reason.clone() },
                    NotificationStatus::RolledBack,
                    Some(error.reason.clone()),
                )
                .await;
                CheckOutcome::RolledBack {
                    digest,
                    error: error.reason,
                }
            }
            Err(error) => {
                self.finish(
                    &spec,
                    Some(current),
                    Some(latest),
                    UpdateOutcome::Failed { reason: error.reason.clone() },
                    NotificationStatus::Failed,
                    Some(error.reason.clone()),
                )
                .await;
                CheckOutcome::Failed {
                    error: error.reason,
                }
            }
        }
    }

    /// Notify, then append the record with the delivery result.
    async fn finish(
        &self,
        spec: &ServiceSpec,
        old: Option<Digest>,
        new: Option<Digest>,
        outcome: UpdateOutcome,
        status: NotificationStatus,
        detail: Option<String>,
    ) {
        let sent = self
            .notifier
            .notify(&notification(spec, old.clone(), new.clone(), status, detail))
            .await;
        let mut record = UpdateRecord::new(&spec.stack, &spec.vendor, old, new, outcome);
        record.notification_sent = sent;
        crate::log_component!(
            info,
            "watcher",
            "Update recorded",
            outcome = record.outcome.label(),
            notified = sent,
        );
        self.log.append(record);
    }
}

fn notification(
    spec: &ServiceSpec,
    old: Option<Digest>,
    new: Option<Digest>,
    status: NotificationStatus,
    detail: Option<String>,
) -> UpdateNotification {
    UpdateNotification {
        stack: spec.stack.clone(),
        vendor: spec.vendor.clone(),
        old_digest: old,
        new_digest: new,
        timestamp: Utc::now(),
        status,
        detail,
    }
}
