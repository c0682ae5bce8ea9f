//! `update-check` and `watch` command handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use bandstack::notify::Notifier;
use bandstack::registry::{HttpRegistry, RegistryClient};
use bandstack::supervisor::Supervisor;
use bandstack::watcher::{CheckOutcome, CycleReport, UpdateLog, UpdateWatcher};

use super::common::{
    attached_supervisors, docker_engine, prepare, require_engine, short_digest, Prepared,
};
use super::GlobalArgs;

/// Minimum allowed poll interval in seconds (keeps registry rate limits happy).
const MIN_INTERVAL_SECS: u64 = 60;

/// Parse interval string like "1h", "30m", "90s" into seconds.
pub fn parse_interval(s: &str) -> Result<u64> {
    let s = s.trim().to_lowercase();
    let secs = if let Some(hours) = s.strip_suffix('h') {
        let n: u64 = hours.parse().with_context(|| "Invalid hours value")?;
        n.saturating_mul(3600)
    } else if let Some(mins) = s.strip_suffix('m') {
        let n: u64 = mins.parse().with_context(|| "Invalid minutes value")?;
        n.saturating_mul(60)
    } else if let Some(sec_str) = s.strip_suffix('s') {
        sec_str.parse().with_context(|| "Invalid seconds value")?
    } else {
        s.parse::<u64>()
            .with_context(|| "Invalid interval. Use formats like 1h, 30m, or 90s")?
    };

    if secs < MIN_INTERVAL_SECS {
        bail!(
            "Interval too small ({}s). Minimum is {}s to avoid registry rate limits.",
            secs,
            MIN_INTERVAL_SECS
        );
    }
    Ok(secs)
}

/// Attach to every planned stack and build a watcher over them.
async fn build_watcher(prepared: &Prepared) -> Result<(Vec<Arc<Supervisor>>, UpdateWatcher)> {
    let config = &prepared.config;
    let engine = docker_engine(config);
    require_engine(engine.as_ref()).await?;

    let supervisors = attached_supervisors(config, &engine).await?;
    for supervisor in &supervisors {
        let specs = prepared
            .plans
            .iter()
            .find(|p| p.name == supervisor.stack())
            .map(|p| p.specs.clone())
            .unwrap_or_default();
        supervisor.set_desired(specs).await;
    }

    let registry: Arc<dyn RegistryClient> = Arc::new(HttpRegistry::new(Duration::from_secs(
        config.watcher.registry_timeout_secs,
    )));
    let notifier = Arc::new(Notifier::from_config(&config.notifications)?);
    let log = UpdateLog::open(Some(config.update_log_path()));
    let watcher = UpdateWatcher::new(supervisors.clone(), registry, notifier, log, &config.watcher);
    Ok((supervisors, watcher))
}

fn print_report(report: &CycleReport) {
    for check in &report.checks {
        let line = match &check.outcome {
            CheckOutcome::UpToDate { digest } => format!("up to date ({})", digest.short()),
            CheckOutcome::UpdateAvailable { current, latest } => format!(
                "update available {} -> {} (run with --apply)",
                current.short(),
                latest.short()
            ),
            CheckOutcome::Updated { old, new } => {
                format!("updated {} -> {}", short_digest(old.as_ref()), new.short())
            }
            CheckOutcome::RolledBack { digest, error } => {
                format!("update failed, rolled back to {}: {}", digest.short(), error)
            }
            CheckOutcome::Failed { error } => format!("update failed, vendor stopped: {}", error),
            CheckOutcome::RegistryFailed { error } => {
                format!("registry check failed, will retry: {}", error)
            }
            CheckOutcome::NotRunning => "not running".to_string(),
            CheckOutcome::Skipped => "skipped".to_string(),
        };
        println!("  {}-{}: {}", check.stack, check.vendor, line);
    }
}

/// One poll cycle; report-only unless `apply`.
pub(crate) async fn cmd_update_check(args: &GlobalArgs, apply: bool) -> Result<()> {
    let prepared = prepare(args, false)?;
    let (_supervisors, watcher) = build_watcher(&prepared).await?;

    println!("Checking {} stack(s) for image updates...", prepared.plans.len());
    let report = watcher.run_cycle(&CancellationToken::new(), apply).await;
    print_report(&report);

    if report.failures() > 0 {
        bail!("{} vendor(s) failed to update and are stopped", report.failures());
    }
    Ok(())
}

/// Bring stacks up, then supervise and apply updates until Ctrl-C.
pub(crate) async fn cmd_watch(args: &GlobalArgs, interval: Option<String>) -> Result<()> {
    let prepared = prepare(args, true)?;
    let interval_secs = match interval {
        Some(s) => parse_interval(&s)?,
        None => prepared.config.watcher.poll_interval_secs,
    };
    let (supervisors, watcher) = build_watcher(&prepared).await?;
    let watcher = watcher.with_poll_interval(Duration::from_secs(interval_secs));

    for supervisor in &supervisors {
        let specs = supervisor.desired_specs().await;
        let report = supervisor.bring_up(specs).await;
        for err in &report.failed {
            error!(stack = %supervisor.stack(), vendor = %err.vendor, error = %err.reason, "Initial start failed; will keep retrying");
        }
    }

    println!(
        "Watching {} stack(s), checking for updates every {}s. Press Ctrl+C to stop.",
        supervisors.len(),
        interval_secs
    );

    let cancel = CancellationToken::new();
    let mut tasks = tokio::task::JoinSet::new();
    for supervisor in supervisors {
        let cancel = cancel.clone();
        tasks.spawn(async move { supervisor.supervise(cancel).await });
    }
    {
        let cancel = cancel.clone();
        tasks.spawn(async move { watcher.run(cancel).await });
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutdown requested; letting in-flight updates finish");
    cancel.cancel();
    while tasks.join_next().await.is_some() {}
    println!("Stopped.");
    Ok(())
}
