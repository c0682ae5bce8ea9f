//! `up` command handler.

use anyhow::{bail, Result};

use bandstack::supervisor::Supervisor;

use super::common::{claim_urls, docker_engine, prepare, require_engine};
use super::GlobalArgs;

/// Validate credentials, persist them, and bring every stack up.
pub(crate) async fn cmd_up(args: &GlobalArgs) -> Result<()> {
    let prepared = prepare(args, true)?;
    let engine = docker_engine(&prepared.config);
    require_engine(engine.as_ref()).await?;

    let mut failed = 0;
    for plan in &prepared.plans {
        println!("Stack {}", plan.name);
        if plan.specs.is_empty() {
            println!("  (no vendors enabled)");
        }
        let supervisor = Supervisor::new(&plan.name, engine.clone(), prepared.config.supervisor.clone());
        let report = supervisor.bring_up(plan.specs.clone()).await;

        for vendor in &report.started {
            println!("  [STARTED]   {}", vendor);
        }
        for vendor in &report.unchanged {
            println!("  [RUNNING]   {}", vendor);
        }
        for vendor in &report.removed {
            println!("  [REMOVED]   {} (disabled)", vendor);
        }
        for err in &report.failed {
            println!("  [FAILED]    {}: {}", err.vendor, err.reason);
        }
        failed += report.failed.len();
    }

    let urls = claim_urls(&prepared.plans);
    if !urls.is_empty() {
        println!();
        println!("Claim your devices:");
        for (vendor, url) in urls {
            println!("  {:<16} {}", vendor, url);
        }
    }

    if failed > 0 {
        bail!("{} vendor(s) failed to start; see `bandstack status`", failed);
    }
    Ok(())
}
