//! `status` command handler.

use std::collections::BTreeSet;

use anyhow::Result;

use bandstack::watcher::UpdateLog;

use super::common::{
    attached_supervisors, claim_urls, docker_engine, load_config, plan_quietly, require_engine,
    short_digest,
};
use super::GlobalArgs;

/// Recent update records shown under the instance table.
const RECENT_UPDATES: usize = 5;

/// Show instance health, digests, claim URLs and recent updates.
pub(crate) async fn cmd_status(args: &GlobalArgs) -> Result<()> {
    let config = load_config(args)?;
    let engine = docker_engine(&config);
    require_engine(engine.as_ref()).await?;
    let enabled = config.enabled_vendors();

    for supervisor in attached_supervisors(&config, &engine).await? {
        println!("Stack {}", supervisor.stack());
        println!(
            "  {:<16} {:<10} {:<14} {:<20} {}",
            "VENDOR", "STATUS", "DIGEST", "STARTED", "NOTE"
        );

        let instances = supervisor.instances().await;
        let mut seen = BTreeSet::new();
        for instance in &instances {
            seen.insert(instance.vendor.clone());
            let started = instance
                .last_restart
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());
            let note = if enabled.contains(&instance.vendor) {
                ""
            } else {
                "disabled in config; removed on next `up`"
            };
            println!(
                "  {:<16} {:<10} {:<14} {:<20} {}",
                instance.vendor,
                instance.status.to_string(),
                short_digest(instance.digest.as_ref()),
                started,
                note
            );
        }
        for vendor in enabled.iter().filter(|v| !seen.contains(*v)) {
            println!("  {:<16} {:<10} {:<14} {:<20} {}", vendor, "stopped", "-", "-", "");
        }
        println!();
    }

    if let Some(plans) = plan_quietly(&config, args) {
        let urls = claim_urls(&plans);
        if !urls.is_empty() {
            println!("Claim URLs");
            for (vendor, url) in urls {
                println!("  {:<16} {}", vendor, url);
            }
            println!();
        }
    }

    let records = UpdateLog::load(&config.update_log_path())?;
    if !records.is_empty() {
        println!("Recent updates");
        for record in records.iter().rev().take(RECENT_UPDATES) {
            println!(
                "  {}  {}-{}  {} -> {}  {}",
                record.timestamp.format("%Y-%m-%d %H:%M"),
                record.stack,
                record.vendor,
                short_digest(record.previous_digest.as_ref()),
                short_digest(record.new_digest.as_ref()),
                record.outcome.label()
            );
        }
    }
    Ok(())
}
