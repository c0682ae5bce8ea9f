//! `down` command handler.

use anyhow::{bail, Result};

use super::common::{attached_supervisors, docker_engine, load_config, require_engine};
use super::GlobalArgs;

/// Remove the named vendors, or everything, from every stack.
pub(crate) async fn cmd_down(args: &GlobalArgs, vendors: Vec<String>) -> Result<()> {
    let config = load_config(args)?;
    let engine = docker_engine(&config);
    require_engine(engine.as_ref()).await?;

    let mut failed = 0;
    for supervisor in attached_supervisors(&config, &engine).await? {
        let report = supervisor.tear_down(&vendors).await;
        for vendor in &report.removed {
            println!("[REMOVED] {}-{}", supervisor.stack(), vendor);
        }
        for err in &report.failed {
            println!("[FAILED]  {}-{}: {}", supervisor.stack(), err.vendor, err.reason);
        }
        failed += report.failed.len();
    }

    if failed > 0 {
        bail!("{} instance(s) could not be removed", failed);
    }
    Ok(())
}
