//! Config check command handler.

use anyhow::{bail, Context, Result};

use bandstack::config::validate::{validate_config, validate_vendor_ids, DiagnosticLevel};
use bandstack::config::Config;

use super::common::{config_path, load_catalog};
use super::{ConfigAction, GlobalArgs};

/// Validate configuration file and catalog.
pub(crate) fn cmd_config(args: &GlobalArgs, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Check => {
            let path = config_path(args);
            println!("Config file: {}", path.display());

            let mut diagnostics = Vec::new();
            if path.exists() {
                let content =
                    std::fs::read_to_string(&path).context("Failed to read config file")?;
                let raw: serde_json::Value = match serde_json::from_str(&content) {
                    Ok(v) => v,
                    Err(e) => bail!("Invalid JSON: {}", e),
                };
                diagnostics.extend(validate_config(&raw));
            } else {
                println!("[OK] No config file found (using defaults)");
            }

            let config = Config::load_from_path(&path).context("Failed to parse config")?;
            match load_catalog(&config) {
                Ok(catalog) => {
                    println!(
                        "[OK] Catalog v{} with {} vendor(s)",
                        catalog.version,
                        catalog.vendors.len()
                    );
                    diagnostics.extend(validate_vendor_ids(&config, &catalog));
                }
                Err(e) => println!("[ERROR] {:#}", e),
            }

            for diag in &diagnostics {
                println!("{}", diag);
            }

            let errors = diagnostics
                .iter()
                .filter(|d| d.level == DiagnosticLevel::Error)
                .count();
            let warnings = diagnostics
                .iter()
                .filter(|d| d.level == DiagnosticLevel::Warn)
                .count();

            if errors == 0 && warnings == 0 {
                println!("\nConfiguration looks good!");
            } else {
                println!("\nFound {} error(s), {} warning(s)", errors, warnings);
            }
            if errors > 0 {
                bail!("configuration has {} error(s)", errors);
            }
        }
    }
    Ok(())
}
