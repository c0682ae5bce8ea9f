//! CLI module: command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod common;
pub mod config;
pub mod down;
pub mod plan;
pub mod status;
pub mod up;
pub mod update;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bandstack")]
#[command(version)]
#[command(
    about = "Deploy, supervise and auto-update bandwidth-sharing vendor containers",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file [default: ~/.bandstack/config.json]
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Credentials env file (overrides credentials.env_file)
    #[arg(long, global = true, value_name = "PATH")]
    pub env_file: Option<PathBuf>,
    /// Credential override, e.g. --set EARNAPP_DEVICE_UUID=sdk-node-...
    #[arg(long = "set", global = true, value_name = "KEY=VALUE")]
    pub set: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate credentials and start every enabled vendor
    Up,
    /// Stop and remove vendor instances (all when none are named)
    Down {
        /// Vendor ids to remove
        vendors: Vec<String>,
    },
    /// Show instance health, digests and claim URLs
    Status,
    /// Check registries for newer images once
    UpdateCheck {
        /// Replace instances whose image has a newer digest
        #[arg(long)]
        apply: bool,
    },
    /// Supervise instances and apply updates until interrupted
    Watch {
        /// Poll interval (e.g., "1h", "30m") [default: watcher.poll_interval_secs]
        #[arg(long)]
        interval: Option<String>,
    },
    /// Print the deployment descriptor (no secret values)
    Plan,
    /// List vendors in the catalog and the credentials they need
    Vendors,
    /// Validate configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate configuration file and catalog
    Check,
}

/// Entry point for the CLI, called from main().
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Load config early so logging respects its settings; fall back to
    // defaults if the config file is missing or unreadable.
    let logging_cfg = bandstack::Config::load_from_path(&common::config_path(&cli.global))
        .map(|c| c.logging)
        .unwrap_or_default();
    if let Err(e) = bandstack::utils::logging::init_logging(&logging_cfg) {
        eprintln!("Warning: {}", e);
    }

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Version) => {
            cmd_version();
        }
        Some(Commands::Up) => {
            up::cmd_up(&cli.global).await?;
        }
        Some(Commands::Down { vendors }) => {
            down::cmd_down(&cli.global, vendors).await?;
        }
        Some(Commands::Status) => {
            status::cmd_status(&cli.global).await?;
        }
        Some(Commands::UpdateCheck { apply }) => {
            update::cmd_update_check(&cli.global, apply).await?;
        }
        Some(Commands::Watch { interval }) => {
            update::cmd_watch(&cli.global, interval).await?;
        }
        Some(Commands::Plan) => {
            plan::cmd_plan(&cli.global)?;
        }
        Some(Commands::Vendors) => {
            plan::cmd_vendors(&cli.global)?;
        }
        Some(Commands::Config { action }) => {
            config::cmd_config(&cli.global, action)?;
        }
    }

    Ok(())
}

/// Display version information
fn cmd_version() {
    println!("bandstack {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Declarative deployment and self-update for bandwidth-sharing containers");
}
