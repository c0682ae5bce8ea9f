//! Logging initialization for Bandstack.
//!
//! Supports three formats:
//! - `pretty`: multi-line human-readable output
//! - `component`: compact one-line output; use the [`log_component!`] macro to
//!   add a `component` field for per-subsystem filtering
//! - `json`: structured JSON lines for log aggregators
//!
//! Events go to stderr unless `logging.file` is set, so `plan` output on
//! stdout stays clean.

use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{BandstackError, Result};

/// Initialize the global tracing subscriber from config.
///
/// Call once at startup before any tracing events are emitted. `RUST_LOG`
/// wins over `cfg.level` when set.
pub fn init_logging(cfg: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));

    let (writer, ansi) = match &cfg.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi);
    let installed = match cfg.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Component => builder.with_target(true).compact().try_init(),
    };
    installed.map_err(|e| BandstackError::Config(format!("logging: {}", e)))
}

/// Emit a component-tagged tracing event.
///
/// Works with any tracing level (`trace`, `debug`, `info`, `warn`, `error`).
/// The `component` field makes it easy to grep logs by subsystem:
///
/// ```
/// # use bandstack::log_component;
/// log_component!(info, "watcher", "cycle started");
/// log_component!(warn, "supervisor", "restart failed", vendor = "earnapp", attempts = 3u32);
/// ```
#[macro_export]
macro_rules! log_component {
    ($level:ident, $component:expr, $msg:expr) => {
        tracing::$level!(component = $component, $msg)
    };
    ($level:ident, $component:expr, $msg:expr, $($key:ident = $val:expr),+ $(,)?) => {
        tracing::$level!(component = $component, $($key = $val,)+ $msg)
    };
}
