//! Shared CLI helpers used across multiple command handlers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;

use bandstack::catalog::Catalog;
use bandstack::config::Config;
use bandstack::materializer::{materialize, CredentialStore, RawOverrides};
use bandstack::planner::{stack_names, Planner, Selection, StackPlan};
use bandstack::platform::Platform;
use bandstack::runtime::{ContainerEngine, DockerEngine};
use bandstack::supervisor::Supervisor;

use super::GlobalArgs;

/// Config file named on the command line, or the default location.
pub(crate) fn config_path(args: &GlobalArgs) -> PathBuf {
    args.config.clone().unwrap_or_else(Config::path)
}

/// Load and sanity-check the config.
pub(crate) fn load_config(args: &GlobalArgs) -> Result<Config> {
    let path = config_path(args);
    let config = Config::load_from_path(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.check()?;
    Ok(config)
}

pub(crate) fn load_catalog(config: &Config) -> Result<Catalog> {
    Catalog::load(config.catalog.as_deref()).with_context(|| match &config.catalog {
        Some(p) => format!("Failed to load catalog {}", p.display()),
        None => "Failed to load built-in catalog".to_string(),
    })
}

/// Persisted store < env file < `--set`.
pub(crate) fn gather_overrides(config: &Config, args: &GlobalArgs) -> Result<RawOverrides> {
    let store = CredentialStore::new(config.credentials_store_path());
    let env_file = args
        .env_file
        .clone()
        .unwrap_or_else(|| config.credentials.env_file.clone());
    let stored = store.load()?;
    let from_file = RawOverrides::from_env_file(&env_file)
        .with_context(|| format!("Failed to read {}", env_file.display()))?;
    let from_args = RawOverrides::parse_assignments(&args.set)?;
    Ok(stored.merge(from_file).merge(from_args))
}

/// Everything a deploying command needs.
pub(crate) struct Prepared {
    pub config: Config,
    pub plans: Vec<StackPlan>,
}

/// Load config and catalog, validate credentials and plan every stack.
///
/// Invalid credentials are all printed before failing. With `persist`, the
/// validated set is saved for later runs.
pub(crate) fn prepare(args: &GlobalArgs, persist: bool) -> Result<Prepared> {
    let config = load_config(args)?;
    let catalog = load_catalog(&config)?;
    let raw = gather_overrides(&config, args)?;

    let credentials = match materialize(&catalog, &config.enabled_vendors(), &raw) {
        Ok(set) => set,
        Err(errors) => {
            eprintln!("Credentials need attention:");
            for err in errors.errors() {
                eprintln!("  - {}", err);
            }
            eprintln!();
            eprintln!(
                "Set them in {} or with --set KEY=VALUE.",
                config.credentials.env_file.display()
            );
            eprintln!("Run `bandstack vendors` to see every field and its format.");
            return Err(errors.into());
        }
    };

    if persist {
        let store = CredentialStore::new(config.credentials_store_path());
        let saved = store.save(&credentials)?;
        info!(entries = saved, path = %store.path().display(), "Credentials persisted");
    }

    let platform = Platform::detect(&config.system);
    let planner = Planner::new(&catalog, config.project.device_name.clone(), platform);
    let plans = planner.plan_stacks(&config, &credentials, &Selection::from_config(&config))?;

    Ok(Prepared { config, plans })
}

/// Plan from whatever credentials are on hand, without reporting problems.
pub(crate) fn plan_quietly(config: &Config, args: &GlobalArgs) -> Option<Vec<StackPlan>> {
    let catalog = load_catalog(config).ok()?;
    let raw = gather_overrides(config, args).ok()?;
    let credentials = materialize(&catalog, &config.enabled_vendors(), &raw).ok()?;
    let planner = Planner::new(
        &catalog,
        config.project.device_name.clone(),
        Platform::detect(&config.system),
    );
    planner
        .plan_stacks(config, &credentials, &Selection::from_config(config))
        .ok()
}

pub(crate) fn docker_engine(config: &Config) -> Arc<dyn ContainerEngine> {
    Arc::new(
        DockerEngine::new(Duration::from_secs(config.supervisor.engine_timeout_secs))
            .with_pull_timeout(Duration::from_secs(config.supervisor.pull_timeout_secs)),
    )
}

pub(crate) async fn require_engine(engine: &dyn ContainerEngine) -> Result<()> {
    if !engine.is_available().await {
        bail!(
            "Container engine '{}' is not available. Is Docker installed and running?",
            engine.name()
        );
    }
    Ok(())
}

/// One supervisor per stack the config describes, attached to what is running.
pub(crate) async fn attached_supervisors(
    config: &Config,
    engine: &Arc<dyn ContainerEngine>,
) -> Result<Vec<Arc<Supervisor>>> {
    let mut supervisors = Vec::new();
    for name in stack_names(config) {
        let supervisor = Supervisor::new(&name, engine.clone(), config.supervisor.clone());
        supervisor
            .attach()
            .await
            .with_context(|| format!("Failed to inspect stack '{}'", name))?;
        supervisors.push(Arc::new(supervisor));
    }
    Ok(supervisors)
}

/// Claim URLs of the planned services, once per vendor.
pub(crate) fn claim_urls(plans: &[StackPlan]) -> Vec<(String, String)> {
    let mut seen = std::collections::BTreeMap::new();
    for spec in plans.iter().flat_map(|p| &p.specs) {
        if let Some(url) = &spec.claim_url {
            seen.entry(spec.vendor.clone())
                .or_insert_with(|| url.expose().to_string());
        }
    }
    seen.into_iter().collect()
}

pub(crate) fn short_digest(d: Option<&bandstack::registry::Digest>) -> &str {
    d.map(|d| d.short()).unwrap_or("-")
}
