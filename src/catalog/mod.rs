//! Vendor catalog
//!
//! The catalog is the deployment descriptor: for every supported vendor it
//! names the image, the credential fields the vendor needs (with their
//! validation rules), and how those fields are bound into the container's
//! environment and command line. A built-in catalog is compiled into the
//! binary; `config.catalog` may point at a replacement YAML or JSON file.
//!
//! Catalogs are checked when loaded so the materializer and planner can rely
//! on every binding referencing a declared field.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::{BandstackError, Result};
use crate::materializer::schema::{FieldRule, FieldSchema};
use crate::registry::ImageRef;

const BUILTIN_CATALOG: &str = include_str!("builtin.yaml");

/// Placeholder available to every template besides the vendor's own fields.
pub const DEVICE_NAME_PLACEHOLDER: &str = "device_name";

// ============================================================================
// Types
// ============================================================================

/// A loaded, self-consistent set of vendor definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default = "default_version")]
    pub version: u32,
    pub vendors: Vec<VendorDefinition>,
}

fn default_version() -> u32 {
    1
}

/// How one vendor is deployed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorDefinition {
    /// Stable identifier used in config, container names and env keys.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Image reference, `[registry/]repository[:tag]`.
    pub image: String,
    /// Docker architectures the image is published for (`amd64`, `arm64`, ...).
    /// Empty means any.
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
    #[serde(default)]
    pub env: BTreeMap<String, Binding>,
    #[serde(default)]
    pub command: Vec<Binding>,
    /// `source:target[:ro]` entries; a source without `/` is a named volume.
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub restart: RestartPolicy,
    /// Dashboard link shown after `up`; may use templates.
    #[serde(default)]
    pub claim_url: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// Where a value placed into the container comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Binding {
    /// A bare string: literal command argument.
    Plain(String),
    /// The value of a credential field.
    Field { field: String },
    /// A string with `{placeholder}` substitutions.
    Template { template: String },
    /// A literal value.
    Literal { value: String },
}

impl Binding {
    /// Field names this binding reads.
    pub fn references(&self) -> Vec<String> {
        match self {
            Binding::Field { field } => vec![field.clone()],
            Binding::Template { template } => placeholders(template),
            Binding::Plain(_) | Binding::Literal { .. } => Vec::new(),
        }
    }
}

/// Container restart policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    #[default]
    UnlessStopped,
    OnFailure,
}

impl RestartPolicy {
    /// Value for `docker run --restart`.
    pub fn as_docker_arg(&self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::UnlessStopped => "unless-stopped",
            RestartPolicy::OnFailure => "on-failure",
        }
    }
}

// ============================================================================
// Templates
// ============================================================================

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").unwrap());

/// Placeholder names in a template, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER_RE
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

/// Substitute every `{name}` using `lookup`.
///
/// Returns the first placeholder `lookup` cannot resolve as the error.
pub fn render_template<F>(template: &str, lookup: F) -> std::result::Result<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER_RE.captures_iter(template) {
        let whole = caps.get(0).ok_or_else(String::new)?;
        let name = &caps[1];
        let value = lookup(name).ok_or_else(|| name.to_string())?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

// ============================================================================
// Loading
// ============================================================================

impl Catalog {
    /// The catalog compiled into the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml_str(BUILTIN_CATALOG)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BandstackError::Config(format!("cannot read catalog {}: {}", path.display(), e))
        })?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let catalog: Catalog = if is_json {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        catalog.check()?;
        Ok(catalog)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let catalog: Catalog = serde_yaml::from_str(content)?;
        catalog.check()?;
        Ok(catalog)
    }

    /// The built-in catalog, or the file named by `path`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_path(p),
            None => Self::builtin(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&VendorDefinition> {
        self.vendors.iter().find(|v| v.id == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.vendors.iter().map(|v| v.id.as_str()).collect()
    }

    /// Reject catalogs the rest of the pipeline cannot rely on.
    pub fn check(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for vendor in &self.vendors {
            let fail = |msg: String| {
                Err(BandstackError::Config(format!(
                    "catalog vendor '{}': {}",
                    vendor.id, msg
                )))
            };

            if vendor.id.is_empty()
                || !vendor
                    .id
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
            {
                return fail("id must be non-empty lowercase letters, digits, '-' or '_'".into());
            }
            if !seen.insert(vendor.id.as_str()) {
                return fail("duplicate id".into());
            }
            if let Err(e) = ImageRef::parse(&vendor.image) {
                return fail(e.to_string());
            }

            let mut field_names = HashSet::new();
            for field in &vendor.fields {
                if !field_names.insert(field.name.as_str()) {
                    return fail(format!("duplicate field '{}'", field.name));
                }
                for rule in &field.rules {
                    if let FieldRule::Pattern { pattern } = rule {
                        if let Err(e) = Regex::new(pattern) {
                            return fail(format!("field '{}' pattern: {}", field.name, e));
                        }
                    }
                }
            }

            let bindings = vendor.env.values().chain(vendor.command.iter());
            let claim = vendor
                .claim_url
                .iter()
                .map(|t| Binding::Template { template: t.clone() });
            for binding in bindings.cloned().chain(claim) {
                for name in binding.references() {
                    let known = field_names.contains(name.as_str())
                        || (name == DEVICE_NAME_PLACEHOLDER
                            && matches!(binding, Binding::Template { .. }));
                    if !known {
                        return fail(format!("binding references undeclared field '{}'", name));
                    }
                }
            }

            for volume in &vendor.volumes {
                let parts: Vec<&str> = volume.split(':').collect();
                let valid = matches!(parts.len(), 2 | 3)
                    && parts[..2].iter().all(|p| !p.is_empty())
                    && (parts.len() == 2 || matches!(parts[2], "ro" | "rw"));
                if !valid {
                    return fail(format!("volume '{}' is not source:target[:ro]", volume));
                }
            }
        }
        Ok(())
    }
}
