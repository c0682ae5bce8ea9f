//! Deployment planner
//!
//! Expands the catalog and a validated [`CredentialSet`] into concrete
//! [`ServiceSpec`]s, one per enabled vendor and stack. Planning is a pure
//! function of its inputs: the output is sorted by vendor id and contains no
//! timestamps or random ids, so identical input always renders identically.

pub mod descriptor;

pub use descriptor::render_descriptor;

use serde::Serialize;
use sha2::{Digest as _, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::catalog::{
    placeholders, render_template, Binding, Catalog, RestartPolicy, VendorDefinition,
    DEVICE_NAME_PLACEHOLDER,
};
use crate::config::Config;
use crate::error::PlanError;
use crate::materializer::{CredentialSet, VendorCredentials};
use crate::platform::Platform;
use crate::registry::ImageRef;
use crate::secret::FieldValue;

/// Architecture most vendor images are published for; hosts without a native
/// image fall back to running it under emulation.
const EMULATION_ARCH: &str = "amd64";
const PROXY_ENV_VARS: &[&str] = &["HTTP_PROXY", "HTTPS_PROXY", "ALL_PROXY"];

// ============================================================================
// Types
// ============================================================================

/// Immutable snapshot of which vendors are switched on for this run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    enabled: BTreeSet<String>,
}

impl Selection {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.enabled_vendors(),
        }
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.enabled.contains(id)
    }

    pub fn ids(&self) -> &BTreeSet<String> {
        &self.enabled
    }
}

/// A host path or named volume mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeBinding {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

impl VolumeBinding {
    /// `docker run -v` form.
    pub fn to_mount_arg(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }
}

/// Fully resolved definition of how to run one vendor in one stack.
///
/// Specs are never mutated after planning; an update produces a new spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSpec {
    pub vendor: String,
    pub stack: String,
    pub container_name: String,
    pub image: ImageRef,
    /// `--platform` override, set when the image only runs under emulation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    pub env: BTreeMap<String, FieldValue>,
    pub command: Vec<FieldValue>,
    pub volumes: Vec<VolumeBinding>,
    pub restart: RestartPolicy,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_url: Option<FieldValue>,
}

impl ServiceSpec {
    /// SHA-256 over every resolved value, secrets included.
    ///
    /// Stored as a container label so a later run can tell whether the
    /// running instance still matches what it would start.
    pub fn spec_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let mut put = |part: &str| {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        };
        put(&self.vendor);
        put(&self.stack);
        put(&self.container_name);
        put(&self.image.to_string());
        put(self.platform.as_deref().unwrap_or(""));
        for (key, value) in &self.env {
            put(key);
            put(value.expose());
        }
        put("--");
        for arg in &self.command {
            put(arg.expose());
        }
        put("--");
        for volume in &self.volumes {
            put(&volume.to_mount_arg());
        }
        put(self.restart.as_docker_arg());
        hex::encode(hasher.finalize())
    }
}

/// The specs of one stack (the primary one or a proxied copy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackPlan {
    pub name: String,
    pub specs: Vec<ServiceSpec>,
}

/// Container name for a vendor in a stack.
pub fn container_name(stack: &str, vendor: &str) -> String {
    format!("{}-{}", stack, vendor)
}

/// Names of every stack `config` describes, primary first.
pub fn stack_names(config: &Config) -> Vec<String> {
    let mut names = vec![config.project.name.clone()];
    if config.proxies.enabled {
        for n in 1..=config.proxies.urls.len() {
            names.push(format!("{}-proxy-{}", config.project.name, n));
        }
    }
    names
}

// ============================================================================
// Planner
// ============================================================================

pub struct Planner<'a> {
    catalog: &'a Catalog,
    device_name: String,
    platform: Platform,
}

impl<'a> Planner<'a> {
    pub fn new(catalog: &'a Catalog, device_name: impl Into<String>, platform: Platform) -> Self {
        Self {
            catalog,
            device_name: device_name.into(),
            platform,
        }
    }

    /// Specs for every enabled vendor in `stack`, ordered by vendor id.
    ///
    /// `extra_env` is added to every service (proxy settings).
    pub fn plan(
        &self,
        stack: &str,
        creds: &CredentialSet,
        selection: &Selection,
        extra_env: &BTreeMap<String, FieldValue>,
    ) -> Result<Vec<ServiceSpec>, PlanError> {
        let empty = VendorCredentials::default();
        let mut specs = Vec::with_capacity(selection.ids().len());
        for vendor_id in selection.ids() {
            let vendor = self
                .catalog
                .get(vendor_id)
                .ok_or_else(|| PlanError::UnknownVendor {
                    vendor: vendor_id.clone(),
                })?;
            let vendor_creds = creds.vendor(vendor_id).unwrap_or(&empty);
            specs.push(self.plan_vendor(stack, vendor, vendor_creds, extra_env)?);
        }
        specs.sort_by(|a, b| a.vendor.cmp(&b.vendor));
        Ok(specs)
    }

    /// The primary stack plus one stack per configured proxy.
    pub fn plan_stacks(
        &self,
        config: &Config,
        creds: &CredentialSet,
        selection: &Selection,
    ) -> Result<Vec<StackPlan>, PlanError> {
        let names = stack_names(config);
        let mut plans = Vec::with_capacity(names.len());
        for (i, name) in names.into_iter().enumerate() {
            let mut extra = BTreeMap::new();
            // Index 0 is the primary stack; proxy stacks follow in url order.
            if let Some(url) = i.checked_sub(1).and_then(|p| config.proxies.urls.get(p)) {
                for var in PROXY_ENV_VARS {
                    extra.insert(var.to_string(), FieldValue::classified(url.clone(), true));
                }
            }
            let specs = self.plan(&name, creds, selection, &extra)?;
            plans.push(StackPlan { name, specs });
        }
        Ok(plans)
    }

    fn plan_vendor(
        &self,
        stack: &str,
        vendor: &VendorDefinition,
        creds: &VendorCredentials,
        extra_env: &BTreeMap<String, FieldValue>,
    ) -> Result<ServiceSpec, PlanError> {
        if let Some(missing) = vendor
            .fields
            .iter()
            .find(|f| f.required && creds.get(&f.name).is_none())
        {
            return Err(PlanError::MissingField {
                vendor: vendor.id.clone(),
                missing_field: missing.name.clone(),
            });
        }

        let image = ImageRef::parse(&vendor.image).map_err(|_| PlanError::Template {
            vendor: vendor.id.clone(),
            placeholder: vendor.image.clone(),
        })?;

        let mut env = BTreeMap::new();
        for (key, binding) in &vendor.env {
            if let Some(value) = self.resolve(vendor, creds, binding)? {
                env.insert(key.clone(), value);
            }
        }
        for (key, value) in extra_env {
            env.insert(key.clone(), value.clone());
        }

        let mut command = Vec::with_capacity(vendor.command.len());
        for binding in &vendor.command {
            if let Some(value) = self.resolve(vendor, creds, binding)? {
                command.push(value);
            }
        }

        let claim_url = match &vendor.claim_url {
            Some(template) => self.resolve(
                vendor,
                creds,
                &Binding::Template {
                    template: template.clone(),
                },
            )?,
            None => None,
        };

        Ok(ServiceSpec {
            vendor: vendor.id.clone(),
            stack: stack.to_string(),
            container_name: container_name(stack, &vendor.id),
            image,
            platform: self.platform_override(vendor),
            env,
            command,
            volumes: vendor
                .volumes
                .iter()
                .map(|v| volume_binding(stack, v))
                .collect(),
            restart: vendor.restart,
            enabled: true,
            claim_url,
        })
    }

    /// Resolve a binding. `None` means it reads an optional field that was
    /// not supplied, and the env var or argument is left out.
    fn resolve(
        &self,
        vendor: &VendorDefinition,
        creds: &VendorCredentials,
        binding: &Binding,
    ) -> Result<Option<FieldValue>, PlanError> {
        match binding {
            Binding::Plain(v) | Binding::Literal { value: v } => {
                Ok(Some(FieldValue::Plain(v.clone())))
            }
            Binding::Field { field } => match creds.get(field) {
                Some(value) => Ok(Some(value.clone())),
                None => self.absent(vendor, field),
            },
            Binding::Template { template } => {
                let names = placeholders(template);
                for name in &names {
                    if creds.get(name).is_none() && name != DEVICE_NAME_PLACEHOLDER {
                        return self.absent(vendor, name);
                    }
                }
                let secret = names
                    .iter()
                    .any(|n| creds.get(n).is_some_and(FieldValue::is_secret));
                let rendered = render_template(template, |name| {
                    creds
                        .get(name)
                        .map(|v| v.expose().to_string())
                        .or_else(|| {
                            (name == DEVICE_NAME_PLACEHOLDER).then(|| self.device_name.clone())
                        })
                })
                .map_err(|placeholder| PlanError::Template {
                    vendor: vendor.id.clone(),
                    placeholder,
                })?;
                Ok(Some(FieldValue::classified(rendered, secret)))
            }
        }
    }

    fn absent(&self, vendor: &VendorDefinition, field: &str) -> Result<Option<FieldValue>, PlanError> {
        match vendor.fields.iter().find(|f| f.name == field) {
            Some(schema) if !schema.required => Ok(None),
            Some(_) => Err(PlanError::MissingField {
                vendor: vendor.id.clone(),
                missing_field: field.to_string(),
            }),
            None => Err(PlanError::Template {
                vendor: vendor.id.clone(),
                placeholder: field.to_string(),
            }),
        }
    }

    fn platform_override(&self, vendor: &VendorDefinition) -> Option<String> {
        if self.platform.supports(&vendor.platforms) {
            return None;
        }
        if vendor.platforms.iter().any(|p| p == EMULATION_ARCH) {
            warn!(
                vendor = %vendor.id,
                host = %self.platform,
                "No native image for host, running linux/amd64 under emulation"
            );
            Some(format!("linux/{}", EMULATION_ARCH))
        } else {
            warn!(
                vendor = %vendor.id,
                host = %self.platform,
                published = ?vendor.platforms,
                "Image is not published for host architecture"
            );
            None
        }
    }
}

/// Named volumes are scoped to the stack so proxy stacks do not share state.
fn volume_binding(stack: &str, entry: &str) -> VolumeBinding {
    let parts: Vec<&str> = entry.splitn(3, ':').collect();
    let source = parts.first().copied().unwrap_or_default();
    let target = parts.get(1).copied().unwrap_or_default();
    let read_only = parts.get(2).is_some_and(|m| *m == "ro");
    let is_path = source.contains('/') || source.starts_with('.') || source.starts_with('~');
    VolumeBinding {
        source: if is_path {
            source.to_string()
        } else {
            format!("{}_{}", stack, source)
        },
        target: target.to_string(),
        read_only,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemConfig;
    use crate::materializer::{materialize, RawOverrides};

    const EARNAPP_UUID: &str = "sdk-node-0123456789abcdef0123456789abcdef";

    fn amd64() -> Platform {
        Platform::from_parts(&SystemConfig::default(), "linux", "x86_64")
    }

    fn arm64() -> Platform {
        Platform::from_parts(&SystemConfig::default(), "linux", "aarch64")
    }

    fn raw() -> RawOverrides {
        let mut raw = RawOverrides::new();
        raw.insert("EARNAPP_DEVICE_UUID", EARNAPP_UUID);
        raw.insert("HONEYGAIN_EMAIL", "me@example.com");
        raw.insert("HONEYGAIN_PASSWORD", "correct-horse");
        raw.insert("PACKETSTREAM_CID", "abc123");
        raw
    }

    fn plan_for(ids: &[&str], platform: Platform) -> Vec<ServiceSpec> {
        let catalog = Catalog::builtin().unwrap();
        let selection = Selection::new(ids.iter().copied());
        let creds = materialize(&catalog, selection.ids(), &raw()).unwrap();
        Planner::new(&catalog, "node-7", platform)
            .plan("bandstack", &creds, &selection, &BTreeMap::new())
            .unwrap()
    }

    #[test]
    fn test_plan_is_sorted_and_deterministic() {
        let a = plan_for(&["packetstream", "earnapp", "honeygain"], amd64());
        let b = plan_for(&["honeygain", "packetstream", "earnapp"], amd64());
        let vendors: Vec<_> = a.iter().map(|s| s.vendor.as_str()).collect();
        assert_eq!(vendors, vec!["earnapp", "honeygain", "packetstream"]);
        assert_eq!(a, b);
        assert_eq!(
            a.iter().map(ServiceSpec::spec_hash).collect::<Vec<_>>(),
            b.iter().map(ServiceSpec::spec_hash).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_earnapp_spec() {
        let specs = plan_for(&["earnapp"], amd64());
        let spec = &specs[0];
        assert_eq!(spec.container_name, "bandstack-earnapp");
        assert_eq!(spec.env["EARNAPP_UUID"].expose(), EARNAPP_UUID);
        assert!(spec.env["EARNAPP_UUID"].is_secret());
        assert_eq!(spec.env["EARNAPP_TERM"], FieldValue::Plain("yes".into()));
        assert_eq!(spec.volumes[0].source, "bandstack_earnapp-data");
        assert_eq!(spec.volumes[0].target, "/etc/earnapp");
        assert_eq!(spec.restart, RestartPolicy::Always);
        let claim = spec.claim_url.as_ref().unwrap();
        assert!(claim.is_secret());
        assert_eq!(
            claim.expose(),
            format!("https://earnapp.com/r/{}", EARNAPP_UUID)
        );
    }

    #[test]
    fn test_command_bindings_and_device_name() {
        let specs = plan_for(&["honeygain"], amd64());
        let args: Vec<&str> = specs[0].command.iter().map(FieldValue::expose).collect();
        assert_eq!(
            args,
            vec![
                "-tou-accept",
                "-email",
                "me@example.com",
                "-pass",
                "correct-horse",
                "-device",
                "node-7"
            ]
        );
        assert!(specs[0].command[4].is_secret());
        assert!(!specs[0].command[6].is_secret());
    }

    #[test]
    fn test_optional_field_overrides_device_name() {
        let catalog = Catalog::builtin().unwrap();
        let selection = Selection::new(["traffmonetizer"]);
        let mut raw = RawOverrides::new();
        raw.insert("TRAFFMONETIZER_TOKEN", "abcdefghijklmnopqrstuvwxyz");
        let creds = materialize(&catalog, selection.ids(), &raw).unwrap();
        let planner = Planner::new(&catalog, "node-7", amd64());
        let specs = planner
            .plan("s", &creds, &selection, &BTreeMap::new())
            .unwrap();
        assert_eq!(specs[0].command.last().unwrap().expose(), "node-7");

        raw.insert("TRAFFMONETIZER_DEVICE_NAME", "attic-pi");
        let creds = materialize(&catalog, selection.ids(), &raw).unwrap();
        let specs = planner
            .plan("s", &creds, &selection, &BTreeMap::new())
            .unwrap();
        assert_eq!(specs[0].command.last().unwrap().expose(), "attic-pi");
    }

    #[test]
    fn test_missing_field_is_plan_error() {
        let catalog = Catalog::builtin().unwrap();
        let selection = Selection::new(["earnapp"]);
        let err = Planner::new(&catalog, "n", amd64())
            .plan("s", &CredentialSet::default(), &selection, &BTreeMap::new())
            .unwrap_err();
        assert_eq!(
            err,
            PlanError::MissingField {
                vendor: "earnapp".into(),
                missing_field: "device_uuid".into()
            }
        );
    }

    #[test]
    fn test_unknown_vendor_is_plan_error() {
        let catalog = Catalog::builtin().unwrap();
        let err = Planner::new(&catalog, "n", amd64())
            .plan(
                "s",
                &CredentialSet::default(),
                &Selection::new(["ghost"]),
                &BTreeMap::new(),
            )
            .unwrap_err();
        assert!(matches!(err, PlanError::UnknownVendor { .. }));
    }

    #[test]
    fn test_disabled_vendor_absent() {
        let specs = plan_for(&["earnapp"], amd64());
        assert!(specs.iter().all(|s| s.vendor != "honeygain"));
    }

    #[test]
    fn test_amd64_only_image_emulated_on_arm() {
        let specs = plan_for(&["honeygain", "earnapp"], arm64());
        let honeygain = specs.iter().find(|s| s.vendor == "honeygain").unwrap();
        let earnapp = specs.iter().find(|s| s.vendor == "earnapp").unwrap();
        assert_eq!(honeygain.platform.as_deref(), Some("linux/amd64"));
        assert!(earnapp.platform.is_none());
    }

    #[test]
    fn test_spec_hash_changes_with_secret() {
        let specs = plan_for(&["earnapp"], amd64());
        let mut other = specs[0].clone();
        other.env.insert(
            "EARNAPP_UUID".into(),
            FieldValue::classified("sdk-node-ffffffffffffffffffffffffffffffff", true),
        );
        assert_ne!(specs[0].spec_hash(), other.spec_hash());
        assert_eq!(specs[0].spec_hash().len(), 64);
    }

    #[test]
    fn test_serialized_spec_redacts_secrets() {
        let specs = plan_for(&["earnapp", "honeygain"], amd64());
        let json = serde_json::to_string(&specs).unwrap();
        assert!(!json.contains(EARNAPP_UUID));
        assert!(!json.contains("correct-horse"));
        assert!(json.contains("[REDACTED]"));
    }

    #[test]
    fn test_plan_stacks_with_proxies() {
        let catalog = Catalog::builtin().unwrap();
        let mut config = Config::default();
        config.proxies.enabled = true;
        config.proxies.urls = vec![
            "socks5://u:p@10.0.0.2:1080".into(),
            "http://10.0.0.3:3128".into(),
        ];
        let selection = Selection::new(["packetstream"]);
        let creds = materialize(&catalog, selection.ids(), &raw()).unwrap();
        let plans = Planner::new(&catalog, "n", amd64())
            .plan_stacks(&config, &creds, &selection)
            .unwrap();

        let names: Vec<_> = plans.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["bandstack", "bandstack-proxy-1", "bandstack-proxy-2"]);
        assert!(!plans[0].specs[0].env.contains_key("HTTP_PROXY"));
        let proxied = &plans[1].specs[0];
        assert_eq!(proxied.container_name, "bandstack-proxy-1-packetstream");
        assert_eq!(proxied.env["ALL_PROXY"].expose(), "socks5://u:p@10.0.0.2:1080");
        assert!(proxied.env["HTTPS_PROXY"].is_secret());
        assert_eq!(plans[2].specs[0].env["HTTP_PROXY"].expose(), "http://10.0.0.3:3128");
    }

    #[test]
    fn test_volume_binding() {
        assert_eq!(
            volume_binding("s", "data:/d"),
            VolumeBinding {
                source: "s_data".into(),
                target: "/d".into(),
                read_only: false
            }
        );
        let host = volume_binding("s", "/srv/x:/x:ro");
        assert_eq!(host.source, "/srv/x");
        assert!(host.read_only);
        assert_eq!(host.to_mount_arg(), "/srv/x:/x:ro");
    }

    #[test]
    fn test_stack_names_without_proxies() {
        let mut config = Config::default();
        config.proxies.urls = vec!["http://p:1".into()];
        assert_eq!(stack_names(&config), vec!["bandstack".to_string()]);
    }
}
