//! Compose-style rendering of a plan.
//!
//! The descriptor lists environment variable names, never values, and
//! redacts secret command arguments. Output is byte-stable for identical
//! plans so it can be diffed across runs.

use serde::Serialize;
use std::collections::BTreeMap;

use super::{ServiceSpec, StackPlan};
use crate::error::Result;
use crate::runtime::{LABEL_STACK, LABEL_VENDOR};
use crate::secret::FieldValue;

#[derive(Serialize)]
struct Descriptor<'a> {
    stacks: Vec<StackDescriptor<'a>>,
}

#[derive(Serialize)]
struct StackDescriptor<'a> {
    name: &'a str,
    services: BTreeMap<&'a str, ServiceDescriptor<'a>>,
}

#[derive(Serialize)]
struct ServiceDescriptor<'a> {
    vendor: &'a str,
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform: Option<&'a str>,
    environment: Vec<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    command: Vec<&'a FieldValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    volumes: Vec<String>,
    restart: &'static str,
    labels: BTreeMap<&'static str, &'a str>,
}

impl<'a> From<&'a ServiceSpec> for ServiceDescriptor<'a> {
    fn from(spec: &'a ServiceSpec) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_STACK, spec.stack.as_str());
        labels.insert(LABEL_VENDOR, spec.vendor.as_str());
        Self {
            vendor: &spec.vendor,
            image: spec.image.to_string(),
            platform: spec.platform.as_deref(),
            environment: spec.env.keys().map(String::as_str).collect(),
            command: spec.command.iter().collect(),
            volumes: spec.volumes.iter().map(|v| v.to_mount_arg()).collect(),
            restart: spec.restart.as_docker_arg(),
            labels,
        }
    }
}

/// Render every stack as YAML.
pub fn render_descriptor(plans: &[StackPlan]) -> Result<String> {
    let descriptor = Descriptor {
        stacks: plans
            .iter()
            .map(|plan| StackDescriptor {
                name: &plan.name,
                services: plan
                    .specs
                    .iter()
                    .map(|s| (s.container_name.as_str(), ServiceDescriptor::from(s)))
                    .collect(),
            })
            .collect(),
    };
    Ok(serde_yaml::to_string(&descriptor)?)
}
