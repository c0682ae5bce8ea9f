//! Bandstack - declarative multi-vendor container deployment and self-update
//!
//! A run flows through four stages: the materializer validates credentials
//! against the catalog, the planner turns them into one [`ServiceSpec`] per
//! vendor, the [`Supervisor`] keeps those containers running, and the
//! [`UpdateWatcher`] replaces them when their registry digest moves.

pub mod audit;
pub mod catalog;
pub mod config;
pub mod error;
pub mod materializer;
pub mod notify;
pub mod planner;
pub mod platform;
pub mod registry;
pub mod runtime;
pub mod secret;
pub mod supervisor;
pub mod utils;
pub mod watcher;

pub use catalog::Catalog;
pub use config::Config;
pub use error::{BandstackError, DeployError, PlanError, RegistryError, Result, ValidationErrors};
pub use materializer::{materialize, CredentialSet, RawOverrides};
pub use planner::{Planner, ServiceSpec, StackPlan};
pub use registry::{Digest, HttpRegistry, ImageRef, RegistryClient};
pub use runtime::{ContainerEngine, DockerEngine};
pub use secret::{FieldValue, SecretValue};
pub use supervisor::{Status, Supervisor};
pub use watcher::{UpdateLog, UpdateWatcher};
