//! Container runtime boundary for Bandstack
//!
//! The supervisor and watcher talk to the container engine only through
//! [`ContainerEngine`]. [`DockerEngine`] drives the Docker CLI; tests use an
//! in-memory engine.

pub mod docker;
#[cfg(test)]
pub(crate) mod mock;
pub mod types;

pub use docker::DockerEngine;
pub use types::{
    ContainerEngine, ContainerState, EngineHealth, EngineResult, LaunchRequest, LABEL_DIGEST,
    LABEL_SPEC_HASH, LABEL_STACK, LABEL_VENDOR,
};
