//! Host platform detection.
//!
//! Maps the compile-time OS and architecture names through the configurable
//! tables in [`SystemConfig`] to the names container images are published
//! under (`amd64`, `arm64`, `arm/v7`).

use crate::config::SystemConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// Reported OS type (`linux`, `macos`, ...).
    pub os: String,
    /// Rust architecture name of the host.
    pub arch: String,
    /// Docker architecture, or the Rust name when unmapped.
    pub docker_arch: String,
}

impl Platform {
    /// The platform this binary runs on.
    pub fn detect(system: &SystemConfig) -> Self {
        Self::from_parts(system, std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn from_parts(system: &SystemConfig, os: &str, arch: &str) -> Self {
        let os = system
            .os_map
            .get(os)
            .cloned()
            .unwrap_or_else(|| os.to_string());
        let docker_arch = system
            .arch_map
            .get(arch)
            .cloned()
            .unwrap_or_else(|| arch.to_string());
        Self {
            os,
            arch: arch.to_string(),
            docker_arch,
        }
    }

    /// Whether an image published for `platforms` runs natively here.
    /// An empty list means the image is multi-arch.
    pub fn supports(&self, platforms: &[String]) -> bool {
        platforms.is_empty() || platforms.iter().any(|p| p == &self.docker_arch)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.docker_arch)
    }
}
