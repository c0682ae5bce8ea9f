//! Image references, digests and the registry client seam.
//!
//! The Update Watcher only needs one thing from a registry: the digest the
//! configured tag currently points at. [`RegistryClient`] is that seam;
//! [`HttpRegistry`] speaks the Docker Registry HTTP API v2 and tests use a
//! scripted client.

pub mod http;

pub use http::HttpRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BandstackError, RegistryError, Result};

/// Registry assumed when an image reference names none.
pub const DEFAULT_REGISTRY: &str = "docker.io";
const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";
const DEFAULT_TAG: &str = "latest";

// ============================================================================
// Digest
// ============================================================================

/// Content-addressed image identifier, `<algorithm>:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let valid = s.split_once(':').is_some_and(|(algo, hex)| {
            !algo.is_empty()
                && algo.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '.')
                && !hex.is_empty()
                && hex.chars().all(|c| c.is_ascii_hexdigit())
        });
        if !valid {
            return Err(BandstackError::Config(format!("invalid digest '{}'", s)));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines and tables.
    pub fn short(&self) -> &str {
        let hex = self.0.split_once(':').map(|(_, h)| h).unwrap_or(&self.0);
        &hex[..hex.len().min(12)]
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Image reference
// ============================================================================

/// A parsed `[registry/]repository[:tag][@digest]` reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub registry: String,
    pub repository: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
}

impl ImageRef {
    pub fn parse(reference: &str) -> Result<Self> {
        let bad = |why: &str| {
            Err(BandstackError::Config(format!(
                "invalid image reference '{}': {}",
                reference, why
            )))
        };
        let reference_trimmed = reference.trim();
        if reference_trimmed.is_empty() {
            return bad("empty");
        }

        let (name_part, digest) = match reference_trimmed.split_once('@') {
            Some((name, d)) => (name, Some(Digest::parse(d)?)),
            None => (reference_trimmed, None),
        };

        let (registry, rest) = match name_part.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest)
            }
            _ => (DEFAULT_REGISTRY.to_string(), name_part),
        };

        // A ':' after the last '/' separates the tag.
        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (repository, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => (&rest[..last_slash + i], &rest[last_slash + i + 1..]),
            None => (rest, DEFAULT_TAG),
        };

        if repository.is_empty() || tag.is_empty() {
            return bad("missing repository or tag");
        }
        if !repository.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-' | '/')
        }) {
            return bad("repository must be lowercase");
        }

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository.to_string()
        };

        Ok(Self {
            registry,
            repository,
            tag: tag.to_string(),
            digest,
        })
    }

    /// Host serving the v2 API for this registry.
    pub fn api_host(&self) -> &str {
        if self.registry == DEFAULT_REGISTRY {
            DOCKER_HUB_API_HOST
        } else {
            &self.registry
        }
    }

    /// Reference that runs exactly `digest`, regardless of where the tag moves.
    pub fn pinned(&self, digest: &Digest) -> String {
        format!("{}/{}@{}", self.registry, self.repository, digest)
    }

    /// `registry/repository`, the key image digests are recorded under.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)?;
        if let Some(d) = &self.digest {
            write!(f, "@{}", d)?;
        }
        Ok(())
    }
}

// ============================================================================
// Client seam
// ============================================================================

/// Source of the latest published digest for an image tag.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Digest the reference's tag currently resolves to.
    async fn latest_digest(&self, image: &ImageRef) -> std::result::Result<Digest, RegistryError>;
}

/// Map a registry HTTP status to a typed error.
pub fn parse_registry_error(status: u16, detail: &str) -> RegistryError {
    match status {
        401 | 403 => RegistryError::Auth(detail.to_string()),
        404 => RegistryError::NotFound(detail.to_string()),
        429 => RegistryError::RateLimited(detail.to_string()),
        500..=599 => RegistryError::Network(format!("HTTP {}: {}", status, detail)),
        _ => RegistryError::Protocol(format!("HTTP {}: {}", status, detail)),
    }
}
