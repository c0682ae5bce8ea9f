//! Docker Registry HTTP API v2 client.
//!
//! Resolves a tag to its manifest digest with a `HEAD` request. Registries that
//! require a token answer `401` with a `WWW-Authenticate: Bearer ...` challenge;
//! the client fetches an anonymous pull token from the advertised realm and
//! retries once. Tokens are cached per repository.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::{parse_registry_error, Digest, ImageRef, RegistryClient};
use crate::error::RegistryError;
use crate::secret::SecretValue;

const DIGEST_HEADER: &str = "Docker-Content-Digest";

/// Manifest types accepted, multi-arch indexes first so the digest matches
/// what `docker pull` records.
const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
application/vnd.docker.distribution.manifest.list.v2+json, \
application/vnd.docker.distribution.manifest.v2+json, \
application/vnd.oci.image.manifest.v1+json";

/// Parsed `WWW-Authenticate: Bearer` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl BearerChallenge {
    /// Parse `Bearer realm="...",service="...",scope="..."`.
    ///
    /// Quoted values may contain commas (scopes like `repository:a:pull,push`).
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let rest = header
            .get(..7)
            .filter(|p| p.eq_ignore_ascii_case("bearer "))
            .map(|_| &header[7..])?;

        let mut params = HashMap::new();
        let mut chars = rest.chars().peekable();
        loop {
            while chars.peek().is_some_and(|c| *c == ',' || c.is_whitespace()) {
                chars.next();
            }
            let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
            if key.is_empty() {
                break;
            }
            let mut value = String::new();
            if chars.peek() == Some(&'"') {
                chars.next();
                let mut escaped = false;
                for c in chars.by_ref() {
                    match (escaped, c) {
                        (false, '\\') => escaped = true,
                        (false, '"') => break,
                        _ => {
                            value.push(c);
                            escaped = false;
                        }
                    }
                }
            } else {
                while let Some(c) = chars.peek() {
                    if *c == ',' {
                        break;
                    }
                    value.push(*c);
                    chars.next();
                }
            }
            params.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        Some(Self {
            realm: params.remove("realm")?,
            service: params.remove("service"),
            scope: params.remove("scope"),
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Registry client over HTTPS.
pub struct HttpRegistry {
    client: Client,
    timeout: Duration,
    tokens: RwLock<HashMap<String, SecretValue>>,
}

impl HttpRegistry {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("bandstack/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            timeout,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub fn manifest_url(image: &ImageRef) -> String {
        format!(
            "https://{}/v2/{}/manifests/{}",
            image.api_host(),
            image.repository,
            image.tag
        )
    }

    fn map_reqwest(&self, e: reqwest::Error) -> RegistryError {
        if e.is_timeout() {
            RegistryError::Timeout(self.timeout.as_secs())
        } else {
            RegistryError::Network(e.to_string())
        }
    }

    async fn head_manifest(
        &self,
        url: &str,
        token: Option<&SecretValue>,
    ) -> Result<reqwest::Response, RegistryError> {
        let mut req = self.client.head(url).header(ACCEPT, MANIFEST_ACCEPT);
        if let Some(token) = token {
            req = req.bearer_auth(token.expose());
        }
        req.send().await.map_err(|e| self.map_reqwest(e))
    }

    async fn fetch_token(
        &self,
        challenge: &BearerChallenge,
        image: &ImageRef,
    ) -> Result<SecretValue, RegistryError> {
        let scope = challenge
            .scope
            .clone()
            .unwrap_or_else(|| format!("repository:{}:pull", image.repository));
        let mut query = vec![("scope", scope)];
        if let Some(service) = &challenge.service {
            query.push(("service", service.clone()));
        }

        let resp = self
            .client
            .get(&challenge.realm)
            .query(&query)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;
        if !resp.status().is_success() {
            return Err(parse_registry_error(
                resp.status().as_u16(),
                "token request rejected",
            ));
        }
        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| RegistryError::Protocol(format!("token response: {}", e)))?;
        body.token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .map(SecretValue::new)
            .ok_or_else(|| RegistryError::Protocol("token response without token".into()))
    }

    async fn resolve(&self, image: &ImageRef) -> Result<Digest, RegistryError> {
        let url = Self::manifest_url(image);
        let cache_key = image.name();
        let cached = self.tokens.read().await.get(&cache_key).cloned();

        let mut resp = self.head_manifest(&url, cached.as_ref()).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            let challenge = resp
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(BearerChallenge::parse)
                .ok_or_else(|| RegistryError::Auth("401 without bearer challenge".into()))?;
            debug!(image = %image, realm = %challenge.realm, "Fetching registry token");
            let token = self.fetch_token(&challenge, image).await?;
            resp = self.head_manifest(&url, Some(&token)).await?;
            self.tokens.write().await.insert(cache_key, token);
        }

        let status = resp.status();
        if !status.is_success() {
            return Err(parse_registry_error(status.as_u16(), &url));
        }
        let header = resp
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RegistryError::Protocol(format!("no {} header", DIGEST_HEADER)))?;
        Digest::parse(header).map_err(|e| RegistryError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl RegistryClient for HttpRegistry {
    async fn latest_digest(&self, image: &ImageRef) -> Result<Digest, RegistryError> {
        match tokio::time::timeout(self.timeout, self.resolve(image)).await {
            Ok(result) => result,
            Err(_) => Err(RegistryError::Timeout(self.timeout.as_secs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_docker_hub_challenge() {
        let c = BearerChallenge::parse(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/alpine:pull""#,
        )
        .unwrap();
        assert_eq!(c.realm, "https://auth.docker.io/token");
        assert_eq!(c.service.as_deref(), Some("registry.docker.io"));
        assert_eq!(c.scope.as_deref(), Some("repository:library/alpine:pull"));
    }

    #[test]
    fn test_parse_challenge_with_comma_in_scope() {
        let c = BearerChallenge::parse(
            r#"bearer realm="https://ghcr.io/token", scope="repository:org/x:pull,push""#,
        )
        .unwrap();
        assert_eq!(c.scope.as_deref(), Some("repository:org/x:pull,push"));
        assert!(c.service.is_none());
    }

    #[test]
    fn test_parse_challenge_unquoted() {
        let c = BearerChallenge::parse("Bearer realm=https://r.example/token,service=r").unwrap();
        assert_eq!(c.realm, "https://r.example/token");
        assert_eq!(c.service.as_deref(), Some("r"));
    }

    #[test]
    fn test_parse_challenge_rejects_basic_and_missing_realm() {
        assert!(BearerChallenge::parse(r#"Basic realm="x""#).is_none());
        assert!(BearerChallenge::parse(r#"Bearer service="x""#).is_none());
        assert!(BearerChallenge::parse("Bear").is_none());
    }

    #[test]
    fn test_manifest_url() {
        let image = ImageRef::parse("fazalfarhan01/earnapp:lite").unwrap();
        assert_eq!(
            HttpRegistry::manifest_url(&image),
            "https://registry-1.docker.io/v2/fazalfarhan01/earnapp/manifests/lite"
        );
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_network_or_timeout() {
        let registry = HttpRegistry::new(Duration::from_secs(2));
        let image = ImageRef::parse("127.0.0.1:9/none/app:1").unwrap();
        let err = registry.latest_digest(&image).await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {:?}", err);
    }
}
