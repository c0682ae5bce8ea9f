//! Webhook notification sink.
//!
//! POSTs the notification as JSON. A bearer token, when configured, is sent in
//! the `Authorization` header and never logged.

use async_trait::async_trait;
use std::time::Duration;

use super::{NotificationSink, UpdateNotification};
use crate::error::{BandstackError, Result};
use crate::secret::SecretValue;

pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    token: Option<SecretValue>,
}

impl WebhookSink {
    pub fn new(url: &str, token: Option<SecretValue>, timeout: Duration) -> Result<Self> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| BandstackError::Config(format!("invalid webhook URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(BandstackError::Config(format!(
                "webhook URL must be http or https, got {}",
                parsed.scheme()
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("bandstack/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            token,
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, notification: &UpdateNotification) -> Result<()> {
        let mut request = self.client.post(&self.url).json(notification);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose());
        }
        request.send().await?.error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationStatus;
    use chrono::Utc;

    #[test]
    fn test_rejects_bad_urls() {
        assert!(WebhookSink::new("not a url", None, Duration::from_secs(1)).is_err());
        assert!(WebhookSink::new("ftp://example.com/x", None, Duration::from_secs(1)).is_err());
        assert!(WebhookSink::new("https://example.com/x", None, Duration::from_secs(1)).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_errors() {
        let sink = WebhookSink::new(
            "http://127.0.0.1:9/hook",
            Some(SecretValue::new("tok")),
            Duration::from_secs(2),
        )
        .unwrap();
        let n = UpdateNotification {
            stack: "home".into(),
            vendor: "earnapp".into(),
            old_digest: None,
            new_digest: None,
            timestamp: Utc::now(),
            status: NotificationStatus::Updated,
            detail: None,
        };
        let err = sink.deliver(&n).await.unwrap_err();
        assert!(matches!(err, BandstackError::Http(_)));
    }
}
