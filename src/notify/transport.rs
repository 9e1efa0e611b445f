use super::Alert;
use crate::error::{Result, ScanError};
use async_trait::async_trait;
use chrono::Utc;
use log::info;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

/// Final hop of an alert. Mail and SMS gateways live outside this crate and
/// are reached through the webhook.
#[async_trait]
pub trait AlertTransport: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, alert: &Alert) -> Result<()>;
}

/// Writes alerts to the log. Default when no webhook is configured.
pub struct LogTransport;

#[async_trait]
impl AlertTransport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, alert: &Alert) -> Result<()> {
        info!("🔔 {}\n{}", alert.subject, alert.body);
        Ok(())
    }
}

/// POSTs each alert as JSON to a relay endpoint.
pub struct WebhookTransport {
    http: Client,
    url: String,
}

impl WebhookTransport {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self> {
        url::Url::parse(url).map_err(|e| ScanError::Config(format!("invalid webhook url: {}", e)))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ScanError::Config(format!("failed to build webhook client: {}", e)))?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl AlertTransport for WebhookTransport {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, alert: &Alert) -> Result<()> {
        let payload = json!({
            "subject": alert.subject,
            "body": alert.body,
            "content_type": if alert.is_structured { "text/html" } else { "text/plain" },
            "sent_at": Utc::now().to_rfc3339(),
        });
        let response = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ScanError::Notification(format!("webhook send failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScanError::Notification(format!("webhook answered HTTP {}", status)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_rejects_bad_url() {
        assert!(matches!(WebhookTransport::new("relay", 5), Err(ScanError::Config(_))));
        assert!(WebhookTransport::new("https://relay.example.com/hook", 5).is_ok());
    }

    #[tokio::test]
    async fn test_log_transport_always_delivers() {
        assert!(LogTransport.deliver(&Alert::plain("s", "b")).await.is_ok());
    }
}
