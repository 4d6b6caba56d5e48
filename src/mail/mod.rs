//! Outbound email.
//!
//! Production sends through an HTTP mail relay (any service accepting a JSON
//! POST with `from`, `to`, `subject`, `text`). Without a relay configured,
//! messages are only logged.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("relay rejected message: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
}

/// Email transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

/// Mail settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailConfig {
    /// Relay endpoint. Unset means log-only delivery.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_from")]
    pub from: String,
}

fn default_from() -> String {
    "prospector@localhost".to_string()
}

impl MailConfig {
    /// Apply `MAIL_ENDPOINT`, `MAIL_API_KEY` and `MAIL_FROM`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("MAIL_ENDPOINT") {
            self.endpoint = Some(val);
        }
        if let Ok(val) = std::env::var("MAIL_API_KEY") {
            self.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("MAIL_FROM") {
            self.from = val;
        }
        if self.from.is_empty() {
            self.from = default_from();
        }
        self
    }

    /// Build the transport this config describes.
    pub fn build(&self) -> Result<Box<dyn Mailer>, MailError> {
        match &self.endpoint {
            Some(endpoint) => Ok(Box::new(HttpRelayMailer::new(
                endpoint,
                self.api_key.clone(),
                &self.from,
            )?)),
            None => Ok(Box::new(LogMailer)),
        }
    }
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

pub struct HttpRelayMailer {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    from: String,
}

impl HttpRelayMailer {
    pub fn new(endpoint: &str, api_key: Option<String>, from: &str) -> Result<Self, MailError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key,
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for HttpRelayMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        if !looks_like_address(to) {
            return Err(MailError::InvalidRecipient(to.to_string()));
        }
        let message = RelayMessage {
            from: &self.from,
            to,
            subject,
            text: body,
        };
        let mut req = self.client.post(&self.endpoint).json(&message);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(MailError::Rejected { status, body });
        }
        Ok(())
    }
}

/// Writes messages to the log instead of sending them.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        if !looks_like_address(to) {
            return Err(MailError::InvalidRecipient(to.to_string()));
        }
        info!(to, subject, chars = body.len(), "Mail relay not configured; logging message");
        Ok(())
    }
}

fn looks_like_address(addr: &str) -> bool {
    match addr.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !addr.contains(' '),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_check() {
        assert!(looks_like_address("ops@example.com"));
        assert!(!looks_like_address("ops"));
        assert!(!looks_like_address("@example.com"));
        assert!(!looks_like_address("a b@example.com"));
    }

    #[tokio::test]
    async fn test_log_mailer_rejects_bad_recipient() {
        let mailer = LogMailer;
        assert!(mailer.send("ops@example.com", "s", "b").await.is_ok());
        assert!(matches!(
            mailer.send("nobody", "s", "b").await,
            Err(MailError::InvalidRecipient(_))
        ));
    }
}
