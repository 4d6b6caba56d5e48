//! Lead search: the external tool that turns a query into candidate leads.

mod duckduckgo;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use duckduckgo::DuckDuckGoSearch;

/// A lead returned by a search, before deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub url: String,
    pub title: String,
    /// Company or account the lead belongs to, when it can be told.
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    /// Tool-specific extras carried into the proposal payload.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl Candidate {
    pub fn new(url: &str, title: &str) -> Self {
        Self {
            url: url.to_string(),
            title: title.to_string(),
            account: None,
            snippet: None,
            raw: serde_json::Value::Null,
        }
    }

    pub fn with_account(mut self, account: &str) -> Self {
        self.account = Some(account.to_string());
        self
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("search unavailable: {0}")]
    Unavailable(String),

    #[error("failed to parse results: {0}")]
    Parse(String),
}

/// The lead-search tool.
///
/// `filters` are the config's structured key/value filters, passed through
/// untouched; implementations use the keys they understand.
#[async_trait]
pub trait LeadSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        filters: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<Candidate>, SearchError>;
}

/// Search client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Results kept per query. 0 keeps everything the engine returns.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_user_agent() -> String {
    format!("prospector/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_results() -> usize {
    25
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            max_results: default_max_results(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}
