//! Text generation used as an optional enhancement.
//!
//! Callers always have a deterministic path; an LLM failure of any kind
//! sends them down it.

mod client;
mod config;

use std::time::Duration;

use async_trait::async_trait;

pub use client::LlmClient;
pub use config::{LlmConfig, LlmProvider};

/// A single completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model override. `None` uses the client's configured model.
    pub model: Option<String>,
    pub system: String,
    pub user: String,
    pub timeout: Duration,
}

impl CompletionRequest {
    pub fn new(system: &str, user: &str, timeout: Duration) -> Self {
        Self {
            model: None,
            system: system.to_string(),
            user: user.to_string(),
            timeout,
        }
    }

    pub fn with_model(mut self, model: Option<&str>) -> Self {
        self.model = model.map(String::from);
        self
    }
}

/// Anything that can turn a prompt into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;
}

/// Errors that can occur during LLM operations.
#[derive(Debug)]
pub enum LlmError {
    /// Failed to connect to LLM service
    Connection(String),
    /// API returned an error
    Api(String),
    /// Failed to parse response
    Parse(String),
    /// Model not available
    ModelNotFound(String),
    /// No response within the request deadline
    Timeout(Duration),
    /// LLM is disabled
    Disabled,
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::Connection(msg) => write!(f, "Connection error: {}", msg),
            LlmError::Api(msg) => write!(f, "API error: {}", msg),
            LlmError::Parse(msg) => write!(f, "Parse error: {}", msg),
            LlmError::ModelNotFound(msg) => write!(f, "Model not found: {}", msg),
            LlmError::Timeout(d) => write!(f, "Timed out after {}s", d.as_secs()),
            LlmError::Disabled => write!(f, "LLM is disabled"),
        }
    }
}

impl std::error::Error for LlmError {}
