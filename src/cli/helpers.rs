//! Shared helper functions for CLI commands.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::Settings;
use crate::llm::{LlmClient, TextGenerator};
use crate::mail::Mailer;
use crate::repository::DbContext;
use crate::search::DuckDuckGoSearch;
use crate::services::{Collaborators, Engine};

/// Wire the production collaborators from settings. The LLM is only
/// attached when enabled; every service has a deterministic path without it.
pub fn build_engine(settings: &Settings, db: DbContext) -> anyhow::Result<Engine> {
    let search = Arc::new(DuckDuckGoSearch::new(settings.search.clone())?);
    let generator: Option<Arc<dyn TextGenerator>> = if settings.llm.enabled {
        Some(Arc::new(LlmClient::new(settings.llm.clone())?))
    } else {
        None
    };
    let mailer: Arc<dyn Mailer> = Arc::from(settings.mail.build()?);

    Ok(Engine::new(
        db,
        Collaborators {
            search,
            generator,
            mailer,
        },
        &settings.scheduler,
        &settings.digest,
    ))
}

/// Split `key=value`.
pub fn parse_assignment(raw: &str) -> anyhow::Result<(&str, &str)> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim(), v))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| anyhow::anyhow!("expected key=value, got '{}'", raw))
}

/// Row offset for a 1-based page number.
pub fn page_offset(page: u32, per_page: u32) -> i64 {
    i64::from(page.max(1) - 1) * i64::from(per_page)
}

pub fn format_time(dt: Option<DateTime<Utc>>) -> String {
    dt.map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Truncate a string to at most `max_len` characters, marking the cut.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignment() {
        assert_eq!(parse_assignment("query=rust jobs").unwrap(), ("query", "rust jobs"));
        assert_eq!(parse_assignment("filters={\"a\":\"b=c\"}").unwrap().1, "{\"a\":\"b=c\"}");
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=x").is_err());
    }

    #[test]
    fn test_page_offset() {
        assert_eq!(page_offset(1, 20), 0);
        assert_eq!(page_offset(3, 20), 40);
        assert_eq!(page_offset(0, 20), 0);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer title", 8), "a lon...");
    }
}
