//! Query and prompt suggestions from run analytics.
//!
//! [`DeterministicSuggester`] always works. [`LlmSuggester`] asks the
//! config's analysis model and falls back to the deterministic rules when the
//! model is unset, unreachable or returns something unusable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::analytics::RunAnalytics;
use crate::llm::{CompletionRequest, TextGenerator};
use crate::models::AutomationConfig;
use crate::repository::automation::SuggestionUpdate;

/// Prefix of the prompt addendum that steers away from over-broad queries.
const STEER_PREFIX: &str = "Avoid leads resembling these over-broad searches";
const MAX_STEER_QUERIES: usize = 3;

#[async_trait]
pub trait Suggester: Send + Sync {
    /// Propose a better query and/or prompt. `None` when there is nothing
    /// worth changing.
    async fn suggest(
        &self,
        config: &AutomationConfig,
        analytics: &RunAnalytics,
    ) -> Option<SuggestionUpdate>;
}

/// Rule-based suggestions: switch to the best-yielding query when it beats
/// the active one, and name over-broad queries in the prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicSuggester;

impl DeterministicSuggester {
    fn better_query(config: &AutomationConfig, analytics: &RunAnalytics) -> Option<String> {
        let best = analytics.best()?;
        let active = config.active_query();
        if best.query == active {
            return None;
        }
        match analytics.stats_for(active) {
            Some(current) if current.proposals >= best.proposals => None,
            _ => Some(best.query.clone()),
        }
    }

    fn steered_prompt(config: &AutomationConfig, analytics: &RunAnalytics) -> Option<String> {
        let worst: Vec<&str> = analytics
            .worst()
            .into_iter()
            .take(MAX_STEER_QUERIES)
            .map(|q| q.query.as_str())
            .collect();
        if worst.is_empty() {
            return None;
        }

        let base = strip_steer(config.active_prompt());
        let addendum = format!("{}: {}.", STEER_PREFIX, worst.join("; "));
        let prompt = if base.is_empty() {
            addendum
        } else {
            format!("{}\n\n{}", base, addendum)
        };
        (prompt != config.active_prompt()).then_some(prompt)
    }
}

fn strip_steer(prompt: &str) -> &str {
    match prompt.find(STEER_PREFIX) {
        Some(idx) => prompt[..idx].trim_end(),
        None => prompt.trim_end(),
    }
}

#[async_trait]
impl Suggester for DeterministicSuggester {
    async fn suggest(
        &self,
        config: &AutomationConfig,
        analytics: &RunAnalytics,
    ) -> Option<SuggestionUpdate> {
        let query = Self::better_query(config, analytics);
        let prompt = Self::steered_prompt(config, analytics);
        if query.is_none() && prompt.is_none() {
            return None;
        }

        let mut reasons = Vec::new();
        if let (Some(q), Some(best)) = (&query, analytics.best()) {
            reasons.push(format!(
                "'{}' produced {} proposals over {} runs ({:.0}% conversion)",
                q,
                best.proposals,
                best.runs,
                best.conversion_rate() * 100.0
            ));
        }
        if prompt.is_some() {
            let worst = analytics.worst();
            reasons.push(format!(
                "{} quer{} found prospects but no proposals",
                worst.len(),
                if worst.len() == 1 { "y" } else { "ies" }
            ));
        }

        Some(SuggestionUpdate {
            query,
            prompt,
            reason: reasons.join("; "),
        })
    }
}

#[derive(Debug, Deserialize)]
struct LlmSuggestion {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

const ANALYSIS_SYSTEM: &str = "You tune lead-sourcing searches. Given yield statistics per \
search query, propose an improved search query and/or an improved instruction prompt. \
Respond with a single JSON object with optional string fields \"query\" and \"prompt\" \
and a short \"reason\". Omit a field to keep the current value.";

/// Suggestions from the config's analysis model.
pub struct LlmSuggester {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
    fallback: DeterministicSuggester,
}

impl LlmSuggester {
    pub fn new(generator: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self {
            generator,
            timeout,
            fallback: DeterministicSuggester,
        }
    }

    fn build_request(config: &AutomationConfig, analytics: &RunAnalytics) -> String {
        let mut out = format!(
            "Current query: {}\nCurrent prompt: {}\nRuns analysed: {} ({} prospects, {} proposals)\n\nPer-query yield:\n",
            config.active_query(),
            config.active_prompt(),
            analytics.total_runs,
            analytics.total_prospects,
            analytics.total_proposals,
        );
        for q in &analytics.queries {
            out.push_str(&format!(
                "- \"{}\": {} runs, {} prospects, {} proposals\n",
                q.query, q.runs, q.prospects, q.proposals
            ));
        }
        out
    }

    fn parse(config: &AutomationConfig, text: &str) -> Option<SuggestionUpdate> {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        if end < start {
            return None;
        }
        let parsed: LlmSuggestion = serde_json::from_str(&text[start..=end]).ok()?;

        let keep = |value: Option<String>, current: &str| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty() && v != current)
        };
        let query = keep(parsed.query, config.active_query());
        let prompt = keep(parsed.prompt, config.active_prompt());
        if query.is_none() && prompt.is_none() {
            return None;
        }
        Some(SuggestionUpdate {
            query,
            prompt,
            reason: parsed
                .reason
                .unwrap_or_else(|| "suggested by analysis model".to_string()),
        })
    }
}

#[async_trait]
impl Suggester for LlmSuggester {
    async fn suggest(
        &self,
        config: &AutomationConfig,
        analytics: &RunAnalytics,
    ) -> Option<SuggestionUpdate> {
        let Some(model) = config.analysis_model.as_deref() else {
            return self.fallback.suggest(config, analytics).await;
        };

        let request = CompletionRequest::new(
            ANALYSIS_SYSTEM,
            &Self::build_request(config, analytics),
            self.timeout,
        )
        .with_model(Some(model));

        match self.generator.complete(request).await {
            Ok(text) => match Self::parse(config, &text) {
                Some(suggestion) => Some(suggestion),
                None => {
                    debug!(config_id = %config.id, "Analysis model reply unusable, using rules");
                    self.fallback.suggest(config, analytics).await
                }
            },
            Err(e) => {
                warn!(config_id = %config.id, model, "Analysis model failed: {}", e);
                self.fallback.suggest(config, analytics).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::services::analytics::test_runs::runs;

    struct Canned(Result<&'static str, ()>);

    #[async_trait]
    impl TextGenerator for Canned {
        async fn complete(&self, _request: CompletionRequest) -> Result<String, LlmError> {
            self.0
                .map(String::from)
                .map_err(|_| LlmError::Connection("refused".to_string()))
        }
    }

    fn config(query: &str) -> AutomationConfig {
        let mut config = AutomationConfig::new("t1", "u1", "c", query);
        config.system_prompt = "Find fintech buyers.".to_string();
        config
    }

    #[tokio::test]
    async fn test_deterministic_prefers_better_query() {
        let analytics = RunAnalytics::from_runs(&runs(&[
            ("fintech", 10, 1),
            ("fintech cfo", 10, 5),
        ]));
        let suggestion = DeterministicSuggester
            .suggest(&config("fintech"), &analytics)
            .await
            .unwrap();
        assert_eq!(suggestion.query.as_deref(), Some("fintech cfo"));
        assert!(suggestion.prompt.is_none());
        assert!(suggestion.reason.contains("5 proposals"));
    }

    #[tokio::test]
    async fn test_deterministic_steers_prompt_once() {
        let analytics = RunAnalytics::from_runs(&runs(&[("fintech", 12, 0), ("fintech", 8, 0)]));
        let mut config = config("fintech");

        let suggestion = DeterministicSuggester
            .suggest(&config, &analytics)
            .await
            .unwrap();
        let prompt = suggestion.prompt.unwrap();
        assert!(prompt.starts_with("Find fintech buyers.\n\n"));
        assert!(prompt.contains("fintech"));

        // Already steered: nothing new to say.
        config.system_prompt = prompt;
        assert!(DeterministicSuggester
            .suggest(&config, &analytics)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_llm_reply_is_used() {
        let mut config = config("fintech");
        config.analysis_model = Some("llama3".to_string());
        let generator = Arc::new(Canned(Ok(
            "Sure! {\"query\": \"fintech head of payments\", \"reason\": \"narrower\"}",
        )));
        let suggester = LlmSuggester::new(generator, Duration::from_secs(1));

        let analytics = RunAnalytics::from_runs(&runs(&[("fintech", 10, 1)]));
        let suggestion = suggester.suggest(&config, &analytics).await.unwrap();
        assert_eq!(suggestion.query.as_deref(), Some("fintech head of payments"));
        assert_eq!(suggestion.reason, "narrower");
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back() {
        let mut config = config("fintech");
        config.analysis_model = Some("llama3".to_string());
        let suggester = LlmSuggester::new(Arc::new(Canned(Err(()))), Duration::from_secs(1));

        let analytics = RunAnalytics::from_runs(&runs(&[
            ("fintech", 10, 1),
            ("fintech cfo", 10, 5),
        ]));
        let suggestion = suggester.suggest(&config, &analytics).await.unwrap();
        assert_eq!(suggestion.query.as_deref(), Some("fintech cfo"));
    }

    #[tokio::test]
    async fn test_llm_without_model_uses_rules() {
        let suggester = LlmSuggester::new(
            Arc::new(Canned(Ok("{\"query\": \"ignored\"}"))),
            Duration::from_secs(1),
        );
        let analytics = RunAnalytics::from_runs(&runs(&[("fintech", 10, 1)]));
        assert!(suggester
            .suggest(&config("fintech"), &analytics)
            .await
            .is_none());
    }
}
