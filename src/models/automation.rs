//! Automation configs: one persisted crawler definition per record.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default interval between runs (one hour).
pub const DEFAULT_INTERVAL_SECS: i64 = 3600;

/// Longest schedule interval accepted: one year.
pub const MAX_INTERVAL_SECS: i64 = 366 * 24 * 3600;

/// A scheduled lead-sourcing crawler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationConfig {
    pub id: String,
    pub tenant_id: String,
    pub owner_id: String,
    pub name: String,
    /// CRM entity type that proposals from this config target.
    pub entity_type: String,

    pub enabled: bool,
    pub interval_secs: i64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub run_count: i64,
    pub consecutive_zero_runs: i32,
    /// Soft-disable after this many zero-proposal runs in a row. 0 disables the limit.
    pub empty_run_limit: i32,

    pub system_prompt: String,
    pub search_query: String,
    /// Key/value filters passed through to the lead-search tool.
    pub search_filters: serde_json::Map<String, serde_json::Value>,
    pub suggested_prompt: Option<String>,
    pub suggested_query: Option<String>,
    pub suggestion_reason: Option<String>,
    pub use_suggested_prompt: bool,
    pub use_suggested_query: bool,
    pub auto_accept_suggestions: bool,
    /// Minimum prospects in a single run before a new suggestion may be offered.
    pub suggestion_threshold: i32,
    pub suggestion_generated_at: Option<DateTime<Utc>>,
    pub suggestion_accepted_at: Option<DateTime<Utc>>,
    pub prompt_cooldown_runs: i32,
    pub prompt_cooldown_prospects: i32,
    /// Model used for LLM-backed suggestions. None means deterministic only.
    pub analysis_model: Option<String>,

    pub target_ids: Vec<i64>,
    pub source_document_ids: Vec<i64>,

    /// Pending-proposal backlog at which the config counts as compiled. 0 means no target.
    pub compilation_target: i32,
    pub compiled_at: Option<DateTime<Utc>>,
    pub disable_on_compiled: bool,

    pub digest_enabled: bool,
    pub digest_recipients: Vec<String>,
    /// Local wall-clock send time.
    pub digest_time: NaiveTime,
    /// Local zone expressed as a fixed offset from UTC.
    pub digest_utc_offset_minutes: i32,
    pub digest_model: Option<String>,
    pub last_digest_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AutomationConfig {
    /// Create an enabled config that is due immediately.
    pub fn new(tenant_id: &str, owner_id: &str, name: &str, search_query: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            entity_type: "lead".to_string(),
            enabled: true,
            interval_secs: DEFAULT_INTERVAL_SECS,
            last_run_at: None,
            next_run_at: None,
            run_count: 0,
            consecutive_zero_runs: 0,
            empty_run_limit: 0,
            system_prompt: String::new(),
            search_query: search_query.to_string(),
            search_filters: serde_json::Map::new(),
            suggested_prompt: None,
            suggested_query: None,
            suggestion_reason: None,
            use_suggested_prompt: false,
            use_suggested_query: false,
            auto_accept_suggestions: false,
            suggestion_threshold: 1,
            suggestion_generated_at: None,
            suggestion_accepted_at: None,
            prompt_cooldown_runs: 3,
            prompt_cooldown_prospects: 10,
            analysis_model: None,
            target_ids: Vec::new(),
            source_document_ids: Vec::new(),
            compilation_target: 0,
            compiled_at: None,
            disable_on_compiled: false,
            digest_enabled: false,
            digest_recipients: Vec::new(),
            digest_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
            digest_utc_offset_minutes: 0,
            digest_model: None,
            last_digest_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Query the next run will execute.
    pub fn active_query(&self) -> &str {
        match (&self.suggested_query, self.use_suggested_query) {
            (Some(q), true) if !q.trim().is_empty() => q,
            _ => &self.search_query,
        }
    }

    /// Prompt the next run will execute.
    pub fn active_prompt(&self) -> &str {
        match (&self.suggested_prompt, self.use_suggested_prompt) {
            (Some(p), true) if !p.trim().is_empty() => p,
            _ => &self.system_prompt,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at.map_or(true, |next| next <= now)
    }

    pub fn interval(&self) -> Duration {
        Duration::seconds(self.interval_secs.max(1))
    }

    pub fn has_compilation_target(&self) -> bool {
        self.compilation_target > 0
    }

    pub fn has_pending_suggestion(&self) -> bool {
        self.suggested_query.is_some() || self.suggested_prompt.is_some()
    }

    /// Apply a single `key=value` setting from the operator CLI.
    ///
    /// Only user-editable fields are accepted; schedule and controller state
    /// are owned by the engine.
    pub fn apply_setting(&mut self, key: &str, value: &str) -> Result<(), String> {
        fn flag(value: &str) -> Result<bool, String> {
            match value.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(true),
                "false" | "no" | "off" | "0" => Ok(false),
                other => Err(format!("expected a boolean, got '{}'", other)),
            }
        }
        fn int<T: std::str::FromStr>(value: &str) -> Result<T, String> {
            value
                .parse()
                .map_err(|_| format!("expected a number, got '{}'", value))
        }
        fn optional(value: &str) -> Option<String> {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        }
        fn ids(value: &str) -> Result<Vec<i64>, String> {
            value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(int::<i64>)
                .collect()
        }

        match key {
            "name" => self.name = value.to_string(),
            "entity_type" => self.entity_type = value.to_string(),
            "interval" | "interval_secs" => {
                let secs: i64 = int(value)?;
                if secs <= 0 {
                    return Err("interval must be positive".to_string());
                }
                if secs > MAX_INTERVAL_SECS {
                    return Err(format!("interval must be at most {}s", MAX_INTERVAL_SECS));
                }
                self.interval_secs = secs;
            }
            "empty_run_limit" => self.empty_run_limit = int(value)?,
            "system_prompt" | "prompt" => self.system_prompt = value.to_string(),
            "search_query" | "query" => self.search_query = value.to_string(),
            "search_filters" | "filters" => {
                let parsed: serde_json::Value =
                    serde_json::from_str(value).map_err(|e| e.to_string())?;
                match parsed {
                    serde_json::Value::Object(map) => self.search_filters = map,
                    _ => return Err("filters must be a JSON object".to_string()),
                }
            }
            "use_suggested_prompt" => self.use_suggested_prompt = flag(value)?,
            "use_suggested_query" => self.use_suggested_query = flag(value)?,
            "auto_accept_suggestions" => self.auto_accept_suggestions = flag(value)?,
            "suggestion_threshold" => self.suggestion_threshold = int(value)?,
            "prompt_cooldown_runs" => self.prompt_cooldown_runs = int(value)?,
            "prompt_cooldown_prospects" => self.prompt_cooldown_prospects = int(value)?,
            "analysis_model" => self.analysis_model = optional(value),
            "target_ids" => self.target_ids = ids(value)?,
            "source_document_ids" => self.source_document_ids = ids(value)?,
            "compilation_target" => self.compilation_target = int(value)?,
            "disable_on_compiled" => self.disable_on_compiled = flag(value)?,
            "digest_enabled" => self.digest_enabled = flag(value)?,
            "digest_recipients" => self.digest_recipients = split_recipients(value),
            "digest_time" => {
                self.digest_time = NaiveTime::parse_from_str(value.trim(), "%H:%M")
                    .map_err(|_| format!("expected HH:MM, got '{}'", value))?
            }
            "digest_utc_offset_minutes" | "utc_offset" => {
                let minutes: i32 = int(value)?;
                if minutes.abs() > 14 * 60 {
                    return Err("UTC offset out of range".to_string());
                }
                self.digest_utc_offset_minutes = minutes;
            }
            "digest_model" => self.digest_model = optional(value),
            other => return Err(format!("unknown setting '{}'", other)),
        }
        Ok(())
    }
}

/// Split a comma-separated recipient list, dropping blanks.
pub fn split_recipients(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_config_is_due_immediately() {
        let config = AutomationConfig::new("t1", "u1", "fintech", "fintech startups");
        assert!(config.is_due(Utc::now()));
        assert_eq!(config.interval_secs, DEFAULT_INTERVAL_SECS);
    }

    #[test]
    fn test_disabled_config_is_never_due() {
        let mut config = AutomationConfig::new("t1", "u1", "fintech", "q");
        config.enabled = false;
        assert!(!config.is_due(Utc::now()));
    }

    #[test]
    fn test_active_query_prefers_suggestion_only_when_flagged() {
        let mut config = AutomationConfig::new("t1", "u1", "n", "base query");
        config.suggested_query = Some("better query".to_string());
        assert_eq!(config.active_query(), "base query");

        config.use_suggested_query = true;
        assert_eq!(config.active_query(), "better query");

        config.suggested_query = None;
        assert_eq!(config.active_query(), "base query");
    }

    #[test]
    fn test_apply_setting() {
        let mut config = AutomationConfig::new("t1", "u1", "n", "q");
        config.apply_setting("interval", "900").unwrap();
        config.apply_setting("digest_time", "07:30").unwrap();
        config
            .apply_setting("digest_recipients", "a@x.com, ,b@x.com")
            .unwrap();
        config.apply_setting("target_ids", "1,2, 3").unwrap();
        config
            .apply_setting("filters", r#"{"region": "emea"}"#)
            .unwrap();

        assert_eq!(config.interval_secs, 900);
        assert_eq!(config.digest_time, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert_eq!(config.digest_recipients, vec!["a@x.com", "b@x.com"]);
        assert_eq!(config.target_ids, vec![1, 2, 3]);
        assert_eq!(config.search_filters["region"], "emea");

        assert!(config.apply_setting("interval", "0").is_err());
        assert!(config.apply_setting("interval", "10000000000000").is_err());
        assert_eq!(config.interval_secs, 900);
        config
            .apply_setting("interval", &MAX_INTERVAL_SECS.to_string())
            .unwrap();
        assert!(config.apply_setting("next_run_at", "now").is_err());
        assert!(config.apply_setting("filters", "[1]").is_err());
    }
}
