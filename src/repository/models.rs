//! Diesel row types and their conversion to domain models.
//!
//! Typed fields (timestamps, JSON arrays, enums) are serialized here and
//! nowhere else.

use chrono::NaiveTime;
use diesel::prelude::*;

use super::pool::DieselError;
use super::util::json_error;
use super::{format_timestamp, format_timestamp_opt, parse_datetime, parse_datetime_opt};
use crate::models::{
    split_recipients, AutomationConfig, DedupKeys, Proposal, ProposalOperation, ProposalSource,
    ProposalStatus, RunLog, RunStatus,
};
use crate::schema::{automation_configs, proposals, run_logs};

const DIGEST_TIME_FORMAT: &str = "%H:%M";

fn bad_value(column: &str, value: &str) -> DieselError {
    DieselError::DeserializationError(format!("invalid {} value '{}'", column, value).into())
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = automation_configs)]
pub struct AutomationConfigRecord {
    pub id: String,
    pub tenant_id: String,
    pub owner_id: String,
    pub name: String,
    pub entity_type: String,
    pub enabled: bool,
    pub interval_secs: i64,
    pub last_run_at: Option<String>,
    pub next_run_at: Option<String>,
    pub run_count: i64,
    pub consecutive_zero_runs: i32,
    pub empty_run_limit: i32,
    pub system_prompt: String,
    pub search_query: String,
    pub search_filters: String,
    pub suggested_prompt: Option<String>,
    pub suggested_query: Option<String>,
    pub suggestion_reason: Option<String>,
    pub use_suggested_prompt: bool,
    pub use_suggested_query: bool,
    pub auto_accept_suggestions: bool,
    pub suggestion_threshold: i32,
    pub suggestion_generated_at: Option<String>,
    pub suggestion_accepted_at: Option<String>,
    pub prompt_cooldown_runs: i32,
    pub prompt_cooldown_prospects: i32,
    pub analysis_model: Option<String>,
    pub target_ids: String,
    pub source_document_ids: String,
    pub compilation_target: i32,
    pub compiled_at: Option<String>,
    pub disable_on_compiled: bool,
    pub digest_enabled: bool,
    pub digest_recipients: String,
    pub digest_time: String,
    pub digest_utc_offset_minutes: i32,
    pub digest_model: Option<String>,
    pub last_digest_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<AutomationConfigRecord> for AutomationConfig {
    type Error = DieselError;

    fn try_from(r: AutomationConfigRecord) -> Result<Self, Self::Error> {
        let search_filters = match serde_json::from_str(&r.search_filters).map_err(json_error)? {
            serde_json::Value::Object(map) => map,
            _ => return Err(bad_value("search_filters", &r.search_filters)),
        };
        let digest_time = NaiveTime::parse_from_str(&r.digest_time, DIGEST_TIME_FORMAT)
            .map_err(|_| bad_value("digest_time", &r.digest_time))?;

        Ok(AutomationConfig {
            target_ids: serde_json::from_str(&r.target_ids).map_err(json_error)?,
            source_document_ids: serde_json::from_str(&r.source_document_ids)
                .map_err(json_error)?,
            search_filters,
            digest_time,
            digest_recipients: split_recipients(&r.digest_recipients),
            last_run_at: parse_datetime_opt(r.last_run_at),
            next_run_at: parse_datetime_opt(r.next_run_at),
            suggestion_generated_at: parse_datetime_opt(r.suggestion_generated_at),
            suggestion_accepted_at: parse_datetime_opt(r.suggestion_accepted_at),
            compiled_at: parse_datetime_opt(r.compiled_at),
            last_digest_at: parse_datetime_opt(r.last_digest_at),
            created_at: parse_datetime(&r.created_at),
            updated_at: parse_datetime(&r.updated_at),
            id: r.id,
            tenant_id: r.tenant_id,
            owner_id: r.owner_id,
            name: r.name,
            entity_type: r.entity_type,
            enabled: r.enabled,
            interval_secs: r.interval_secs,
            run_count: r.run_count,
            consecutive_zero_runs: r.consecutive_zero_runs,
            empty_run_limit: r.empty_run_limit,
            system_prompt: r.system_prompt,
            search_query: r.search_query,
            suggested_prompt: r.suggested_prompt,
            suggested_query: r.suggested_query,
            suggestion_reason: r.suggestion_reason,
            use_suggested_prompt: r.use_suggested_prompt,
            use_suggested_query: r.use_suggested_query,
            auto_accept_suggestions: r.auto_accept_suggestions,
            suggestion_threshold: r.suggestion_threshold,
            prompt_cooldown_runs: r.prompt_cooldown_runs,
            prompt_cooldown_prospects: r.prompt_cooldown_prospects,
            analysis_model: r.analysis_model,
            compilation_target: r.compilation_target,
            disable_on_compiled: r.disable_on_compiled,
            digest_enabled: r.digest_enabled,
            digest_utc_offset_minutes: r.digest_utc_offset_minutes,
            digest_model: r.digest_model,
        })
    }
}

impl TryFrom<&AutomationConfig> for AutomationConfigRecord {
    type Error = DieselError;

    fn try_from(c: &AutomationConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            id: c.id.clone(),
            tenant_id: c.tenant_id.clone(),
            owner_id: c.owner_id.clone(),
            name: c.name.clone(),
            entity_type: c.entity_type.clone(),
            enabled: c.enabled,
            interval_secs: c.interval_secs,
            last_run_at: format_timestamp_opt(c.last_run_at),
            next_run_at: format_timestamp_opt(c.next_run_at),
            run_count: c.run_count,
            consecutive_zero_runs: c.consecutive_zero_runs,
            empty_run_limit: c.empty_run_limit,
            system_prompt: c.system_prompt.clone(),
            search_query: c.search_query.clone(),
            search_filters: to_json(&c.search_filters)?,
            suggested_prompt: c.suggested_prompt.clone(),
            suggested_query: c.suggested_query.clone(),
            suggestion_reason: c.suggestion_reason.clone(),
            use_suggested_prompt: c.use_suggested_prompt,
            use_suggested_query: c.use_suggested_query,
            auto_accept_suggestions: c.auto_accept_suggestions,
            suggestion_threshold: c.suggestion_threshold,
            suggestion_generated_at: format_timestamp_opt(c.suggestion_generated_at),
            suggestion_accepted_at: format_timestamp_opt(c.suggestion_accepted_at),
            prompt_cooldown_runs: c.prompt_cooldown_runs,
            prompt_cooldown_prospects: c.prompt_cooldown_prospects,
            analysis_model: c.analysis_model.clone(),
            target_ids: to_json(&c.target_ids)?,
            source_document_ids: to_json(&c.source_document_ids)?,
            compilation_target: c.compilation_target,
            compiled_at: format_timestamp_opt(c.compiled_at),
            disable_on_compiled: c.disable_on_compiled,
            digest_enabled: c.digest_enabled,
            digest_recipients: c.digest_recipients.join(","),
            digest_time: c.digest_time.format(DIGEST_TIME_FORMAT).to_string(),
            digest_utc_offset_minutes: c.digest_utc_offset_minutes,
            digest_model: c.digest_model.clone(),
            last_digest_at: format_timestamp_opt(c.last_digest_at),
            created_at: format_timestamp(c.created_at),
            updated_at: format_timestamp(c.updated_at),
        })
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, DieselError> {
    serde_json::to_string(value).map_err(|e| DieselError::SerializationError(Box::new(e)))
}

/// User-editable settings. Schedule, counters and controller state are left alone.
#[derive(AsChangeset, Debug)]
#[diesel(table_name = automation_configs)]
#[diesel(treat_none_as_null = true)]
pub struct AutomationSettingsChangeset {
    pub name: String,
    pub entity_type: String,
    pub enabled: bool,
    pub interval_secs: i64,
    pub empty_run_limit: i32,
    pub system_prompt: String,
    pub search_query: String,
    pub search_filters: String,
    pub use_suggested_prompt: bool,
    pub use_suggested_query: bool,
    pub auto_accept_suggestions: bool,
    pub suggestion_threshold: i32,
    pub prompt_cooldown_runs: i32,
    pub prompt_cooldown_prospects: i32,
    pub analysis_model: Option<String>,
    pub target_ids: String,
    pub source_document_ids: String,
    pub compilation_target: i32,
    pub disable_on_compiled: bool,
    pub digest_enabled: bool,
    pub digest_recipients: String,
    pub digest_time: String,
    pub digest_utc_offset_minutes: i32,
    pub digest_model: Option<String>,
    pub updated_at: String,
}

impl From<AutomationConfigRecord> for AutomationSettingsChangeset {
    fn from(r: AutomationConfigRecord) -> Self {
        Self {
            name: r.name,
            entity_type: r.entity_type,
            enabled: r.enabled,
            interval_secs: r.interval_secs,
            empty_run_limit: r.empty_run_limit,
            system_prompt: r.system_prompt,
            search_query: r.search_query,
            search_filters: r.search_filters,
            use_suggested_prompt: r.use_suggested_prompt,
            use_suggested_query: r.use_suggested_query,
            auto_accept_suggestions: r.auto_accept_suggestions,
            suggestion_threshold: r.suggestion_threshold,
            prompt_cooldown_runs: r.prompt_cooldown_runs,
            prompt_cooldown_prospects: r.prompt_cooldown_prospects,
            analysis_model: r.analysis_model,
            target_ids: r.target_ids,
            source_document_ids: r.source_document_ids,
            compilation_target: r.compilation_target,
            disable_on_compiled: r.disable_on_compiled,
            digest_enabled: r.digest_enabled,
            digest_recipients: r.digest_recipients,
            digest_time: r.digest_time,
            digest_utc_offset_minutes: r.digest_utc_offset_minutes,
            digest_model: r.digest_model,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = run_logs)]
pub struct RunLogRecord {
    pub id: String,
    pub config_id: String,
    pub tenant_id: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: String,
    pub prospects_found: i32,
    pub duplicates_skipped: i32,
    pub proposals_created: i32,
    pub executed_query: String,
    pub executed_prompt: String,
    pub prompt_chars: i32,
    pub compiled: bool,
    pub query_updated: bool,
    pub prompt_updated: bool,
    pub error_message: Option<String>,
}

impl TryFrom<RunLogRecord> for RunLog {
    type Error = DieselError;

    fn try_from(r: RunLogRecord) -> Result<Self, Self::Error> {
        let status = RunStatus::from_str(&r.status).ok_or_else(|| bad_value("status", &r.status))?;
        Ok(RunLog {
            id: r.id,
            config_id: r.config_id,
            tenant_id: r.tenant_id,
            started_at: parse_datetime(&r.started_at),
            completed_at: parse_datetime_opt(r.completed_at),
            status,
            prospects_found: r.prospects_found,
            duplicates_skipped: r.duplicates_skipped,
            proposals_created: r.proposals_created,
            executed_query: r.executed_query,
            executed_prompt: r.executed_prompt,
            prompt_chars: r.prompt_chars,
            compiled: r.compiled,
            query_updated: r.query_updated,
            prompt_updated: r.prompt_updated,
            error_message: r.error_message,
        })
    }
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = proposals)]
pub struct ProposalRecord {
    pub id: String,
    pub tenant_id: String,
    pub proposed_by: String,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub operation: String,
    pub payload: String,
    pub status: String,
    pub validation_errors: String,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub executed_at: Option<String>,
    pub error_message: Option<String>,
    pub source: String,
    pub automation_config_id: Option<String>,
    pub dedup_url: Option<String>,
    pub dedup_title: Option<String>,
    pub dedup_company: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<ProposalRecord> for Proposal {
    type Error = DieselError;

    fn try_from(r: ProposalRecord) -> Result<Self, Self::Error> {
        let status =
            ProposalStatus::from_str(&r.status).ok_or_else(|| bad_value("status", &r.status))?;
        let operation = ProposalOperation::from_str(&r.operation)
            .ok_or_else(|| bad_value("operation", &r.operation))?;
        let source =
            ProposalSource::from_str(&r.source).ok_or_else(|| bad_value("source", &r.source))?;

        Ok(Proposal {
            payload: serde_json::from_str(&r.payload).map_err(json_error)?,
            validation_errors: serde_json::from_str(&r.validation_errors).map_err(json_error)?,
            status,
            operation,
            source,
            id: r.id,
            tenant_id: r.tenant_id,
            proposed_by: r.proposed_by,
            entity_type: r.entity_type,
            entity_id: r.entity_id,
            reviewed_by: r.reviewed_by,
            reviewed_at: parse_datetime_opt(r.reviewed_at),
            executed_at: parse_datetime_opt(r.executed_at),
            error_message: r.error_message,
            automation_config_id: r.automation_config_id,
            dedup: DedupKeys {
                url: r.dedup_url,
                title: r.dedup_title,
                company: r.dedup_company,
            },
            created_at: parse_datetime(&r.created_at),
            updated_at: parse_datetime(&r.updated_at),
        })
    }
}

impl TryFrom<&Proposal> for ProposalRecord {
    type Error = DieselError;

    fn try_from(p: &Proposal) -> Result<Self, Self::Error> {
        Ok(Self {
            id: p.id.clone(),
            tenant_id: p.tenant_id.clone(),
            proposed_by: p.proposed_by.clone(),
            entity_type: p.entity_type.clone(),
            entity_id: p.entity_id,
            operation: p.operation.as_str().to_string(),
            payload: to_json(&p.payload)?,
            status: p.status.as_str().to_string(),
            validation_errors: to_json(&p.validation_errors)?,
            reviewed_by: p.reviewed_by.clone(),
            reviewed_at: format_timestamp_opt(p.reviewed_at),
            executed_at: format_timestamp_opt(p.executed_at),
            error_message: p.error_message.clone(),
            source: p.source.as_str().to_string(),
            automation_config_id: p.automation_config_id.clone(),
            dedup_url: p.dedup.url.clone(),
            dedup_title: p.dedup.title.clone(),
            dedup_company: p.dedup.company.clone(),
            created_at: format_timestamp(p.created_at),
            updated_at: format_timestamp(p.updated_at),
        })
    }
}
