use cetane::prelude::*;

const SQLITE_CONFIGS: &str = r#"CREATE TABLE automation_configs (
    id TEXT PRIMARY KEY NOT NULL,
    tenant_id TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    name TEXT NOT NULL,
    entity_type TEXT NOT NULL DEFAULT 'lead',
    enabled BOOLEAN NOT NULL DEFAULT 1,
    interval_secs INTEGER NOT NULL DEFAULT 3600,
    last_run_at TEXT,
    next_run_at TEXT,
    run_count INTEGER NOT NULL DEFAULT 0,
    consecutive_zero_runs INTEGER NOT NULL DEFAULT 0,
    empty_run_limit INTEGER NOT NULL DEFAULT 0,
    system_prompt TEXT NOT NULL DEFAULT '',
    search_query TEXT NOT NULL DEFAULT '',
    search_filters TEXT NOT NULL DEFAULT '{}',
    suggested_prompt TEXT,
    suggested_query TEXT,
    suggestion_reason TEXT,
    use_suggested_prompt BOOLEAN NOT NULL DEFAULT 0,
    use_suggested_query BOOLEAN NOT NULL DEFAULT 0,
    auto_accept_suggestions BOOLEAN NOT NULL DEFAULT 0,
    suggestion_threshold INTEGER NOT NULL DEFAULT 1,
    suggestion_generated_at TEXT,
    suggestion_accepted_at TEXT,
    prompt_cooldown_runs INTEGER NOT NULL DEFAULT 3,
    prompt_cooldown_prospects INTEGER NOT NULL DEFAULT 10,
    analysis_model TEXT,
    target_ids TEXT NOT NULL DEFAULT '[]',
    source_document_ids TEXT NOT NULL DEFAULT '[]',
    compilation_target INTEGER NOT NULL DEFAULT 0,
    compiled_at TEXT,
    disable_on_compiled BOOLEAN NOT NULL DEFAULT 0,
    digest_enabled BOOLEAN NOT NULL DEFAULT 0,
    digest_recipients TEXT NOT NULL DEFAULT '',
    digest_time TEXT NOT NULL DEFAULT '08:00',
    digest_utc_offset_minutes INTEGER NOT NULL DEFAULT 0,
    digest_model TEXT,
    last_digest_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#;

const POSTGRES_CONFIGS: &str = r#"CREATE TABLE IF NOT EXISTS automation_configs (
    id TEXT PRIMARY KEY NOT NULL,
    tenant_id TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    name TEXT NOT NULL,
    entity_type TEXT NOT NULL DEFAULT 'lead',
    enabled BOOLEAN NOT NULL DEFAULT TRUE,
    interval_secs BIGINT NOT NULL DEFAULT 3600,
    last_run_at TEXT,
    next_run_at TEXT,
    run_count BIGINT NOT NULL DEFAULT 0,
    consecutive_zero_runs INTEGER NOT NULL DEFAULT 0,
    empty_run_limit INTEGER NOT NULL DEFAULT 0,
    system_prompt TEXT NOT NULL DEFAULT '',
    search_query TEXT NOT NULL DEFAULT '',
    search_filters TEXT NOT NULL DEFAULT '{}',
    suggested_prompt TEXT,
    suggested_query TEXT,
    suggestion_reason TEXT,
    use_suggested_prompt BOOLEAN NOT NULL DEFAULT FALSE,
    use_suggested_query BOOLEAN NOT NULL DEFAULT FALSE,
    auto_accept_suggestions BOOLEAN NOT NULL DEFAULT FALSE,
    suggestion_threshold INTEGER NOT NULL DEFAULT 1,
    suggestion_generated_at TEXT,
    suggestion_accepted_at TEXT,
    prompt_cooldown_runs INTEGER NOT NULL DEFAULT 3,
    prompt_cooldown_prospects INTEGER NOT NULL DEFAULT 10,
    analysis_model TEXT,
    target_ids TEXT NOT NULL DEFAULT '[]',
    source_document_ids TEXT NOT NULL DEFAULT '[]',
    compilation_target INTEGER NOT NULL DEFAULT 0,
    compiled_at TEXT,
    disable_on_compiled BOOLEAN NOT NULL DEFAULT FALSE,
    digest_enabled BOOLEAN NOT NULL DEFAULT FALSE,
    digest_recipients TEXT NOT NULL DEFAULT '',
    digest_time TEXT NOT NULL DEFAULT '08:00',
    digest_utc_offset_minutes INTEGER NOT NULL DEFAULT 0,
    digest_model TEXT,
    last_digest_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#;

const RUN_LOGS: &str = r#"CREATE TABLE run_logs (
    id TEXT PRIMARY KEY NOT NULL,
    config_id TEXT NOT NULL REFERENCES automation_configs(id) ON DELETE CASCADE,
    tenant_id TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL DEFAULT 'running',
    prospects_found INTEGER NOT NULL DEFAULT 0,
    duplicates_skipped INTEGER NOT NULL DEFAULT 0,
    proposals_created INTEGER NOT NULL DEFAULT 0,
    executed_query TEXT NOT NULL DEFAULT '',
    executed_prompt TEXT NOT NULL DEFAULT '',
    prompt_chars INTEGER NOT NULL DEFAULT 0,
    compiled BOOLEAN NOT NULL DEFAULT FALSE,
    query_updated BOOLEAN NOT NULL DEFAULT FALSE,
    prompt_updated BOOLEAN NOT NULL DEFAULT FALSE,
    error_message TEXT
)"#;

const PROPOSALS: &str = r#"CREATE TABLE proposals (
    id TEXT PRIMARY KEY NOT NULL,
    tenant_id TEXT NOT NULL,
    proposed_by TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id BIGINT,
    operation TEXT NOT NULL,
    payload TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'pending',
    validation_errors TEXT NOT NULL DEFAULT '[]',
    reviewed_by TEXT,
    reviewed_at TEXT,
    executed_at TEXT,
    error_message TEXT,
    source TEXT NOT NULL DEFAULT 'manual',
    automation_config_id TEXT REFERENCES automation_configs(id) ON DELETE SET NULL,
    dedup_url TEXT,
    dedup_title TEXT,
    dedup_company TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#;

pub fn migration() -> Migration {
    Migration::new("0001_initial_schema")
        .operation(
            RunSql::portable()
                .for_backend("sqlite", SQLITE_CONFIGS)
                .for_backend("postgres", POSTGRES_CONFIGS),
        )
        .operation(
            RunSql::portable()
                .for_backend("sqlite", RUN_LOGS)
                .for_backend("postgres", RUN_LOGS),
        )
        .operation(
            RunSql::portable()
                .for_backend("sqlite", PROPOSALS)
                .for_backend("postgres", PROPOSALS),
        )
}
