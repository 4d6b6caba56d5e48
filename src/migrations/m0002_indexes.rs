use cetane::prelude::*;

fn index(sql: &'static str) -> RunSql {
    RunSql::portable()
        .for_backend("sqlite", sql)
        .for_backend("postgres", sql)
}

pub fn migration() -> Migration {
    Migration::new("0002_indexes")
        .depends_on(&["0001_initial_schema"])
        .operation(index(
            "CREATE INDEX idx_automation_configs_due ON automation_configs(enabled, next_run_at)",
        ))
        .operation(index(
            "CREATE INDEX idx_automation_configs_tenant ON automation_configs(tenant_id)",
        ))
        .operation(index(
            "CREATE INDEX idx_run_logs_config_started ON run_logs(config_id, started_at)",
        ))
        .operation(index("CREATE INDEX idx_run_logs_status ON run_logs(status)"))
        .operation(index(
            "CREATE UNIQUE INDEX idx_run_logs_one_running ON run_logs(config_id) WHERE status = 'running'",
        ))
        .operation(index(
            "CREATE INDEX idx_proposals_tenant_status ON proposals(tenant_id, status)",
        ))
        .operation(index(
            "CREATE INDEX idx_proposals_config_status ON proposals(automation_config_id, status)",
        ))
        .operation(index(
            "CREATE INDEX idx_proposals_dedup_url ON proposals(tenant_id, dedup_url)",
        ))
}
