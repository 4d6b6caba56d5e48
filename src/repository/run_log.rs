//! Run ledger repository.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel::sql_types::{Integer, Text};
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use super::models::RunLogRecord;
use super::pool::{DbPool, DieselError};
use super::format_timestamp;
use crate::models::{AutomationConfig, RunCounts, RunFlags, RunLog, RunStatus};
use crate::schema::run_logs;
use crate::{with_conn, with_conn_split};

const START_RUN_SQLITE: &str = "INSERT INTO run_logs \
    (id, config_id, tenant_id, started_at, status, executed_query, executed_prompt, prompt_chars) \
    SELECT ?, ?, ?, ?, 'running', ?, ?, ? \
    WHERE NOT EXISTS (SELECT 1 FROM run_logs WHERE config_id = ? AND status = 'running')";

#[cfg_attr(not(feature = "postgres"), allow(dead_code))]
const START_RUN_POSTGRES: &str = "INSERT INTO run_logs \
    (id, config_id, tenant_id, started_at, status, executed_query, executed_prompt, prompt_chars) \
    SELECT $1, $2, $3, $4, 'running', $5, $6, $7 \
    WHERE NOT EXISTS (SELECT 1 FROM run_logs WHERE config_id = $8 AND status = 'running')";

#[derive(Clone)]
pub struct RunLogRepository {
    pool: DbPool,
}

impl RunLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Open a `running` row for the config unless one is already open.
    ///
    /// Records the query and prompt the run will actually use. Returns
    /// `None` when another run holds the slot.
    pub async fn start_run(
        &self,
        config: &AutomationConfig,
        now: DateTime<Utc>,
    ) -> Result<Option<RunLog>, DieselError> {
        let id = Uuid::new_v4().to_string();
        let started_at = format_timestamp(now);
        let query = config.active_query().to_string();
        let prompt = config.active_prompt().to_string();
        let prompt_chars = i32::try_from(prompt.chars().count()).unwrap_or(i32::MAX);

        let inserted: Result<usize, DieselError> = with_conn_split!(self.pool,
            sqlite: conn => {
                diesel::sql_query(START_RUN_SQLITE)
                    .bind::<Text, _>(&id)
                    .bind::<Text, _>(&config.id)
                    .bind::<Text, _>(&config.tenant_id)
                    .bind::<Text, _>(&started_at)
                    .bind::<Text, _>(&query)
                    .bind::<Text, _>(&prompt)
                    .bind::<Integer, _>(prompt_chars)
                    .bind::<Text, _>(&config.id)
                    .execute(&mut conn)
                    .await
            },
            postgres: conn => {
                diesel::sql_query(START_RUN_POSTGRES)
                    .bind::<Text, _>(&id)
                    .bind::<Text, _>(&config.id)
                    .bind::<Text, _>(&config.tenant_id)
                    .bind::<Text, _>(&started_at)
                    .bind::<Text, _>(&query)
                    .bind::<Text, _>(&prompt)
                    .bind::<Integer, _>(prompt_chars)
                    .bind::<Text, _>(&config.id)
                    .execute(&mut conn)
                    .await
            }
        );

        match inserted {
            Ok(0) => Ok(None),
            Ok(_) => self.get(&id).await,
            // Lost a race against a concurrent start on the partial unique index.
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<RunLog>, DieselError> {
        let record: Option<RunLogRecord> = with_conn!(self.pool, conn, {
            run_logs::table
                .find(id)
                .first::<RunLogRecord>(&mut conn)
                .await
                .optional()?
        });
        record.map(RunLog::try_from).transpose()
    }

    /// Close a run as done with its counts.
    pub async fn finish_run(
        &self,
        id: &str,
        counts: RunCounts,
        at: DateTime<Utc>,
    ) -> Result<(), DieselError> {
        let at = format_timestamp(at);
        with_conn!(self.pool, conn, {
            diesel::update(
                run_logs::table
                    .find(id)
                    .filter(run_logs::status.eq(RunStatus::Running.as_str())),
            )
            .set((
                run_logs::status.eq(RunStatus::Done.as_str()),
                run_logs::completed_at.eq(Some(&at)),
                run_logs::prospects_found.eq(counts.prospects_found),
                run_logs::duplicates_skipped.eq(counts.duplicates_skipped),
                run_logs::proposals_created.eq(counts.proposals_created),
            ))
            .execute(&mut conn)
            .await?;
            Ok(())
        })
    }

    /// Close a run as failed with a readable message.
    pub async fn fail_run(&self, id: &str, message: &str, at: DateTime<Utc>) -> Result<(), DieselError> {
        let at = format_timestamp(at);
        with_conn!(self.pool, conn, {
            diesel::update(
                run_logs::table
                    .find(id)
                    .filter(run_logs::status.eq(RunStatus::Running.as_str())),
            )
            .set((
                run_logs::status.eq(RunStatus::Failed.as_str()),
                run_logs::completed_at.eq(Some(&at)),
                run_logs::error_message.eq(Some(message)),
            ))
            .execute(&mut conn)
            .await?;
            Ok(())
        })
    }

    pub async fn set_flags(&self, id: &str, flags: RunFlags) -> Result<(), DieselError> {
        with_conn!(self.pool, conn, {
            diesel::update(run_logs::table.find(id))
                .set((
                    run_logs::compiled.eq(flags.compiled),
                    run_logs::query_updated.eq(flags.query_updated),
                    run_logs::prompt_updated.eq(flags.prompt_updated),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Page through runs, newest first.
    pub async fn list(
        &self,
        config_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RunLog>, DieselError> {
        let records: Vec<RunLogRecord> = with_conn!(self.pool, conn, {
            let mut query = run_logs::table
                .order(run_logs::started_at.desc())
                .limit(limit)
                .offset(offset)
                .into_boxed();
            if let Some(config_id) = config_id {
                query = query.filter(run_logs::config_id.eq(config_id));
            }
            query.load::<RunLogRecord>(&mut conn).await?
        });
        records.into_iter().map(RunLog::try_from).collect()
    }

    pub async fn count(&self, config_id: Option<&str>) -> Result<i64, DieselError> {
        use diesel::dsl::count_star;
        with_conn!(self.pool, conn, {
            let mut query = run_logs::table.select(count_star()).into_boxed();
            if let Some(config_id) = config_id {
                query = query.filter(run_logs::config_id.eq(config_id));
            }
            query.first::<i64>(&mut conn).await
        })
    }

    /// The most recent `limit` completed runs for a config, newest first.
    pub async fn recent_done(&self, config_id: &str, limit: i64) -> Result<Vec<RunLog>, DieselError> {
        let records: Vec<RunLogRecord> = with_conn!(self.pool, conn, {
            run_logs::table
                .filter(run_logs::config_id.eq(config_id))
                .filter(run_logs::status.eq(RunStatus::Done.as_str()))
                .order(run_logs::started_at.desc())
                .limit(limit)
                .load::<RunLogRecord>(&mut conn)
                .await?
        });
        records.into_iter().map(RunLog::try_from).collect()
    }

    pub async fn running_for(&self, config_id: &str) -> Result<Option<RunLog>, DieselError> {
        let record: Option<RunLogRecord> = with_conn!(self.pool, conn, {
            run_logs::table
                .filter(run_logs::config_id.eq(config_id))
                .filter(run_logs::status.eq(RunStatus::Running.as_str()))
                .first::<RunLogRecord>(&mut conn)
                .await
                .optional()?
        });
        record.map(RunLog::try_from).transpose()
    }

    /// Mark every `running` row as failed. Returns how many rows changed.
    pub async fn fail_all_running(&self, message: &str, at: DateTime<Utc>) -> Result<usize, DieselError> {
        let at = format_timestamp(at);
        with_conn!(self.pool, conn, {
            diesel::update(run_logs::table.filter(run_logs::status.eq(RunStatus::Running.as_str())))
                .set((
                    run_logs::status.eq(RunStatus::Failed.as_str()),
                    run_logs::completed_at.eq(Some(&at)),
                    run_logs::error_message.eq(Some(message)),
                ))
                .execute(&mut conn)
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::setup_test_db;
    use chrono::{Duration, TimeZone};

    #[tokio::test]
    async fn test_only_one_running_row_per_config() {
        let (ctx, _dir) = setup_test_db().await;
        let mut config = AutomationConfig::new("t1", "u1", "c", "base query");
        config.suggested_query = Some("suggested".to_string());
        config.use_suggested_query = true;
        config.system_prompt = "find fintech".to_string();
        ctx.automations().create(&config).await.unwrap();
        let repo = ctx.run_logs();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let run = repo.start_run(&config, now).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.executed_query, "suggested");
        assert_eq!(run.prompt_chars, 12);

        assert!(repo.start_run(&config, now).await.unwrap().is_none());

        repo.finish_run(&run.id, RunCounts::default(), now).await.unwrap();
        assert!(repo.start_run(&config, now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_finish_and_history_order() {
        let (ctx, _dir) = setup_test_db().await;
        let config = AutomationConfig::new("t1", "u1", "c", "q");
        ctx.automations().create(&config).await.unwrap();
        let repo = ctx.run_logs();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        for i in 0..3 {
            let at = base + Duration::hours(i);
            let run = repo.start_run(&config, at).await.unwrap().unwrap();
            let counts = RunCounts {
                prospects_found: 5,
                duplicates_skipped: 1,
                proposals_created: i as i32,
            };
            repo.finish_run(&run.id, counts, at + Duration::minutes(1))
                .await
                .unwrap();
        }
        let failed = repo.start_run(&config, base + Duration::hours(5)).await.unwrap().unwrap();
        repo.fail_run(&failed.id, "search timed out", base).await.unwrap();

        let recent = repo.recent_done(&config.id, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].proposals_created, 2);
        assert_eq!(recent[1].proposals_created, 1);

        assert_eq!(repo.count(Some(&config.id)).await.unwrap(), 4);
        let page = repo.list(Some(&config.id), 2, 0).await.unwrap();
        assert_eq!(page[0].status, RunStatus::Failed);
        assert_eq!(page[0].error_message.as_deref(), Some("search timed out"));
        assert_eq!(repo.list(None, 10, 3).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_all_running() {
        let (ctx, _dir) = setup_test_db().await;
        let config = AutomationConfig::new("t1", "u1", "c", "q");
        ctx.automations().create(&config).await.unwrap();
        let repo = ctx.run_logs();

        let run = repo.start_run(&config, Utc::now()).await.unwrap().unwrap();
        assert_eq!(repo.fail_all_running("server restarted", Utc::now()).await.unwrap(), 1);
        assert_eq!(repo.fail_all_running("server restarted", Utc::now()).await.unwrap(), 0);

        let run = repo.get(&run.id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.completed_at.is_some());
        assert!(repo.running_for(&config.id).await.unwrap().is_none());
    }
}
