//! Automation config repository, including the due-config claim.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl, SimpleAsyncConnection};
use tracing::warn;

use super::models::{AutomationConfigRecord, AutomationSettingsChangeset};
use super::pool::{DbPool, DieselError};
use super::{format_timestamp, format_timestamp_opt};
use crate::models::{AutomationConfig, MAX_INTERVAL_SECS};
use crate::schema::{automation_configs, proposals, run_logs};
use crate::{with_conn, with_conn_split};

/// A new suggestion produced by the adaptive controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuggestionUpdate {
    pub query: Option<String>,
    pub prompt: Option<String>,
    pub reason: String,
}

/// When a config claimed at `now` runs next. Intervals beyond the supported
/// range are clamped; a config whose next run is not representable is left
/// unclaimed.
fn next_run_after(now: DateTime<Utc>, record: &AutomationConfigRecord) -> Option<DateTime<Utc>> {
    let secs = record.interval_secs.clamp(1, MAX_INTERVAL_SECS);
    if secs != record.interval_secs {
        warn!(
            config_id = %record.id,
            interval_secs = record.interval_secs,
            "Interval out of range, clamped to {}s",
            secs
        );
    }
    let next = Duration::try_seconds(secs).and_then(|d| now.checked_add_signed(d));
    if next.is_none() {
        warn!(config_id = %record.id, "Next run time overflows, skipping claim");
    }
    next
}

#[derive(Clone)]
pub struct AutomationConfigRepository {
    pool: DbPool,
}

impl AutomationConfigRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, config: &AutomationConfig) -> Result<(), DieselError> {
        let record = AutomationConfigRecord::try_from(config)?;
        with_conn!(self.pool, conn, {
            diesel::insert_into(automation_configs::table)
                .values(&record)
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    pub async fn get(&self, id: &str) -> Result<Option<AutomationConfig>, DieselError> {
        let record: Option<AutomationConfigRecord> = with_conn!(self.pool, conn, {
            automation_configs::table
                .find(id)
                .first::<AutomationConfigRecord>(&mut conn)
                .await
                .optional()?
        });
        record.map(AutomationConfig::try_from).transpose()
    }

    /// List configs, optionally for one tenant, oldest first.
    pub async fn list(&self, tenant_id: Option<&str>) -> Result<Vec<AutomationConfig>, DieselError> {
        let records: Vec<AutomationConfigRecord> = with_conn!(self.pool, conn, {
            let mut query = automation_configs::table
                .order(automation_configs::created_at.asc())
                .into_boxed();
            if let Some(tenant) = tenant_id {
                query = query.filter(automation_configs::tenant_id.eq(tenant));
            }
            query.load::<AutomationConfigRecord>(&mut conn).await?
        });
        records.into_iter().map(AutomationConfig::try_from).collect()
    }

    /// Persist user-editable settings. Schedule and controller state are untouched.
    pub async fn update_settings(&self, config: &AutomationConfig) -> Result<bool, DieselError> {
        let mut record = AutomationConfigRecord::try_from(config)?;
        record.updated_at = format_timestamp(Utc::now());
        let changes = AutomationSettingsChangeset::from(record);
        let rows = with_conn!(self.pool, conn, {
            diesel::update(automation_configs::table.find(&config.id))
                .set(&changes)
                .execute(&mut conn)
                .await?
        });
        Ok(rows > 0)
    }

    /// Delete a config and its run history. Proposals keep their rows but
    /// lose the provenance link.
    pub async fn delete(&self, id: &str) -> Result<bool, DieselError> {
        let id = id.to_string();
        with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                let id = id.clone();
                Box::pin(async move {
                    diesel::delete(run_logs::table.filter(run_logs::config_id.eq(&id)))
                        .execute(conn)
                        .await?;
                    diesel::update(
                        proposals::table.filter(proposals::automation_config_id.eq(&id)),
                    )
                    .set(proposals::automation_config_id.eq(None::<String>))
                    .execute(conn)
                    .await?;
                    let rows = diesel::delete(automation_configs::table.find(&id))
                        .execute(conn)
                        .await?;
                    Ok(rows > 0)
                })
            })
            .await
        })
    }

    /// Turn a config on or off. Enabling also clears its empty-run streak.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<bool, DieselError> {
        let now = format_timestamp(Utc::now());
        let rows = with_conn!(self.pool, conn, {
            let target = automation_configs::table.find(id);
            if enabled {
                diesel::update(target)
                    .set((
                        automation_configs::enabled.eq(true),
                        automation_configs::consecutive_zero_runs.eq(0),
                        automation_configs::updated_at.eq(&now),
                    ))
                    .execute(&mut conn)
                    .await?
            } else {
                diesel::update(target)
                    .set((
                        automation_configs::enabled.eq(false),
                        automation_configs::updated_at.eq(&now),
                    ))
                    .execute(&mut conn)
                    .await?
            }
        });
        Ok(rows > 0)
    }

    /// Explicitly move the next run. `None` makes the config due immediately.
    pub async fn reschedule(
        &self,
        id: &str,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DieselError> {
        let next = format_timestamp_opt(next_run_at);
        let now = format_timestamp(Utc::now());
        let rows = with_conn!(self.pool, conn, {
            diesel::update(automation_configs::table.find(id))
                .set((
                    automation_configs::next_run_at.eq(next),
                    automation_configs::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await?
        });
        Ok(rows > 0)
    }

    /// Select due configs and advance each one's `next_run_at` to
    /// `now + interval` in the same step.
    ///
    /// Safe under concurrent callers: each due config is returned to exactly
    /// one of them. PostgreSQL locks candidate rows with `FOR UPDATE SKIP
    /// LOCKED`. SQLite has no row locks: the claim holds the write lock for
    /// its whole select-and-advance, and each advance is still a
    /// compare-and-swap on the `next_run_at` value that was read. Either way a
    /// failed claim advances nothing.
    ///
    /// Returns the configs as they were before the claim.
    pub async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<AutomationConfig>, DieselError> {
        let now_str = format_timestamp(now);

        let claimed: Vec<AutomationConfigRecord> = with_conn_split!(self.pool,
            sqlite: conn => {
                // The write lock is taken up front, so every advance of this
                // claim commits or rolls back together.
                conn.batch_execute("BEGIN IMMEDIATE").await?;
                let result: Result<Vec<AutomationConfigRecord>, DieselError> = async {
                    let candidates: Vec<AutomationConfigRecord> = automation_configs::table
                        .filter(automation_configs::enabled.eq(true))
                        .filter(
                            automation_configs::next_run_at
                                .is_null()
                                .or(automation_configs::next_run_at.le(&now_str)),
                        )
                        .order(automation_configs::next_run_at.asc())
                        .limit(limit)
                        .load(&mut conn)
                        .await?;

                    let mut claimed = Vec::with_capacity(candidates.len());
                    for record in candidates {
                        let Some(next) = next_run_after(now, &record) else {
                            continue;
                        };
                        let next = format_timestamp(next);
                        let claim = (
                            automation_configs::next_run_at.eq(&next),
                            automation_configs::updated_at.eq(&now_str),
                        );
                        let target = automation_configs::table
                            .filter(automation_configs::id.eq(&record.id))
                            .filter(automation_configs::enabled.eq(true));
                        let rows = match &record.next_run_at {
                            Some(seen) => {
                                diesel::update(target.filter(automation_configs::next_run_at.eq(seen)))
                                    .set(claim)
                                    .execute(&mut conn)
                                    .await?
                            }
                            None => {
                                diesel::update(target.filter(automation_configs::next_run_at.is_null()))
                                    .set(claim)
                                    .execute(&mut conn)
                                    .await?
                            }
                        };

                        if rows == 1 {
                            claimed.push(record);
                        }
                    }
                    Ok(claimed)
                }
                .await;

                match result {
                    Ok(claimed) => {
                        conn.batch_execute("COMMIT").await?;
                        claimed
                    }
                    Err(e) => {
                        let _ = conn.batch_execute("ROLLBACK").await;
                        return Err(e);
                    }
                }
            },
            postgres: conn => {
                let now_str = now_str.clone();
                conn.transaction(|conn| {
                    Box::pin(async move {
                        let candidates: Vec<AutomationConfigRecord> = automation_configs::table
                            .filter(automation_configs::enabled.eq(true))
                            .filter(
                                automation_configs::next_run_at
                                    .is_null()
                                    .or(automation_configs::next_run_at.le(&now_str)),
                            )
                            .order(automation_configs::next_run_at.asc())
                            .limit(limit)
                            .for_update()
                            .skip_locked()
                            .load(conn)
                            .await?;

                        let mut claimed = Vec::with_capacity(candidates.len());
                        for record in candidates {
                            let Some(next) = next_run_after(now, &record) else {
                                continue;
                            };
                            let next = format_timestamp(next);
                            diesel::update(automation_configs::table.find(&record.id))
                                .set((
                                    automation_configs::next_run_at.eq(&next),
                                    automation_configs::updated_at.eq(&now_str),
                                ))
                                .execute(conn)
                                .await?;
                            claimed.push(record);
                        }
                        Ok::<_, DieselError>(claimed)
                    })
                })
                .await?
            }
        );

        claimed.into_iter().map(AutomationConfig::try_from).collect()
    }

    /// Count a finished attempt.
    pub async fn record_run(&self, id: &str, at: DateTime<Utc>) -> Result<(), DieselError> {
        let at = format_timestamp(at);
        with_conn!(self.pool, conn, {
            diesel::update(automation_configs::table.find(id))
                .set((
                    automation_configs::last_run_at.eq(Some(&at)),
                    automation_configs::run_count.eq(automation_configs::run_count + 1_i64),
                    automation_configs::updated_at.eq(&at),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    pub async fn set_consecutive_zero_runs(&self, id: &str, count: i32) -> Result<(), DieselError> {
        with_conn!(self.pool, conn, {
            diesel::update(automation_configs::table.find(id))
                .set(automation_configs::consecutive_zero_runs.eq(count))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Record a new suggestion awaiting acceptance.
    pub async fn store_suggestion(
        &self,
        id: &str,
        suggestion: &SuggestionUpdate,
        at: DateTime<Utc>,
    ) -> Result<(), DieselError> {
        let at = format_timestamp(at);
        with_conn!(self.pool, conn, {
            diesel::update(automation_configs::table.find(id))
                .set((
                    automation_configs::suggested_query.eq(suggestion.query.as_deref()),
                    automation_configs::suggested_prompt.eq(suggestion.prompt.as_deref()),
                    automation_configs::suggestion_reason.eq(Some(suggestion.reason.as_str())),
                    automation_configs::suggestion_generated_at.eq(Some(&at)),
                    automation_configs::updated_at.eq(&at),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Adopt the pending suggestion as the active query/prompt.
    ///
    /// Returns false when there was nothing to accept.
    pub async fn accept_suggestion(&self, id: &str, at: DateTime<Utc>) -> Result<bool, DieselError> {
        let id = id.to_string();
        let at = format_timestamp(at);
        with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                let (id, at) = (id.clone(), at.clone());
                Box::pin(async move {
                    let record: Option<AutomationConfigRecord> = automation_configs::table
                        .find(&id)
                        .first(conn)
                        .await
                        .optional()?;
                    let Some(record) = record else {
                        return Ok(false);
                    };
                    if record.suggested_query.is_none() && record.suggested_prompt.is_none() {
                        return Ok(false);
                    }

                    diesel::update(automation_configs::table.find(&id))
                        .set((
                            automation_configs::search_query
                                .eq(record.suggested_query.unwrap_or(record.search_query)),
                            automation_configs::system_prompt
                                .eq(record.suggested_prompt.unwrap_or(record.system_prompt)),
                            automation_configs::suggested_query.eq(None::<String>),
                            automation_configs::suggested_prompt.eq(None::<String>),
                            automation_configs::suggestion_reason.eq(None::<String>),
                            automation_configs::use_suggested_query.eq(false),
                            automation_configs::use_suggested_prompt.eq(false),
                            automation_configs::suggestion_accepted_at.eq(Some(&at)),
                            automation_configs::updated_at.eq(&at),
                        ))
                        .execute(conn)
                        .await?;
                    Ok(true)
                })
            })
            .await
        })
    }

    /// Discard the pending suggestion without adopting it.
    pub async fn reject_suggestion(&self, id: &str) -> Result<bool, DieselError> {
        let now = format_timestamp(Utc::now());
        let rows = with_conn!(self.pool, conn, {
            diesel::update(
                automation_configs::table.find(id).filter(
                    automation_configs::suggested_query
                        .is_not_null()
                        .or(automation_configs::suggested_prompt.is_not_null()),
                ),
            )
            .set((
                automation_configs::suggested_query.eq(None::<String>),
                automation_configs::suggested_prompt.eq(None::<String>),
                automation_configs::suggestion_reason.eq(None::<String>),
                automation_configs::use_suggested_query.eq(false),
                automation_configs::use_suggested_prompt.eq(false),
                automation_configs::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?
        });
        Ok(rows > 0)
    }

    /// Set or clear the compiled marker, optionally pausing the config.
    pub async fn set_compiled(
        &self,
        id: &str,
        compiled_at: Option<DateTime<Utc>>,
        disable: bool,
    ) -> Result<(), DieselError> {
        let compiled = format_timestamp_opt(compiled_at);
        let now = format_timestamp(Utc::now());
        with_conn!(self.pool, conn, {
            if disable {
                diesel::update(automation_configs::table.find(id))
                    .set((
                        automation_configs::compiled_at.eq(compiled),
                        automation_configs::enabled.eq(false),
                        automation_configs::updated_at.eq(&now),
                    ))
                    .execute(&mut conn)
                    .await?;
            } else {
                diesel::update(automation_configs::table.find(id))
                    .set((
                        automation_configs::compiled_at.eq(compiled),
                        automation_configs::updated_at.eq(&now),
                    ))
                    .execute(&mut conn)
                    .await?;
            }
            Ok(())
        })
    }

    /// Configs with digests turned on.
    pub async fn list_digest_enabled(&self) -> Result<Vec<AutomationConfig>, DieselError> {
        let records: Vec<AutomationConfigRecord> = with_conn!(self.pool, conn, {
            automation_configs::table
                .filter(automation_configs::digest_enabled.eq(true))
                .load::<AutomationConfigRecord>(&mut conn)
                .await?
        });
        records.into_iter().map(AutomationConfig::try_from).collect()
    }

    pub async fn mark_digested(&self, id: &str, at: DateTime<Utc>) -> Result<(), DieselError> {
        let at = format_timestamp(at);
        with_conn!(self.pool, conn, {
            diesel::update(automation_configs::table.find(id))
                .set(automation_configs::last_digest_at.eq(Some(&at)))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }
}
