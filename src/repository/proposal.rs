//! Proposal store.
//!
//! Every status change is a conditional update on the expected current
//! status, so two reviewers racing on the same proposal cannot both win.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::ProposalRecord;
use super::pool::{DbPool, DieselError};
use super::format_timestamp;
use crate::models::{DedupKeys, Proposal, ProposalSource, ProposalStatus};
use crate::schema::proposals;
use crate::{with_conn, with_conn_split};

/// Listing filter. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ProposalFilter {
    pub tenant_id: Option<String>,
    pub status: Option<ProposalStatus>,
    pub automation_config_id: Option<String>,
}

#[derive(Clone)]
pub struct ProposalRepository {
    pool: DbPool,
}

impl ProposalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, proposal: &Proposal) -> Result<(), DieselError> {
        self.create_many(std::slice::from_ref(proposal)).await
    }

    pub async fn create_many(&self, batch: &[Proposal]) -> Result<(), DieselError> {
        if batch.is_empty() {
            return Ok(());
        }
        let records = batch
            .iter()
            .map(ProposalRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        with_conn!(self.pool, conn, {
            for record in &records {
                diesel::insert_into(proposals::table)
                    .values(record)
                    .execute(&mut conn)
                    .await?;
            }
            Ok(())
        })
    }

    /// Insert leads, skipping any that collide with an open (pending or
    /// rejected) proposal of the tenant. Returns how many were stored.
    ///
    /// The open-lead unique indexes make this safe against concurrent runs
    /// that loaded the same dedup snapshot.
    pub async fn create_unless_open(&self, batch: &[Proposal]) -> Result<usize, DieselError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let records = batch
            .iter()
            .map(ProposalRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        with_conn_split!(self.pool,
            sqlite: conn => {
                let mut stored = 0;
                for record in &records {
                    stored += diesel::insert_or_ignore_into(proposals::table)
                        .values(record)
                        .execute(&mut conn)
                        .await?;
                }
                Ok::<_, DieselError>(stored)
            },
            postgres: conn => {
                let mut stored = 0;
                for record in &records {
                    stored += diesel::insert_into(proposals::table)
                        .values(record)
                        .on_conflict_do_nothing()
                        .execute(&mut conn)
                        .await?;
                }
                Ok::<_, DieselError>(stored)
            }
        )
    }

    pub async fn get(&self, id: &str) -> Result<Option<Proposal>, DieselError> {
        let record: Option<ProposalRecord> = with_conn!(self.pool, conn, {
            proposals::table
                .find(id)
                .first::<ProposalRecord>(&mut conn)
                .await
                .optional()?
        });
        record.map(Proposal::try_from).transpose()
    }

    /// Page through proposals, newest first.
    pub async fn list(
        &self,
        filter: &ProposalFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Proposal>, DieselError> {
        let records: Vec<ProposalRecord> = with_conn!(self.pool, conn, {
            let mut query = proposals::table
                .order(proposals::created_at.desc())
                .limit(limit)
                .offset(offset)
                .into_boxed();
            if let Some(tenant) = &filter.tenant_id {
                query = query.filter(proposals::tenant_id.eq(tenant));
            }
            if let Some(status) = filter.status {
                query = query.filter(proposals::status.eq(status.as_str()));
            }
            if let Some(config_id) = &filter.automation_config_id {
                query = query.filter(proposals::automation_config_id.eq(config_id));
            }
            query.load::<ProposalRecord>(&mut conn).await?
        });
        records.into_iter().map(Proposal::try_from).collect()
    }

    pub async fn count_pending_for_config(&self, config_id: &str) -> Result<i64, DieselError> {
        use diesel::dsl::count_star;
        with_conn!(self.pool, conn, {
            proposals::table
                .filter(proposals::automation_config_id.eq(config_id))
                .filter(proposals::status.eq(ProposalStatus::Pending.as_str()))
                .select(count_star())
                .first::<i64>(&mut conn)
                .await
        })
    }

    /// Dedup keys of the tenant's pending and rejected proposals.
    pub async fn dedup_keys(&self, tenant_id: &str) -> Result<Vec<DedupKeys>, DieselError> {
        let rows: Vec<(Option<String>, Option<String>, Option<String>)> =
            with_conn!(self.pool, conn, {
                proposals::table
                    .filter(proposals::tenant_id.eq(tenant_id))
                    .filter(proposals::status.eq_any([
                        ProposalStatus::Pending.as_str(),
                        ProposalStatus::Rejected.as_str(),
                    ]))
                    .select((
                        proposals::dedup_url,
                        proposals::dedup_title,
                        proposals::dedup_company,
                    ))
                    .load(&mut conn)
                    .await?
            });
        Ok(rows
            .into_iter()
            .map(|(url, title, company)| DedupKeys {
                url,
                title,
                company,
            })
            .collect())
    }

    /// Automation proposals from one config created at or after `since`.
    pub async fn created_since(
        &self,
        config_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Proposal>, DieselError> {
        let since = format_timestamp(since);
        let records: Vec<ProposalRecord> = with_conn!(self.pool, conn, {
            proposals::table
                .filter(proposals::automation_config_id.eq(config_id))
                .filter(proposals::source.eq(ProposalSource::Automation.as_str()))
                .filter(proposals::created_at.ge(&since))
                .order(proposals::created_at.asc())
                .load::<ProposalRecord>(&mut conn)
                .await?
        });
        records.into_iter().map(Proposal::try_from).collect()
    }

    /// Move a pending proposal to approved or rejected. Returns false if it
    /// was no longer pending.
    pub async fn review(
        &self,
        id: &str,
        to: ProposalStatus,
        reviewer: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DieselError> {
        let at = format_timestamp(at);
        let rows = with_conn!(self.pool, conn, {
            diesel::update(
                proposals::table
                    .find(id)
                    .filter(proposals::status.eq(ProposalStatus::Pending.as_str())),
            )
            .set((
                proposals::status.eq(to.as_str()),
                proposals::reviewed_by.eq(Some(reviewer)),
                proposals::reviewed_at.eq(Some(&at)),
                proposals::updated_at.eq(&at),
            ))
            .execute(&mut conn)
            .await?
        });
        Ok(rows > 0)
    }

    /// Record the applier's outcome for an approved proposal.
    pub async fn record_execution(
        &self,
        id: &str,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, DieselError> {
        let at = format_timestamp(at);
        let (status, executed_at) = match error {
            None => (ProposalStatus::Executed, Some(at.as_str())),
            Some(_) => (ProposalStatus::Failed, None),
        };
        let rows = with_conn!(self.pool, conn, {
            diesel::update(
                proposals::table
                    .find(id)
                    .filter(proposals::status.eq(ProposalStatus::Approved.as_str())),
            )
            .set((
                proposals::status.eq(status.as_str()),
                proposals::executed_at.eq(executed_at),
                proposals::error_message.eq(error),
                proposals::updated_at.eq(&at),
            ))
            .execute(&mut conn)
            .await?
        });
        Ok(rows > 0)
    }

    /// Replace the payload of a pending proposal along with its fresh
    /// validation result and dedup keys.
    pub async fn update_payload(
        &self,
        id: &str,
        payload: &serde_json::Value,
        validation_errors: &[String],
        dedup: &DedupKeys,
        at: DateTime<Utc>,
    ) -> Result<bool, DieselError> {
        let payload = serde_json::to_string(payload)
            .map_err(|e| DieselError::SerializationError(Box::new(e)))?;
        let errors = serde_json::to_string(validation_errors)
            .map_err(|e| DieselError::SerializationError(Box::new(e)))?;
        let at = format_timestamp(at);
        let rows = with_conn!(self.pool, conn, {
            diesel::update(
                proposals::table
                    .find(id)
                    .filter(proposals::status.eq(ProposalStatus::Pending.as_str())),
            )
            .set((
                proposals::payload.eq(&payload),
                proposals::validation_errors.eq(&errors),
                proposals::dedup_url.eq(dedup.url.as_deref()),
                proposals::dedup_title.eq(dedup.title.as_deref()),
                proposals::dedup_company.eq(dedup.company.as_deref()),
                proposals::updated_at.eq(&at),
            ))
            .execute(&mut conn)
            .await?
        });
        Ok(rows > 0)
    }
}
