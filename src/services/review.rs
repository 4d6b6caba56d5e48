//! Human review of proposals and applier feedback.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use diesel::result::DatabaseErrorKind;

use super::controller::Controller;
use super::dedup::keys_for_payload;
use super::error::ReviewError;
use crate::models::{Proposal, ProposalOperation, ProposalSource, ProposalStatus};
use crate::repository::{DbContext, DieselError};

/// An open-lead index hit means the lead is already pending or rejected.
fn lead_conflict(tenant_id: &str, e: DieselError) -> ReviewError {
    match e {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            ReviewError::DuplicateLead(tenant_id.to_string())
        }
        other => other.into(),
    }
}

pub struct ReviewService {
    db: DbContext,
    controller: Arc<Controller>,
}

impl ReviewService {
    pub fn new(db: DbContext, controller: Arc<Controller>) -> Self {
        Self { db, controller }
    }

    async fn load(&self, id: &str) -> Result<Proposal, ReviewError> {
        self.db
            .proposals()
            .get(id)
            .await?
            .ok_or_else(|| ReviewError::NotFound(id.to_string()))
    }

    fn check_transition(proposal: &Proposal, to: ProposalStatus) -> Result<(), ReviewError> {
        if proposal.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(ReviewError::InvalidTransition {
                id: proposal.id.clone(),
                from: proposal.status,
                to,
            })
        }
    }

    /// Reload after a conditional update that matched nothing, so the error
    /// reports the status that won the race.
    async fn lost_race(&self, id: &str, to: ProposalStatus) -> ReviewError {
        match self.load(id).await {
            Ok(current) => ReviewError::InvalidTransition {
                id: id.to_string(),
                from: current.status,
                to,
            },
            Err(e) => e,
        }
    }

    async fn refresh_gate(&self, proposal: &Proposal) {
        let Some(config_id) = proposal.automation_config_id.as_deref() else {
            return;
        };
        if let Err(e) = self.controller.refresh_compilation_for(config_id, Utc::now()).await {
            warn!(config_id, "Failed to re-evaluate compilation: {}", e);
        }
    }

    async fn review(
        &self,
        id: &str,
        to: ProposalStatus,
        reviewer: &str,
    ) -> Result<Proposal, ReviewError> {
        let proposal = self.load(id).await?;
        Self::check_transition(&proposal, to)?;
        if to == ProposalStatus::Approved && !proposal.is_valid() {
            return Err(ReviewError::Validation(proposal.validation_errors));
        }

        if !self.db.proposals().review(id, to, reviewer, Utc::now()).await? {
            return Err(self.lost_race(id, to).await);
        }
        info!(proposal_id = id, reviewer, status = %to, "Proposal reviewed");

        let updated = self.load(id).await?;
        self.refresh_gate(&updated).await;
        Ok(updated)
    }

    /// Approve a pending proposal for the applier. Invalid proposals are refused.
    pub async fn approve(&self, id: &str, reviewer: &str) -> Result<Proposal, ReviewError> {
        self.review(id, ProposalStatus::Approved, reviewer).await
    }

    pub async fn reject(&self, id: &str, reviewer: &str) -> Result<Proposal, ReviewError> {
        self.review(id, ProposalStatus::Rejected, reviewer).await
    }

    /// Replace a pending proposal's payload and re-run validation.
    pub async fn edit_payload(
        &self,
        id: &str,
        payload: serde_json::Value,
    ) -> Result<Proposal, ReviewError> {
        let mut proposal = self.load(id).await?;
        if proposal.status != ProposalStatus::Pending {
            return Err(ReviewError::InvalidTransition {
                id: id.to_string(),
                from: proposal.status,
                to: ProposalStatus::Pending,
            });
        }
        proposal.dedup = keys_for_payload(&payload);
        proposal.payload = payload;
        proposal.validation_errors = proposal.validate();

        let updated = self
            .db
            .proposals()
            .update_payload(
                id,
                &proposal.payload,
                &proposal.validation_errors,
                &proposal.dedup,
                Utc::now(),
            )
            .await
            .map_err(|e| lead_conflict(&proposal.tenant_id, e))?;
        if !updated {
            return Err(self.lost_race(id, ProposalStatus::Pending).await);
        }
        self.load(id).await
    }

    async fn record_execution(
        &self,
        id: &str,
        error: Option<&str>,
    ) -> Result<Proposal, ReviewError> {
        let to = match error {
            None => ProposalStatus::Executed,
            Some(_) => ProposalStatus::Failed,
        };
        let proposal = self.load(id).await?;
        Self::check_transition(&proposal, to)?;
        if !self
            .db
            .proposals()
            .record_execution(id, error, Utc::now())
            .await?
        {
            return Err(self.lost_race(id, to).await);
        }
        match error {
            None => info!(proposal_id = id, "Proposal executed"),
            Some(e) => warn!(proposal_id = id, "Proposal execution failed: {}", e),
        }
        self.load(id).await
    }

    /// Applier feedback: the approved mutation was applied.
    pub async fn mark_executed(&self, id: &str) -> Result<Proposal, ReviewError> {
        self.record_execution(id, None).await
    }

    /// Applier feedback: the approved mutation could not be applied.
    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<Proposal, ReviewError> {
        self.record_execution(id, Some(error)).await
    }

    /// Queue a failed proposal again as a fresh pending copy.
    pub async fn resubmit(&self, id: &str) -> Result<Proposal, ReviewError> {
        let proposal = self.load(id).await?;
        if proposal.status != ProposalStatus::Failed {
            return Err(ReviewError::InvalidTransition {
                id: id.to_string(),
                from: proposal.status,
                to: ProposalStatus::Pending,
            });
        }
        let copy = proposal.resubmission();
        self.db
            .proposals()
            .create(&copy)
            .await
            .map_err(|e| lead_conflict(&copy.tenant_id, e))?;
        info!(proposal_id = id, new_id = %copy.id, "Proposal resubmitted");
        self.refresh_gate(&copy).await;
        Ok(copy)
    }

    /// Record a proposal entered by hand. Lead payloads carry dedup keys, so
    /// automation will not propose the same lead while this one is open.
    pub async fn create_manual(
        &self,
        tenant_id: &str,
        proposed_by: &str,
        entity_type: &str,
        entity_id: Option<i64>,
        operation: ProposalOperation,
        payload: serde_json::Value,
    ) -> Result<Proposal, ReviewError> {
        let dedup = keys_for_payload(&payload);
        let mut proposal = Proposal::new(
            tenant_id,
            proposed_by,
            entity_type,
            entity_id,
            operation,
            payload,
            ProposalSource::Manual,
        );
        proposal.dedup = dedup;
        self.db
            .proposals()
            .create(&proposal)
            .await
            .map_err(|e| lead_conflict(tenant_id, e))?;
        Ok(proposal)
    }
}
