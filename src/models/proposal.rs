//! Agent-proposed CRM mutations awaiting human review.
//!
//! Status only moves forward:
//!
//! ```text
//! pending ──► approved ──► executed
//!    │            └──────► failed
//!    └──────► rejected
//! ```
//!
//! A failed proposal is never reopened; resubmitting creates a new pending
//! proposal with the same target and payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
    Failed,
}

impl ProposalStatus {
    pub const ALL: [ProposalStatus; 5] = [
        Self::Pending,
        Self::Approved,
        Self::Rejected,
        Self::Executed,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Executed => "executed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "executed" => Some(Self::Executed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: ProposalStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved)
                | (Self::Pending, Self::Rejected)
                | (Self::Approved, Self::Executed)
                | (Self::Approved, Self::Failed)
        )
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalOperation {
    Create,
    Update,
    Delete,
}

impl ProposalOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Where a proposal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalSource {
    Automation,
    Agent,
    Manual,
}

impl ProposalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automation => "automation",
            Self::Agent => "agent",
            Self::Manual => "manual",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "automation" => Some(Self::Automation),
            "agent" => Some(Self::Agent),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Normalized keys used to recognize the same lead across proposals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupKeys {
    pub url: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub tenant_id: String,
    pub proposed_by: String,
    pub entity_type: String,
    /// Existing CRM entity for update/delete. Weak reference only.
    pub entity_id: Option<i64>,
    pub operation: ProposalOperation,
    pub payload: serde_json::Value,
    pub status: ProposalStatus,
    pub validation_errors: Vec<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub source: ProposalSource,
    pub automation_config_id: Option<String>,
    pub dedup: DedupKeys,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    /// Build a pending proposal, recording any validation problems.
    pub fn new(
        tenant_id: &str,
        proposed_by: &str,
        entity_type: &str,
        entity_id: Option<i64>,
        operation: ProposalOperation,
        payload: serde_json::Value,
        source: ProposalSource,
    ) -> Self {
        let now = Utc::now();
        let mut proposal = Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            proposed_by: proposed_by.to_string(),
            entity_type: entity_type.to_string(),
            entity_id,
            operation,
            payload,
            status: ProposalStatus::Pending,
            validation_errors: Vec::new(),
            reviewed_by: None,
            reviewed_at: None,
            executed_at: None,
            error_message: None,
            source,
            automation_config_id: None,
            dedup: DedupKeys::default(),
            created_at: now,
            updated_at: now,
        };
        proposal.validation_errors = proposal.validate();
        proposal
    }

    /// Check structural requirements for the target operation.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.entity_type.trim().is_empty() {
            errors.push("entity_type is required".to_string());
        }
        if !self.payload.is_object() {
            errors.push("payload must be a JSON object".to_string());
        }
        match (self.operation, self.entity_id) {
            (ProposalOperation::Create, Some(_)) => {
                errors.push("create must not reference an existing entity".to_string())
            }
            (ProposalOperation::Update | ProposalOperation::Delete, None) => errors.push(format!(
                "{} requires an entity_id",
                self.operation.as_str()
            )),
            _ => {}
        }
        if self.operation == ProposalOperation::Update
            && self.payload.as_object().is_some_and(|m| m.is_empty())
        {
            errors.push("update payload is empty".to_string());
        }
        errors
    }

    pub fn is_valid(&self) -> bool {
        self.validation_errors.is_empty()
    }

    /// Fresh pending copy of this proposal for another attempt.
    pub fn resubmission(&self) -> Self {
        let mut copy = Self::new(
            &self.tenant_id,
            &self.proposed_by,
            &self.entity_type,
            self.entity_id,
            self.operation,
            self.payload.clone(),
            self.source,
        );
        copy.automation_config_id = self.automation_config_id.clone();
        copy.dedup = self.dedup.clone();
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transitions_are_monotone() {
        use ProposalStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Executed));
        assert!(Approved.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Executed));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(!Executed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Approved.can_transition_to(Pending));
    }

    #[test]
    fn test_validation() {
        let ok = Proposal::new(
            "t1",
            "agent",
            "lead",
            None,
            ProposalOperation::Create,
            json!({"name": "Acme"}),
            ProposalSource::Agent,
        );
        assert!(ok.is_valid());

        let update_without_id = Proposal::new(
            "t1",
            "agent",
            "lead",
            None,
            ProposalOperation::Update,
            json!({"stage": "won"}),
            ProposalSource::Agent,
        );
        assert_eq!(
            update_without_id.validation_errors,
            vec!["update requires an entity_id"]
        );

        let bad_payload = Proposal::new(
            "t1",
            "agent",
            "",
            Some(4),
            ProposalOperation::Create,
            json!([1, 2]),
            ProposalSource::Agent,
        );
        assert_eq!(bad_payload.validation_errors.len(), 3);
    }

    #[test]
    fn test_resubmission_is_new_pending_copy() {
        let mut original = Proposal::new(
            "t1",
            "agent",
            "deal",
            Some(9),
            ProposalOperation::Delete,
            json!({}),
            ProposalSource::Automation,
        );
        original.status = ProposalStatus::Failed;
        original.automation_config_id = Some("cfg".to_string());

        let copy = original.resubmission();
        assert_ne!(copy.id, original.id);
        assert_eq!(copy.status, ProposalStatus::Pending);
        assert_eq!(copy.entity_id, Some(9));
        assert_eq!(copy.automation_config_id.as_deref(), Some("cfg"));
    }
}
