//! Error types for the engine services.

use std::time::Duration;

use thiserror::Error;

use crate::models::ProposalStatus;
use crate::repository::DieselError;
use crate::search::SearchError;

/// Failure of a single automation run.
///
/// The run ledger already carries the failure by the time this is returned;
/// callers only need to log it.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("lead search failed for config {config_id}: {source}")]
    Search {
        config_id: String,
        #[source]
        source: SearchError,
    },

    #[error("lead search timed out after {}s for config {config_id}", timeout.as_secs())]
    SearchTimeout { config_id: String, timeout: Duration },

    #[error("automation config not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] DieselError),
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("proposal not found: {0}")]
    NotFound(String),

    #[error("proposal {id} is {from}, cannot become {to}")]
    InvalidTransition {
        id: String,
        from: ProposalStatus,
        to: ProposalStatus,
    },

    #[error("proposal is invalid: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("tenant {0} already has a pending or rejected proposal for this lead")]
    DuplicateLead(String),

    #[error("database error: {0}")]
    Database(#[from] DieselError),
}

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("no recipients configured for {0}")]
    NoRecipients(String),

    #[error("database error: {0}")]
    Database(#[from] DieselError),
}
