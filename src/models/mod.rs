//! Domain models for the automation engine.

mod automation;
mod proposal;
mod run_log;

pub use automation::{split_recipients, AutomationConfig, DEFAULT_INTERVAL_SECS, MAX_INTERVAL_SECS};
pub use proposal::{DedupKeys, Proposal, ProposalOperation, ProposalSource, ProposalStatus};
pub use run_log::{RunCounts, RunFlags, RunLog, RunStatus, SERVER_RESTARTED};
