//! Run ledger entries, one per execution attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message recorded on runs reclassified during startup recovery.
pub const SERVER_RESTARTED: &str = "server restarted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Done,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// A single execution attempt of an automation config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub id: String,
    pub config_id: String,
    pub tenant_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub prospects_found: i32,
    pub duplicates_skipped: i32,
    pub proposals_created: i32,
    /// Exact query text handed to the search tool.
    pub executed_query: String,
    /// Exact prompt text in effect for the run.
    pub executed_prompt: String,
    /// Prompt length in characters, kept for cost auditing.
    pub prompt_chars: i32,
    pub compiled: bool,
    pub query_updated: bool,
    pub prompt_updated: bool,
    pub error_message: Option<String>,
}

impl RunLog {
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|done| done - self.started_at)
    }
}

/// Counts recorded when a run completes successfully.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub prospects_found: i32,
    pub duplicates_skipped: i32,
    pub proposals_created: i32,
}

/// Flags the controller sets after analysing a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunFlags {
    pub compiled: bool,
    pub query_updated: bool,
    pub prompt_updated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        for status in [RunStatus::Running, RunStatus::Done, RunStatus::Failed] {
            assert_eq!(RunStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::from_str("queued"), None);
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }
}
