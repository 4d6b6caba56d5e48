//! Database context: owns the pool and hands out repositories.

use std::path::Path;

use super::automation::AutomationConfigRepository;
use super::pool::{DbPool, DieselError};
use super::proposal::ProposalRepository;
use super::run_log::RunLogRepository;
use crate::with_conn;

/// Entry point for all persistence. Cheap to clone.
///
/// ```ignore
/// let ctx = DbContext::from_url("sqlite:prospector.db")?;
/// let due = ctx.automations().claim_due(Utc::now(), 16).await?;
/// ```
#[derive(Clone)]
pub struct DbContext {
    pool: DbPool,
}

impl DbContext {
    /// Supports `sqlite:path`, bare file paths and `postgres://` URLs.
    pub fn from_url(database_url: &str) -> Result<Self, DieselError> {
        let pool = DbPool::from_url(database_url)?;
        Ok(Self { pool })
    }

    pub fn from_sqlite_path(db_path: &Path) -> Self {
        Self {
            pool: DbPool::sqlite_from_path(db_path),
        }
    }

    pub fn with_pool(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn automations(&self) -> AutomationConfigRepository {
        AutomationConfigRepository::new(self.pool.clone())
    }

    pub fn run_logs(&self) -> RunLogRepository {
        RunLogRepository::new(self.pool.clone())
    }

    pub fn proposals(&self) -> ProposalRepository {
        ProposalRepository::new(self.pool.clone())
    }

    /// Check that a connection can be opened.
    pub async fn test_connection(&self) -> Result<(), DieselError> {
        with_conn!(self.pool, _conn, Ok(()))
    }
}
