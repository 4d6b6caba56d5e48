//! Persistence layer for configs, run logs and proposals.
//!
//! Diesel DSL over diesel-async, with SQLite by default and PostgreSQL
//! behind the `postgres` feature.

pub mod automation;
pub mod context;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod proposal;
pub mod run_log;
pub mod util;

use chrono::{DateTime, SecondsFormat, Utc};

pub use automation::AutomationConfigRepository;
pub use context::DbContext;
pub use pool::{DbPool, DieselError};
pub use proposal::{ProposalFilter, ProposalRepository};
pub use run_log::RunLogRepository;

/// Format a timestamp for storage.
///
/// Fixed width (microseconds, `Z` suffix) so string comparison in SQL
/// orders the same way as time.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn format_timestamp_opt(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(format_timestamp)
}

/// Parse a datetime string from the database.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use tempfile::TempDir;

    use super::DbContext;

    /// Migrated SQLite database in a temporary directory.
    pub async fn setup_test_db() -> (DbContext, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite:{}", db_path.display());
        super::migrations::run_migrations(&url).await.unwrap();
        let ctx = DbContext::from_url(&url).unwrap();
        (ctx, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_format_sorts_chronologically() {
        let a = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let b = a + chrono::Duration::milliseconds(1);
        let c = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();

        let (fa, fb, fc) = (format_timestamp(a), format_timestamp(b), format_timestamp(c));
        assert_eq!(fa, "2024-03-01T09:00:00.000000Z");
        assert!(fa < fb && fb < fc);
        assert_eq!(parse_datetime(&fb), b);
    }
}
