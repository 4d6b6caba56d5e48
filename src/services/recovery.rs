//! Startup recovery for runs interrupted by a crash or restart.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::models::SERVER_RESTARTED;
use crate::repository::{DbContext, DieselError};

/// Fail every run still marked as running. Returns how many were closed;
/// a second call returns 0.
///
/// Must run before the scheduler starts, or it would fail live runs.
pub async fn recover_interrupted_runs(
    db: &DbContext,
    now: DateTime<Utc>,
) -> Result<usize, DieselError> {
    let count = db.run_logs().fail_all_running(SERVER_RESTARTED, now).await?;
    if count > 0 {
        warn!(count, "Closed runs interrupted by restart");
    } else {
        info!("No interrupted runs");
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AutomationConfig, RunStatus};
    use crate::repository::test_support::setup_test_db;

    #[tokio::test]
    async fn test_recovery_is_idempotent() {
        let (db, _dir) = setup_test_db().await;
        let a = AutomationConfig::new("t1", "u1", "a", "q");
        let b = AutomationConfig::new("t1", "u1", "b", "q");
        db.automations().create(&a).await.unwrap();
        db.automations().create(&b).await.unwrap();
        let run_a = db.run_logs().start_run(&a, Utc::now()).await.unwrap().unwrap();
        let run_b = db.run_logs().start_run(&b, Utc::now()).await.unwrap().unwrap();
        db.run_logs()
            .finish_run(&run_b.id, Default::default(), Utc::now())
            .await
            .unwrap();

        assert_eq!(recover_interrupted_runs(&db, Utc::now()).await.unwrap(), 1);
        assert_eq!(recover_interrupted_runs(&db, Utc::now()).await.unwrap(), 0);

        let run_a = db.run_logs().get(&run_a.id).await.unwrap().unwrap();
        assert_eq!(run_a.status, RunStatus::Failed);
        assert_eq!(run_a.error_message.as_deref(), Some(SERVER_RESTARTED));
        let run_b = db.run_logs().get(&run_b.id).await.unwrap().unwrap();
        assert_eq!(run_b.status, RunStatus::Done);
    }
}
