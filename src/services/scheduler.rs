//! Periodic claim-and-execute loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::executor::{Executor, RunOutcome};
use crate::repository::{DbContext, DieselError};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    pub already_running: usize,
    pub compiled: usize,
    pub proposals_created: i64,
}

pub struct Scheduler {
    db: DbContext,
    executor: Arc<Executor>,
    max_concurrent_runs: usize,
    claim_batch_size: i64,
}

impl Scheduler {
    pub fn new(
        db: DbContext,
        executor: Arc<Executor>,
        max_concurrent_runs: usize,
        claim_batch_size: i64,
    ) -> Self {
        Self {
            db,
            executor,
            max_concurrent_runs: max_concurrent_runs.max(1),
            claim_batch_size: claim_batch_size.max(1),
        }
    }

    /// Claim every due config and run them with bounded concurrency.
    ///
    /// Run failures are logged and counted, never returned; only a failed
    /// claim is an error.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, DieselError> {
        let claimed = self
            .db
            .automations()
            .claim_due(now, self.claim_batch_size)
            .await?;
        let mut report = TickReport {
            claimed: claimed.len(),
            ..Default::default()
        };
        if claimed.is_empty() {
            debug!("No automations due");
            return Ok(report);
        }
        info!(count = claimed.len(), "Claimed due automations");

        let outcomes: Vec<_> = stream::iter(claimed)
            .map(|config| {
                let executor = self.executor.clone();
                async move {
                    let result = executor.execute(&config).await;
                    (config.id, result)
                }
            })
            .buffer_unordered(self.max_concurrent_runs)
            .collect()
            .await;

        for (config_id, result) in outcomes {
            match result {
                Ok(RunOutcome::Completed { counts, .. }) => {
                    report.completed += 1;
                    report.proposals_created += i64::from(counts.proposals_created);
                }
                Ok(RunOutcome::AlreadyRunning) => report.already_running += 1,
                Ok(RunOutcome::Compiled { .. }) => report.compiled += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(config_id = %config_id, "Automation run failed: {}", e);
                }
            }
        }
        Ok(report)
    }

    /// Tick every `interval` until `shutdown` flips to true. In-flight runs
    /// of the current tick finish before returning.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "Scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick(Utc::now()).await {
                        Ok(report) if report.claimed > 0 => info!(
                            claimed = report.claimed,
                            completed = report.completed,
                            failed = report.failed,
                            proposals = report.proposals_created,
                            "Tick complete"
                        ),
                        Ok(_) => {}
                        Err(e) => error!("Scheduler tick failed: {}", e),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Scheduler stopped");
    }
}
