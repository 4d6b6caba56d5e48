//! Executes one automation run end to end.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use super::controller::Controller;
use super::dedup::{keys_for, DedupIndex};
use super::error::ExecutionError;
use crate::models::{
    AutomationConfig, Proposal, ProposalOperation, ProposalSource, RunCounts, RunFlags, RunLog,
};
use crate::repository::DbContext;
use crate::search::{Candidate, LeadSearch};

/// Identity recorded as `proposed_by` on automation proposals.
pub const AUTOMATION_PROPOSER: &str = "automation";

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The run finished and was recorded as done.
    Completed {
        run_id: String,
        counts: RunCounts,
        flags: RunFlags,
    },
    /// Another run of the same config is still open.
    AlreadyRunning,
    /// The pending backlog is at the compilation target; nothing was searched.
    Compiled { pending: i64 },
}

pub struct Executor {
    db: DbContext,
    search: Arc<dyn LeadSearch>,
    controller: Arc<Controller>,
    search_timeout: Duration,
}

impl Executor {
    pub fn new(
        db: DbContext,
        search: Arc<dyn LeadSearch>,
        controller: Arc<Controller>,
        search_timeout: Duration,
    ) -> Self {
        Self {
            db,
            search,
            controller,
            search_timeout,
        }
    }

    /// Run a config by id, outside the schedule.
    pub async fn execute_by_id(&self, config_id: &str) -> Result<RunOutcome, ExecutionError> {
        let config = self
            .db
            .automations()
            .get(config_id)
            .await?
            .ok_or_else(|| ExecutionError::NotFound(config_id.to_string()))?;
        self.execute(&config).await
    }

    /// Search, deduplicate, propose, record.
    ///
    /// Failures after the run starts close it as failed, and count as an
    /// attempt, before the error is returned.
    pub async fn execute(&self, config: &AutomationConfig) -> Result<RunOutcome, ExecutionError> {
        let now = Utc::now();
        let gate = self.controller.refresh_compilation(config, now).await?;
        if gate.compiled {
            debug!(config_id = %config.id, pending = gate.pending, "Skipping compiled automation");
            return Ok(RunOutcome::Compiled {
                pending: gate.pending,
            });
        }

        let run_logs = self.db.run_logs();
        let Some(run) = run_logs.start_run(config, now).await? else {
            debug!(config_id = %config.id, "Run already in progress");
            return Ok(RunOutcome::AlreadyRunning);
        };
        info!(config_id = %config.id, run_id = %run.id, query = %run.executed_query, "Run started");

        let counts = match self.propose(config, &run).await {
            Ok(counts) => counts,
            Err(e) => {
                let finished = Utc::now();
                run_logs.fail_run(&run.id, &e.to_string(), finished).await?;
                self.db.automations().record_run(&config.id, finished).await?;
                warn!(config_id = %config.id, run_id = %run.id, "Run failed: {}", e);
                return Err(e);
            }
        };

        let finished = Utc::now();
        run_logs.finish_run(&run.id, counts, finished).await?;
        self.db.automations().record_run(&config.id, finished).await?;

        let flags = match self.controller.after_run(&config.id, finished).await {
            Ok(flags) => flags,
            Err(e) => {
                warn!(config_id = %config.id, run_id = %run.id, "Controller failed: {}", e);
                RunFlags::default()
            }
        };
        if flags != RunFlags::default() {
            run_logs.set_flags(&run.id, flags).await?;
        }

        info!(
            config_id = %config.id,
            run_id = %run.id,
            prospects = counts.prospects_found,
            duplicates = counts.duplicates_skipped,
            proposals = counts.proposals_created,
            "Run complete"
        );
        Ok(RunOutcome::Completed {
            run_id: run.id,
            counts,
            flags,
        })
    }

    /// Search, drop known leads, and store the rest. Leads that another run
    /// stored first are counted as duplicates.
    async fn propose(
        &self,
        config: &AutomationConfig,
        run: &RunLog,
    ) -> Result<RunCounts, ExecutionError> {
        let candidates = self.search(config, run).await?;
        let (proposals, mut counts) = self.build_proposals(config, run, candidates).await?;

        let stored = self.db.proposals().create_unless_open(&proposals).await?;
        let raced = proposals.len().saturating_sub(stored);
        if raced > 0 {
            debug!(config_id = %config.id, raced, "Leads already proposed by a concurrent run");
        }
        counts.duplicates_skipped += i32::try_from(raced).unwrap_or(i32::MAX);
        counts.proposals_created = i32::try_from(stored).unwrap_or(i32::MAX);
        Ok(counts)
    }

    async fn search(
        &self,
        config: &AutomationConfig,
        run: &RunLog,
    ) -> Result<Vec<Candidate>, ExecutionError> {
        let call = self.search.search(&run.executed_query, &config.search_filters);
        match tokio::time::timeout(self.search_timeout, call).await {
            Ok(Ok(candidates)) => Ok(candidates),
            Ok(Err(source)) => Err(ExecutionError::Search {
                config_id: config.id.clone(),
                source,
            }),
            Err(_) => Err(ExecutionError::SearchTimeout {
                config_id: config.id.clone(),
                timeout: self.search_timeout,
            }),
        }
    }

    /// Drop candidates already pending or rejected for the tenant, or
    /// repeated within the batch, and turn the rest into proposals.
    async fn build_proposals(
        &self,
        config: &AutomationConfig,
        run: &RunLog,
        candidates: Vec<Candidate>,
    ) -> Result<(Vec<Proposal>, RunCounts), ExecutionError> {
        let known = self.db.proposals().dedup_keys(&config.tenant_id).await?;
        let mut index = DedupIndex::new(known);
        let mut counts = RunCounts {
            prospects_found: i32::try_from(candidates.len()).unwrap_or(i32::MAX),
            ..Default::default()
        };

        let mut proposals = Vec::new();
        for candidate in candidates {
            let keys = keys_for(&candidate);
            if !index.insert(&keys) {
                counts.duplicates_skipped += 1;
                continue;
            }

            let payload = json!({
                "url": candidate.url,
                "title": candidate.title,
                "account": candidate.account,
                "snippet": candidate.snippet,
                "query": run.executed_query,
                "raw": candidate.raw,
            });
            let mut proposal = Proposal::new(
                &config.tenant_id,
                AUTOMATION_PROPOSER,
                &config.entity_type,
                None,
                ProposalOperation::Create,
                payload,
                ProposalSource::Automation,
            );
            proposal.automation_config_id = Some(config.id.clone());
            proposal.dedup = keys;
            proposals.push(proposal);
        }
        Ok((proposals, counts))
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::FixedSearch;
    use super::*;
    use crate::models::{ProposalStatus, RunStatus};
    use crate::repository::test_support::setup_test_db;
    use crate::repository::ProposalFilter;
    use crate::services::controller::DEFAULT_HISTORY_WINDOW;
    use crate::services::suggest::DeterministicSuggester;

    fn executor(db: &DbContext, search: Arc<FixedSearch>) -> Executor {
        let controller = Arc::new(Controller::new(
            db.clone(),
            Arc::new(DeterministicSuggester),
            DEFAULT_HISTORY_WINDOW,
        ));
        Executor::new(db.clone(), search, controller, Duration::from_millis(500))
    }

    fn candidates() -> Vec<Candidate> {
        vec![
            Candidate::new("https://acme.example/", "Acme hiring").with_account("Acme"),
            Candidate::new("https://globex.example/", "Globex expands").with_account("Globex"),
            Candidate::new("https://www.acme.example", "Acme again").with_account("Acme"),
        ]
    }

    #[tokio::test]
    async fn test_run_creates_deduplicated_proposals() {
        let (db, _dir) = setup_test_db().await;
        let config = AutomationConfig::new("t1", "u1", "c", "saas buyers");
        db.automations().create(&config).await.unwrap();
        let search = Arc::new(FixedSearch::new(candidates()));

        let outcome = executor(&db, search.clone()).execute(&config).await.unwrap();
        let RunOutcome::Completed { run_id, counts, .. } = outcome else {
            panic!("expected completed run, got {outcome:?}");
        };
        assert_eq!(
            counts,
            RunCounts {
                prospects_found: 3,
                duplicates_skipped: 1,
                proposals_created: 2
            }
        );
        assert_eq!(search.queries.lock().unwrap().as_slice(), ["saas buyers"]);

        let run = db.run_logs().get(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Done);
        assert_eq!(run.proposals_created, 2);

        let proposals = db
            .proposals()
            .list(&ProposalFilter::default(), 10, 0)
            .await
            .unwrap();
        assert_eq!(proposals.len(), 2);
        assert!(proposals.iter().all(|p| p.status == ProposalStatus::Pending
            && p.source == ProposalSource::Automation
            && p.automation_config_id.as_deref() == Some(config.id.as_str())));

        let stored = db.automations().get(&config.id).await.unwrap().unwrap();
        assert_eq!(stored.run_count, 1);
        assert!(stored.last_run_at.is_some());

        // Same results again: everything is already pending.
        let outcome = executor(&db, search).execute(&config).await.unwrap();
        let RunOutcome::Completed { counts, .. } = outcome else {
            panic!("expected completed run");
        };
        assert_eq!(counts.proposals_created, 0);
        assert_eq!(counts.duplicates_skipped, 3);
    }

    #[tokio::test]
    async fn test_rejected_leads_stay_rejected() {
        let (db, _dir) = setup_test_db().await;
        let config = AutomationConfig::new("t1", "u1", "c", "q");
        db.automations().create(&config).await.unwrap();
        let search = Arc::new(FixedSearch::new(vec![Candidate::new(
            "https://acme.example/",
            "Acme",
        )]));
        let exec = executor(&db, search);

        exec.execute(&config).await.unwrap();
        let first = &db
            .proposals()
            .list(&ProposalFilter::default(), 10, 0)
            .await
            .unwrap()[0];
        db.proposals()
            .review(&first.id, ProposalStatus::Rejected, "r", Utc::now())
            .await
            .unwrap();

        let RunOutcome::Completed { counts, .. } = exec.execute(&config).await.unwrap() else {
            panic!("expected completed run");
        };
        assert_eq!(counts.proposals_created, 0);
    }

    #[tokio::test]
    async fn test_search_failure_fails_run() {
        let (db, _dir) = setup_test_db().await;
        let config = AutomationConfig::new("t1", "u1", "c", "q");
        db.automations().create(&config).await.unwrap();

        let err = executor(&db, Arc::new(FixedSearch::failing()))
            .execute(&config)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Search { .. }));

        let runs = db.run_logs().list(Some(&config.id), 10, 0).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].error_message.as_deref().unwrap().contains("engine down"));
        assert!(db.run_logs().running_for(&config.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_timeout_fails_run() {
        let (db, _dir) = setup_test_db().await;
        let config = AutomationConfig::new("t1", "u1", "c", "q");
        db.automations().create(&config).await.unwrap();
        let mut slow = FixedSearch::new(candidates());
        slow.delay = Some(Duration::from_secs(5));

        let err = executor(&db, Arc::new(slow))
            .execute(&config)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::SearchTimeout { .. }));
        let runs = db.run_logs().list(Some(&config.id), 10, 0).await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_open_run_blocks_second_start() {
        let (db, _dir) = setup_test_db().await;
        let config = AutomationConfig::new("t1", "u1", "c", "q");
        db.automations().create(&config).await.unwrap();
        db.run_logs().start_run(&config, Utc::now()).await.unwrap();
        let search = Arc::new(FixedSearch::new(candidates()));

        let outcome = executor(&db, search.clone()).execute(&config).await.unwrap();
        assert_eq!(outcome, RunOutcome::AlreadyRunning);
        assert_eq!(search.calls(), 0);
    }

    #[tokio::test]
    async fn test_compiled_config_skips_search() {
        let (db, _dir) = setup_test_db().await;
        let mut config = AutomationConfig::new("t1", "u1", "c", "q");
        config.compilation_target = 2;
        db.automations().create(&config).await.unwrap();
        let search = Arc::new(FixedSearch::new(candidates()));
        let exec = executor(&db, search.clone());

        let RunOutcome::Completed { flags, .. } = exec.execute(&config).await.unwrap() else {
            panic!("expected completed run");
        };
        assert!(flags.compiled);

        let config = db.automations().get(&config.id).await.unwrap().unwrap();
        assert_eq!(
            exec.execute(&config).await.unwrap(),
            RunOutcome::Compiled { pending: 2 }
        );
        assert_eq!(search.calls(), 1);
        assert_eq!(db.run_logs().count(Some(&config.id)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_execute_by_id_unknown() {
        let (db, _dir) = setup_test_db().await;
        let err = executor(&db, Arc::new(FixedSearch::new(Vec::new())))
            .execute_by_id("nope")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::NotFound(_)));
    }

    /// Search that pulls the proposal table out from under the run.
    struct BreaksStore(std::path::PathBuf);

    #[async_trait::async_trait]
    impl LeadSearch for BreaksStore {
        async fn search(
            &self,
            _query: &str,
            _filters: &serde_json::Map<String, serde_json::Value>,
        ) -> Result<Vec<Candidate>, crate::search::SearchError> {
            let conn = rusqlite::Connection::open(&self.0).unwrap();
            conn.execute_batch("ALTER TABLE proposals RENAME TO proposals_moved")
                .unwrap();
            Ok(vec![Candidate::new("https://acme.example/", "Acme")])
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_run_and_counts_attempt() {
        let (db, dir) = setup_test_db().await;
        let config = AutomationConfig::new("t1", "u1", "c", "q");
        db.automations().create(&config).await.unwrap();
        let controller = Arc::new(Controller::new(
            db.clone(),
            Arc::new(DeterministicSuggester),
            DEFAULT_HISTORY_WINDOW,
        ));
        let exec = Executor::new(
            db.clone(),
            Arc::new(BreaksStore(dir.path().join("test.db"))),
            controller,
            Duration::from_millis(500),
        );

        let err = exec.execute(&config).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Database(_)));

        let runs = db.run_logs().list(Some(&config.id), 10, 0).await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        let stored = db.automations().get(&config.id).await.unwrap().unwrap();
        assert_eq!(stored.run_count, 1);
        assert!(stored.last_run_at.is_some());
    }
}
