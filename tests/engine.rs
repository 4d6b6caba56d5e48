//! End-to-end engine tests against a migrated SQLite database.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Map, Value};
use tempfile::TempDir;

use prospector::config::{DigestSettings, SchedulerSettings};
use prospector::mail::{MailError, Mailer};
use prospector::models::{
    AutomationConfig, Proposal, ProposalOperation, ProposalSource, ProposalStatus, RunStatus,
};
use prospector::repository::migrations::run_migrations;
use prospector::repository::DbContext;
use prospector::search::{Candidate, LeadSearch, SearchError};
use prospector::services::dedup::keys_for;
use prospector::services::{Collaborators, Engine};

struct FixedSearch(Vec<Candidate>);

#[async_trait]
impl LeadSearch for FixedSearch {
    async fn search(
        &self,
        _query: &str,
        _filters: &Map<String, Value>,
    ) -> Result<Vec<Candidate>, SearchError> {
        Ok(self.0.clone())
    }
}

struct DiscardMailer;

#[async_trait]
impl Mailer for DiscardMailer {
    async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), MailError> {
        Ok(())
    }
}

async fn setup() -> (DbContext, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("engine.db").display());
    run_migrations(&url).await.unwrap();
    (DbContext::from_url(&url).unwrap(), dir)
}

fn candidates() -> Vec<Candidate> {
    [
        ("https://alpha.example/about", "Alpha Labs", "Alpha"),
        ("https://bravo.example/", "Bravo Systems", "Bravo"),
        ("https://charlie.example/team", "Charlie Works", "Charlie"),
        ("https://delta.example/", "Delta Consulting", "Delta"),
        ("https://echo.example/jobs", "Echo Studio", "Echo"),
    ]
    .iter()
    .map(|(url, title, account)| Candidate::new(url, title).with_account(account))
    .collect()
}

async fn known_lead(db: &DbContext, tenant: &str, candidate: &Candidate) -> Proposal {
    let mut proposal = Proposal::new(
        tenant,
        "automation",
        "lead",
        None,
        ProposalOperation::Create,
        json!({"url": candidate.url, "title": candidate.title}),
        ProposalSource::Automation,
    );
    proposal.dedup = keys_for(candidate);
    db.proposals().create(&proposal).await.unwrap();
    proposal
}

#[tokio::test]
async fn test_scheduled_run_end_to_end() {
    let (db, _dir) = setup().await;
    let leads = candidates();

    let mut config = AutomationConfig::new("acme", "owner", "Rust shops", "rust consultancies");
    config.interval_secs = 3600;
    db.automations().create(&config).await.unwrap();

    // One lead is already pending and one was rejected earlier.
    known_lead(&db, "acme", &leads[0]).await;
    let rejected = known_lead(&db, "acme", &leads[3]).await;
    assert!(db
        .proposals()
        .review(&rejected.id, ProposalStatus::Rejected, "reviewer", Utc::now())
        .await
        .unwrap());

    let engine = Engine::new(
        db.clone(),
        Collaborators {
            search: Arc::new(FixedSearch(leads)),
            generator: None,
            mailer: Arc::new(DiscardMailer),
        },
        &SchedulerSettings::default(),
        &DigestSettings::default(),
    );
    let scheduler = engine.scheduler();
    let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();

    let report = scheduler.tick(t0).await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.proposals_created, 3);

    let stored = db.automations().get(&config.id).await.unwrap().unwrap();
    assert_eq!(stored.next_run_at, Some(t0 + Duration::seconds(3600)));
    assert_eq!(stored.run_count, 1);

    let runs = db.run_logs().list(Some(&config.id), 10, 0).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Done);
    assert_eq!(runs[0].prospects_found, 5);
    assert_eq!(runs[0].duplicates_skipped, 2);
    assert_eq!(runs[0].proposals_created, 3);
    assert_eq!(runs[0].executed_query, "rust consultancies");
    assert_eq!(
        db.proposals()
            .count_pending_for_config(&config.id)
            .await
            .unwrap(),
        3
    );

    let report = scheduler.tick(t0 + Duration::seconds(1800)).await.unwrap();
    assert_eq!(report.claimed, 0);

    let report = scheduler.tick(t0 + Duration::seconds(3600)).await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.proposals_created, 0, "every lead is now known");

    let stored = db.automations().get(&config.id).await.unwrap().unwrap();
    assert_eq!(stored.next_run_at, Some(t0 + Duration::seconds(7200)));
    assert_eq!(stored.run_count, 2);
}

#[tokio::test]
async fn test_concurrent_claims_take_each_config_once() {
    let (db, _dir) = setup().await;
    let mut ids = HashSet::new();
    for i in 0..12 {
        let config = AutomationConfig::new("acme", "owner", &format!("auto-{}", i), "q");
        ids.insert(config.id.clone());
        db.automations().create(&config).await.unwrap();
    }

    let now = Utc::now();
    let handles: Vec<_> = (0..6)
        .map(|_| {
            let db = db.clone();
            tokio::spawn(async move { db.automations().claim_due(now, 100).await.unwrap() })
        })
        .collect();

    let mut claimed = Vec::new();
    for handle in handles {
        claimed.extend(handle.await.unwrap().into_iter().map(|c| c.id));
    }

    assert_eq!(claimed.len(), 12, "no config claimed twice");
    let unique: HashSet<_> = claimed.into_iter().collect();
    assert_eq!(unique, ids);

    assert!(db.automations().claim_due(now, 100).await.unwrap().is_empty());
}
