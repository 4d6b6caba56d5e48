//! Adaptive controller: turns run yield into schedule and search changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::analytics::RunAnalytics;
use super::suggest::Suggester;
use crate::models::{AutomationConfig, RunFlags, RunLog};
use crate::repository::{DbContext, DieselError};

/// Default number of recent done runs the controller looks at.
pub const DEFAULT_HISTORY_WINDOW: i64 = 100;

/// Pending backlog measured against a config's compilation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilationState {
    pub compiled: bool,
    pub pending: i64,
}

pub struct Controller {
    db: DbContext,
    suggester: Arc<dyn Suggester>,
    history_window: i64,
}

impl Controller {
    pub fn new(db: DbContext, suggester: Arc<dyn Suggester>, history_window: i64) -> Self {
        Self {
            db,
            suggester,
            history_window: history_window.max(1),
        }
    }

    /// Analyse the config's recent runs after one finishes and adapt it.
    ///
    /// Returns the flags to record on the finished run.
    pub async fn after_run(&self, config_id: &str, now: DateTime<Utc>) -> Result<RunFlags, DieselError> {
        let automations = self.db.automations();
        let Some(config) = automations.get(config_id).await? else {
            return Ok(RunFlags::default());
        };

        let history = self
            .db
            .run_logs()
            .recent_done(config_id, self.history_window)
            .await?;
        let analytics = RunAnalytics::from_runs(&history);
        let mut flags = RunFlags::default();

        // Counted forward from the stored value, which re-enabling resets.
        let zero_runs = match history.first() {
            Some(latest) if latest.proposals_created == 0 => {
                config.consecutive_zero_runs.saturating_add(1)
            }
            _ => 0,
        };
        automations
            .set_consecutive_zero_runs(config_id, zero_runs)
            .await?;
        if config.enabled && config.empty_run_limit > 0 && zero_runs >= config.empty_run_limit {
            warn!(
                config_id,
                zero_runs,
                "Disabling automation after repeated empty runs"
            );
            automations.set_enabled(config_id, false).await?;
        }

        flags.compiled = self.refresh_compilation(&config, now).await?.compiled;

        if !cooldown_elapsed(&config, &history) {
            debug!(config_id, "Suggestion cooldown in effect");
            return Ok(flags);
        }
        let Some(suggestion) = self.suggester.suggest(&config, &analytics).await else {
            return Ok(flags);
        };
        if config.has_pending_suggestion()
            && suggestion.query == config.suggested_query
            && suggestion.prompt == config.suggested_prompt
        {
            return Ok(flags);
        }

        info!(config_id, reason = %suggestion.reason, "New suggestion");
        automations.store_suggestion(config_id, &suggestion, now).await?;
        flags.query_updated = suggestion.query.is_some();
        flags.prompt_updated = suggestion.prompt.is_some();

        if config.auto_accept_suggestions && automations.accept_suggestion(config_id, now).await? {
            info!(config_id, "Suggestion auto-accepted");
        }
        Ok(flags)
    }

    /// Compare the pending backlog with the compilation target and update
    /// `compiled_at` (and `enabled`, for disabling configs) to match.
    pub async fn refresh_compilation(
        &self,
        config: &AutomationConfig,
        now: DateTime<Utc>,
    ) -> Result<CompilationState, DieselError> {
        let automations = self.db.automations();
        if !config.has_compilation_target() {
            if config.compiled_at.is_some() {
                automations.set_compiled(&config.id, None, false).await?;
            }
            return Ok(CompilationState {
                compiled: false,
                pending: 0,
            });
        }

        let pending = self
            .db
            .proposals()
            .count_pending_for_config(&config.id)
            .await?;
        let compiled = pending >= i64::from(config.compilation_target);

        if compiled {
            let pause = config.disable_on_compiled && config.enabled;
            if config.compiled_at.is_none() || pause {
                info!(
                    config_id = %config.id,
                    pending,
                    target = config.compilation_target,
                    disabled = pause,
                    "Automation compiled"
                );
                automations
                    .set_compiled(&config.id, Some(config.compiled_at.unwrap_or(now)), pause)
                    .await?;
            }
        } else if config.compiled_at.is_some() {
            info!(config_id = %config.id, pending, "Backlog below target, clearing compiled state");
            automations.set_compiled(&config.id, None, false).await?;
        }

        Ok(CompilationState { compiled, pending })
    }

    /// Re-evaluate the gate for a config by id, e.g. after a review.
    pub async fn refresh_compilation_for(
        &self,
        config_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CompilationState>, DieselError> {
        match self.db.automations().get(config_id).await? {
            Some(config) => Ok(Some(self.refresh_compilation(&config, now).await?)),
            None => Ok(None),
        }
    }
}

/// Whether enough evidence has accumulated for a new suggestion.
///
/// The first suggestion is always allowed. After that, the runs since the
/// last suggestion was accepted (or generated, if later) must exceed both
/// cooldown minimums and include at least one run meeting the threshold.
/// `history` is ordered newest first.
pub fn cooldown_elapsed(config: &AutomationConfig, history: &[RunLog]) -> bool {
    let since = match (config.suggestion_generated_at, config.suggestion_accepted_at) {
        (None, None) => return true,
        (Some(g), Some(a)) => g.max(a),
        (Some(t), None) | (None, Some(t)) => t,
    };

    let window: Vec<&RunLog> = history.iter().filter(|r| r.started_at > since).collect();
    let runs = window.len() as i64;
    let prospects: i64 = window.iter().map(|r| i64::from(r.prospects_found)).sum();
    let threshold_met = window
        .iter()
        .any(|r| r.prospects_found >= config.suggestion_threshold);

    runs > i64::from(config.prompt_cooldown_runs)
        && prospects > i64::from(config.prompt_cooldown_prospects)
        && threshold_met
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Proposal, ProposalOperation, ProposalSource, ProposalStatus, RunCounts};
    use crate::repository::test_support::setup_test_db;
    use crate::services::analytics::test_runs::runs;
    use crate::services::suggest::DeterministicSuggester;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn controller(db: &DbContext) -> Controller {
        Controller::new(db.clone(), Arc::new(DeterministicSuggester), DEFAULT_HISTORY_WINDOW)
    }

    async fn finished_run(db: &DbContext, config: &AutomationConfig, at: DateTime<Utc>, counts: RunCounts) {
        let mut snapshot = config.clone();
        snapshot.search_query = db
            .automations()
            .get(&config.id)
            .await
            .unwrap()
            .unwrap()
            .active_query()
            .to_string();
        let run = db.run_logs().start_run(&snapshot, at).await.unwrap().unwrap();
        db.run_logs().finish_run(&run.id, counts, at).await.unwrap();
    }

    fn counts(prospects: i32, proposals: i32) -> RunCounts {
        RunCounts {
            prospects_found: prospects,
            duplicates_skipped: 0,
            proposals_created: proposals,
        }
    }

    async fn pending_proposal(db: &DbContext, config: &AutomationConfig) -> Proposal {
        let mut p = Proposal::new(
            &config.tenant_id,
            "automation",
            "lead",
            None,
            ProposalOperation::Create,
            json!({"url": "https://x.example"}),
            ProposalSource::Automation,
        );
        p.automation_config_id = Some(config.id.clone());
        db.proposals().create(&p).await.unwrap();
        p
    }

    #[test]
    fn test_cooldown_first_suggestion_always_allowed() {
        let config = AutomationConfig::new("t1", "u1", "c", "q");
        assert!(cooldown_elapsed(&config, &[]));
    }

    #[test]
    fn test_cooldown_requires_runs_prospects_and_threshold() {
        let mut config = AutomationConfig::new("t1", "u1", "c", "q");
        config.prompt_cooldown_runs = 2;
        config.prompt_cooldown_prospects = 10;
        config.suggestion_threshold = 5;

        // runs() starts at 2024-01-01 00:00 and goes back an hour per entry.
        let history = runs(&[("q", 6, 1), ("q", 3, 0), ("q", 3, 0), ("q", 50, 9)]);
        let accepted = Utc.with_ymd_and_hms(2023, 12, 31, 21, 30, 0).unwrap();
        config.suggestion_accepted_at = Some(accepted);

        // Three runs, 12 prospects, one run at threshold.
        assert!(cooldown_elapsed(&config, &history));

        config.suggestion_threshold = 7;
        assert!(!cooldown_elapsed(&config, &history));

        config.suggestion_threshold = 5;
        config.prompt_cooldown_runs = 3;
        assert!(!cooldown_elapsed(&config, &history));

        // A later generated-but-pending suggestion moves the window.
        config.prompt_cooldown_runs = 0;
        config.suggestion_generated_at = Some(accepted + Duration::hours(3));
        assert!(!cooldown_elapsed(&config, &history));
    }

    #[tokio::test]
    async fn test_suggestion_written_once_then_cooldown_blocks() {
        let (db, _dir) = setup_test_db().await;
        let mut config = AutomationConfig::new("t1", "u1", "c", "broad");
        config.prompt_cooldown_runs = 5;
        config.prompt_cooldown_prospects = 50;
        db.automations().create(&config).await.unwrap();
        let ctl = controller(&db);
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();

        finished_run(&db, &config, t0, counts(20, 0)).await;
        let flags = ctl.after_run(&config.id, t0).await.unwrap();
        assert!(flags.prompt_updated);
        assert!(!flags.query_updated);

        let stored = db.automations().get(&config.id).await.unwrap().unwrap();
        assert!(stored.suggested_prompt.is_some());
        assert_eq!(stored.suggestion_generated_at, Some(t0));
        assert_eq!(stored.consecutive_zero_runs, 1);

        // Accept, then a high-yield run inside the cooldown produces nothing.
        db.automations().accept_suggestion(&config.id, t0).await.unwrap();
        let t1 = t0 + Duration::hours(1);
        let mut other = config.clone();
        other.search_query = "narrow".to_string();
        let run = db.run_logs().start_run(&other, t1).await.unwrap().unwrap();
        db.run_logs().finish_run(&run.id, counts(40, 10), t1).await.unwrap();

        let flags = ctl.after_run(&config.id, t1).await.unwrap();
        assert_eq!(flags, RunFlags::default());
        let stored = db.automations().get(&config.id).await.unwrap().unwrap();
        assert!(!stored.has_pending_suggestion());
        assert_eq!(stored.consecutive_zero_runs, 0);
    }

    #[tokio::test]
    async fn test_auto_accept_adopts_suggestion() {
        let (db, _dir) = setup_test_db().await;
        let mut config = AutomationConfig::new("t1", "u1", "c", "weak");
        config.auto_accept_suggestions = true;
        db.automations().create(&config).await.unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();

        let mut strong = config.clone();
        strong.search_query = "strong".to_string();
        let run = db.run_logs().start_run(&strong, t0).await.unwrap().unwrap();
        db.run_logs().finish_run(&run.id, counts(10, 6), t0).await.unwrap();

        let flags = controller(&db).after_run(&config.id, t0).await.unwrap();
        assert!(flags.query_updated);
        let stored = db.automations().get(&config.id).await.unwrap().unwrap();
        assert_eq!(stored.search_query, "strong");
        assert_eq!(stored.suggestion_accepted_at, Some(t0));
        assert!(!stored.has_pending_suggestion());
    }

    #[tokio::test]
    async fn test_empty_run_limit_disables() {
        let (db, _dir) = setup_test_db().await;
        let mut config = AutomationConfig::new("t1", "u1", "c", "q");
        config.empty_run_limit = 2;
        db.automations().create(&config).await.unwrap();
        let ctl = controller(&db);
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();

        finished_run(&db, &config, t0, counts(0, 0)).await;
        ctl.after_run(&config.id, t0).await.unwrap();
        assert!(db.automations().get(&config.id).await.unwrap().unwrap().enabled);

        let t1 = t0 + Duration::hours(1);
        finished_run(&db, &config, t1, counts(0, 0)).await;
        ctl.after_run(&config.id, t1).await.unwrap();
        let stored = db.automations().get(&config.id).await.unwrap().unwrap();
        assert!(!stored.enabled);
        assert_eq!(stored.consecutive_zero_runs, 2);
    }

    #[tokio::test]
    async fn test_reenabled_config_gets_a_fresh_empty_run_budget() {
        let (db, _dir) = setup_test_db().await;
        let mut config = AutomationConfig::new("t1", "u1", "c", "q");
        config.empty_run_limit = 2;
        db.automations().create(&config).await.unwrap();
        let ctl = controller(&db);
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();

        for hour in 0..2 {
            let at = t0 + Duration::hours(hour);
            finished_run(&db, &config, at, counts(0, 0)).await;
            ctl.after_run(&config.id, at).await.unwrap();
        }
        assert!(!db.automations().get(&config.id).await.unwrap().unwrap().enabled);

        db.automations().set_enabled(&config.id, true).await.unwrap();
        let stored = db.automations().get(&config.id).await.unwrap().unwrap();
        assert_eq!(stored.consecutive_zero_runs, 0);

        let t2 = t0 + Duration::hours(2);
        finished_run(&db, &config, t2, counts(0, 0)).await;
        ctl.after_run(&config.id, t2).await.unwrap();
        let stored = db.automations().get(&config.id).await.unwrap().unwrap();
        assert!(stored.enabled);
        assert_eq!(stored.consecutive_zero_runs, 1);
    }

    #[tokio::test]
    async fn test_compilation_is_reversible_without_disable() {
        let (db, _dir) = setup_test_db().await;
        let mut config = AutomationConfig::new("t1", "u1", "c", "q");
        config.compilation_target = 2;
        db.automations().create(&config).await.unwrap();
        let ctl = controller(&db);
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();

        let first = pending_proposal(&db, &config).await;
        pending_proposal(&db, &config).await;
        let state = ctl.refresh_compilation(&config, now).await.unwrap();
        assert_eq!(state, CompilationState { compiled: true, pending: 2 });

        let stored = db.automations().get(&config.id).await.unwrap().unwrap();
        assert_eq!(stored.compiled_at, Some(now));
        assert!(stored.enabled);

        db.proposals()
            .review(&first.id, ProposalStatus::Approved, "r", now)
            .await
            .unwrap();
        let state = ctl.refresh_compilation_for(&config.id, now).await.unwrap().unwrap();
        assert!(!state.compiled);
        let stored = db.automations().get(&config.id).await.unwrap().unwrap();
        assert_eq!(stored.compiled_at, None);
        assert!(stored.enabled);
    }

    #[tokio::test]
    async fn test_compilation_with_disable_pauses() {
        let (db, _dir) = setup_test_db().await;
        let mut config = AutomationConfig::new("t1", "u1", "c", "q");
        config.compilation_target = 1;
        config.disable_on_compiled = true;
        db.automations().create(&config).await.unwrap();
        pending_proposal(&db, &config).await;

        let now = Utc::now();
        assert!(controller(&db).refresh_compilation(&config, now).await.unwrap().compiled);
        let stored = db.automations().get(&config.id).await.unwrap().unwrap();
        assert!(!stored.enabled);
        assert!(stored.compiled_at.is_some());
    }
}
