//! Yield analytics over a window of completed runs.

use std::collections::HashMap;

use crate::models::RunLog;

/// Aggregate yield of one executed query string.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryStats {
    pub query: String,
    pub runs: usize,
    pub prospects: i64,
    pub proposals: i64,
}

impl QueryStats {
    /// Proposals per prospect. 0 when nothing was found.
    pub fn conversion_rate(&self) -> f64 {
        if self.prospects == 0 {
            0.0
        } else {
            self.proposals as f64 / self.prospects as f64
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunAnalytics {
    /// Ranked best first: proposals created, then conversion rate.
    pub queries: Vec<QueryStats>,
    pub total_runs: usize,
    pub total_prospects: i64,
    pub total_proposals: i64,
    /// Most recent runs in a row that produced no proposals.
    pub consecutive_zero_runs: i32,
}

impl RunAnalytics {
    /// Analyse `runs`, which must be ordered newest first.
    pub fn from_runs(runs: &[RunLog]) -> Self {
        let mut by_query: HashMap<&str, QueryStats> = HashMap::new();
        let mut analytics = Self {
            total_runs: runs.len(),
            ..Default::default()
        };

        for run in runs {
            let stats = by_query
                .entry(run.executed_query.as_str())
                .or_insert_with(|| QueryStats {
                    query: run.executed_query.clone(),
                    runs: 0,
                    prospects: 0,
                    proposals: 0,
                });
            stats.runs += 1;
            stats.prospects += i64::from(run.prospects_found);
            stats.proposals += i64::from(run.proposals_created);
            analytics.total_prospects += i64::from(run.prospects_found);
            analytics.total_proposals += i64::from(run.proposals_created);
        }

        analytics.consecutive_zero_runs = runs
            .iter()
            .take_while(|run| run.proposals_created == 0)
            .count()
            .try_into()
            .unwrap_or(i32::MAX);

        let mut queries: Vec<QueryStats> = by_query.into_values().collect();
        queries.sort_by(|a, b| {
            b.proposals
                .cmp(&a.proposals)
                .then_with(|| b.conversion_rate().total_cmp(&a.conversion_rate()))
                .then_with(|| a.query.cmp(&b.query))
        });
        analytics.queries = queries;
        analytics
    }

    pub fn best(&self) -> Option<&QueryStats> {
        self.queries.first().filter(|q| q.proposals > 0)
    }

    /// Over-broad queries: they found prospects but none became proposals.
    pub fn worst(&self) -> Vec<&QueryStats> {
        self.queries
            .iter()
            .filter(|q| q.prospects > 0 && q.proposals == 0)
            .collect()
    }

    pub fn stats_for(&self, query: &str) -> Option<&QueryStats> {
        self.queries.iter().find(|q| q.query == query)
    }
}

#[cfg(test)]
pub(crate) mod test_runs {
    use chrono::{Duration, TimeZone, Utc};

    use crate::models::{RunLog, RunStatus};

    /// Done runs, newest first, from `(query, prospects, proposals)` tuples.
    pub fn runs(specs: &[(&str, i32, i32)]) -> Vec<RunLog> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        specs
            .iter()
            .enumerate()
            .map(|(i, (query, prospects, proposals))| {
                let started = base - Duration::hours(i as i64);
                RunLog {
                    id: format!("run-{i}"),
                    config_id: "cfg".to_string(),
                    tenant_id: "t1".to_string(),
                    started_at: started,
                    completed_at: Some(started + Duration::minutes(1)),
                    status: RunStatus::Done,
                    prospects_found: *prospects,
                    duplicates_skipped: 0,
                    proposals_created: *proposals,
                    executed_query: query.to_string(),
                    executed_prompt: String::new(),
                    prompt_chars: 0,
                    compiled: false,
                    query_updated: false,
                    prompt_updated: false,
                    error_message: None,
                }
            })
            .collect()
    }
}
