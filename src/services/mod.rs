//! Engine services: scheduling, execution, adaptation, digests and review.
//!
//! Services share no in-memory state; the database is the only
//! coordination point, so any number of them may run in one process or
//! across replicas.

pub mod analytics;
pub mod controller;
pub mod dedup;
pub mod digest;
pub mod error;
pub mod executor;
pub mod recovery;
pub mod review;
pub mod scheduler;
pub mod suggest;

use std::sync::Arc;
use std::time::Duration;

pub use analytics::{QueryStats, RunAnalytics};
pub use controller::{CompilationState, Controller};
pub use digest::{
    DigestContent, DigestRenderer, DigestReport, DigestService, PlainTextRenderer,
    SummarizingRenderer,
};
pub use error::{DigestError, ExecutionError, ReviewError};
pub use executor::{Executor, RunOutcome};
pub use recovery::recover_interrupted_runs;
pub use review::ReviewService;
pub use scheduler::{Scheduler, TickReport};
pub use suggest::{DeterministicSuggester, LlmSuggester, Suggester};

use crate::config::{DigestSettings, SchedulerSettings};
use crate::llm::TextGenerator;
use crate::mail::Mailer;
use crate::repository::DbContext;
use crate::search::LeadSearch;

/// External systems the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub search: Arc<dyn LeadSearch>,
    /// Optional enhancement; every LLM use has a deterministic fallback.
    pub generator: Option<Arc<dyn TextGenerator>>,
    pub mailer: Arc<dyn Mailer>,
}

/// All services wired to one database.
#[derive(Clone)]
pub struct Engine {
    db: DbContext,
    executor: Arc<Executor>,
    scheduler: Arc<Scheduler>,
    digests: Arc<DigestService>,
    review: Arc<ReviewService>,
}

impl Engine {
    pub fn new(
        db: DbContext,
        collaborators: Collaborators,
        scheduler: &SchedulerSettings,
        digest: &DigestSettings,
    ) -> Self {
        let llm_timeout = Duration::from_secs(scheduler.llm_timeout_secs);

        let suggester: Arc<dyn Suggester> = match &collaborators.generator {
            Some(generator) => Arc::new(LlmSuggester::new(generator.clone(), llm_timeout)),
            None => Arc::new(DeterministicSuggester),
        };
        let renderer: Arc<dyn DigestRenderer> = match &collaborators.generator {
            Some(generator) => Arc::new(SummarizingRenderer::new(generator.clone(), llm_timeout)),
            None => Arc::new(PlainTextRenderer),
        };

        let controller = Arc::new(Controller::new(
            db.clone(),
            suggester,
            scheduler.history_window,
        ));
        let executor = Arc::new(Executor::new(
            db.clone(),
            collaborators.search,
            controller.clone(),
            Duration::from_secs(scheduler.search_timeout_secs),
        ));

        Self {
            scheduler: Arc::new(Scheduler::new(
                db.clone(),
                executor.clone(),
                scheduler.max_concurrent_runs,
                scheduler.claim_batch_size,
            )),
            digests: Arc::new(DigestService::new(
                db.clone(),
                renderer,
                collaborators.mailer,
                digest.send_window_minutes,
                digest.first_lookback_hours,
            )),
            review: Arc::new(ReviewService::new(db.clone(), controller)),
            executor,
            db,
        }
    }

    pub fn db(&self) -> &DbContext {
        &self.db
    }

    pub fn executor(&self) -> Arc<Executor> {
        self.executor.clone()
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    pub fn digests(&self) -> Arc<DigestService> {
        self.digests.clone()
    }

    pub fn review(&self) -> Arc<ReviewService> {
        self.review.clone()
    }
}
