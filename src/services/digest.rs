//! Daily digest emails summarizing proposal activity per config.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::error::DigestError;
use crate::llm::{CompletionRequest, TextGenerator};
use crate::models::{AutomationConfig, Proposal, ProposalStatus};
use crate::repository::DbContext;

/// Default tolerance around the configured send time.
pub const DEFAULT_SEND_WINDOW_MINUTES: i64 = 30;
/// Lookback for a config's very first digest.
pub const DEFAULT_FIRST_LOOKBACK_HOURS: i64 = 24;

/// Proposals gathered for one digest, grouped by status.
#[derive(Debug, Clone)]
pub struct DigestContent {
    pub config_name: String,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    /// Non-empty groups in lifecycle order.
    pub groups: Vec<(ProposalStatus, Vec<Proposal>)>,
}

impl DigestContent {
    pub fn new(
        config: &AutomationConfig,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        proposals: Vec<Proposal>,
    ) -> Self {
        let groups = ProposalStatus::ALL
            .iter()
            .map(|status| {
                let members: Vec<Proposal> = proposals
                    .iter()
                    .filter(|p| p.status == *status)
                    .cloned()
                    .collect();
                (*status, members)
            })
            .filter(|(_, members)| !members.is_empty())
            .collect();
        Self {
            config_name: config.name.clone(),
            since,
            until,
            groups,
        }
    }

    pub fn total(&self) -> usize {
        self.groups.iter().map(|(_, members)| members.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn count(&self, status: ProposalStatus) -> usize {
        self.groups
            .iter()
            .find(|(s, _)| *s == status)
            .map_or(0, |(_, members)| members.len())
    }
}

/// Turns digest content into an email body.
#[async_trait]
pub trait DigestRenderer: Send + Sync {
    async fn render(&self, config: &AutomationConfig, content: &DigestContent) -> String;
}

/// Deterministic plain-text digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextRenderer;

impl PlainTextRenderer {
    pub fn render_text(content: &DigestContent) -> String {
        let mut out = format!(
            "Daily digest for {}\n{} to {}\n\n{} new proposal{}:",
            content.config_name,
            content.since.format("%Y-%m-%d %H:%M UTC"),
            content.until.format("%Y-%m-%d %H:%M UTC"),
            content.total(),
            if content.total() == 1 { "" } else { "s" },
        );
        for (status, members) in &content.groups {
            out.push_str(&format!(" {} {},", members.len(), status));
        }
        out.pop();
        out.push('\n');

        for (status, members) in &content.groups {
            out.push_str(&format!("\n{} ({})\n", status.as_str().to_uppercase(), members.len()));
            for p in members {
                out.push_str(&format!("  - {}\n", describe(p)));
            }
        }
        out
    }
}

fn describe(p: &Proposal) -> String {
    let field = |key: &str| p.payload.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty());
    let mut line = field("title")
        .or_else(|| field("name"))
        .unwrap_or(p.entity_type.as_str())
        .to_string();
    if let Some(account) = field("account") {
        line.push_str(&format!(" ({})", account));
    }
    if let Some(url) = field("url") {
        line.push_str(&format!(" <{}>", url));
    }
    if let Some(err) = &p.error_message {
        line.push_str(&format!(" [error: {}]", err));
    }
    line
}

#[async_trait]
impl DigestRenderer for PlainTextRenderer {
    async fn render(&self, _config: &AutomationConfig, content: &DigestContent) -> String {
        Self::render_text(content)
    }
}

const SUMMARY_SYSTEM: &str = "You write short, friendly daily email digests for a sales team. \
Summarize the lead proposals below in a few sentences, then keep the full list. \
Do not invent leads.";

/// Natural-language digest from the config's digest model, falling back to
/// plain text when no model is set or the call fails.
pub struct SummarizingRenderer {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
}

impl SummarizingRenderer {
    pub fn new(generator: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }
}

#[async_trait]
impl DigestRenderer for SummarizingRenderer {
    async fn render(&self, config: &AutomationConfig, content: &DigestContent) -> String {
        let plain = PlainTextRenderer::render_text(content);
        let Some(model) = config.digest_model.as_deref() else {
            return plain;
        };
        let request =
            CompletionRequest::new(SUMMARY_SYSTEM, &plain, self.timeout).with_model(Some(model));
        match self.generator.complete(request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(config_id = %config.id, model, "Digest summary failed, sending plain text: {}", e);
                plain
            }
        }
    }
}

/// Whether a config's digest should go out at `now`.
///
/// True when no digest was sent yet on the current local day and `now` is
/// within `window` of the local send time on that day.
pub fn digest_due(config: &AutomationConfig, now: DateTime<Utc>, window: chrono::Duration) -> bool {
    if !config.digest_enabled {
        return false;
    }
    let Some(offset) = FixedOffset::east_opt(config.digest_utc_offset_minutes * 60) else {
        return false;
    };
    let local_date = now.with_timezone(&offset).date_naive();

    let to_utc = |naive: NaiveDateTime| {
        offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    };
    let Some(day_start) = local_date.and_hms_opt(0, 0, 0).and_then(to_utc) else {
        return false;
    };
    if config.last_digest_at.is_some_and(|last| last >= day_start) {
        return false;
    }
    let Some(send_at) = to_utc(local_date.and_time(config.digest_time)) else {
        return false;
    };
    (now - send_at).abs() <= window
}

/// What one digest pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DigestReport {
    pub due: usize,
    pub sent: usize,
    pub empty: usize,
    pub failed_recipients: usize,
}

pub struct DigestService {
    db: DbContext,
    renderer: Arc<dyn DigestRenderer>,
    mailer: Arc<dyn crate::mail::Mailer>,
    send_window: chrono::Duration,
    first_lookback: chrono::Duration,
}

impl DigestService {
    pub fn new(
        db: DbContext,
        renderer: Arc<dyn DigestRenderer>,
        mailer: Arc<dyn crate::mail::Mailer>,
        send_window_minutes: i64,
        first_lookback_hours: i64,
    ) -> Self {
        Self {
            db,
            renderer,
            mailer,
            send_window: chrono::Duration::minutes(send_window_minutes.max(0)),
            first_lookback: chrono::Duration::hours(first_lookback_hours.max(1)),
        }
    }

    /// Send every digest that is due at `now`. At most once per config per
    /// local day.
    pub async fn send_daily_digests(&self, now: DateTime<Utc>) -> Result<DigestReport, DigestError> {
        let configs = self.db.automations().list_digest_enabled().await?;
        let mut report = DigestReport::default();

        for config in configs.iter().filter(|c| digest_due(c, now, self.send_window)) {
            report.due += 1;
            match self.send_one(config, now).await {
                Ok(DigestDelivery::Empty) => report.empty += 1,
                Ok(DigestDelivery::Sent { failed }) => {
                    report.sent += 1;
                    report.failed_recipients += failed;
                }
                Err(DigestError::Database(e)) => return Err(DigestError::Database(e)),
                Err(e) => warn!(config_id = %config.id, "Digest skipped: {}", e),
            }
            self.db.automations().mark_digested(&config.id, now).await?;
        }
        Ok(report)
    }

    async fn send_one(
        &self,
        config: &AutomationConfig,
        now: DateTime<Utc>,
    ) -> Result<DigestDelivery, DigestError> {
        let since = config.last_digest_at.unwrap_or(now - self.first_lookback);
        let proposals = self.db.proposals().created_since(&config.id, since).await?;
        let content = DigestContent::new(config, since, now, proposals);
        if content.is_empty() {
            debug!(config_id = %config.id, "No activity since last digest");
            return Ok(DigestDelivery::Empty);
        }
        if config.digest_recipients.is_empty() {
            return Err(DigestError::NoRecipients(config.name.clone()));
        }

        let body = self.renderer.render(config, &content).await;
        let subject = format!(
            "[prospector] {}: {} new proposal{}",
            config.name,
            content.total(),
            if content.total() == 1 { "" } else { "s" }
        );

        let mut failed = 0;
        for recipient in &config.digest_recipients {
            if let Err(e) = self.mailer.send(recipient, &subject, &body).await {
                failed += 1;
                error!(config_id = %config.id, recipient = %recipient, "Digest delivery failed: {}", e);
            }
        }
        info!(
            config_id = %config.id,
            proposals = content.total(),
            recipients = config.digest_recipients.len() - failed,
            "Digest sent"
        );
        Ok(DigestDelivery::Sent { failed })
    }

    /// Poll every `interval` until `shutdown` flips to true.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "Digest service started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.send_daily_digests(Utc::now()).await {
                        Ok(report) if report.due > 0 => info!(
                            due = report.due,
                            sent = report.sent,
                            empty = report.empty,
                            "Digest pass complete"
                        ),
                        Ok(_) => {}
                        Err(e) => error!("Digest pass failed: {}", e),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Digest service stopped");
    }
}

enum DigestDelivery {
    Empty,
    Sent { failed: usize },
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::mail::{MailError, Mailer};

    /// Mailer that records messages, failing for listed recipients.
    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<(String, String, String)>>,
        pub reject: Vec<String>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
            if self.reject.iter().any(|r| r == to) {
                return Err(MailError::InvalidRecipient(to.to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string(), body.to_string()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::RecordingMailer;
    use super::*;
    use crate::llm::LlmError;
    use crate::models::{ProposalOperation, ProposalSource};
    use crate::repository::test_support::setup_test_db;
    use chrono::{NaiveTime, TimeZone};
    use serde_json::json;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 10, h, m, 0).unwrap()
    }

    fn digest_config(recipients: &[&str]) -> AutomationConfig {
        let mut config = AutomationConfig::new("t1", "u1", "Fintech leads", "q");
        config.digest_enabled = true;
        config.digest_time = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        config.digest_recipients = recipients.iter().map(|r| r.to_string()).collect();
        config
    }

    fn proposal(config: &AutomationConfig, title: &str) -> Proposal {
        let mut p = Proposal::new(
            &config.tenant_id,
            "automation",
            "lead",
            None,
            ProposalOperation::Create,
            json!({"title": title, "url": format!("https://{}.example", title.to_lowercase())}),
            ProposalSource::Automation,
        );
        p.automation_config_id = Some(config.id.clone());
        p
    }

    struct Failing;

    #[async_trait]
    impl TextGenerator for Failing {
        async fn complete(&self, _request: CompletionRequest) -> Result<String, LlmError> {
            Err(LlmError::Timeout(Duration::from_secs(1)))
        }
    }

    /// Generator that records its request and answers with fixed text.
    struct Summary(std::sync::Mutex<Vec<CompletionRequest>>);

    #[async_trait]
    impl TextGenerator for Summary {
        async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
            self.0.lock().unwrap().push(request);
            Ok("One promising fintech lead today: Acme.".to_string())
        }
    }

    #[test]
    fn test_digest_due_window_and_offset() {
        let window = chrono::Duration::minutes(30);
        let mut config = digest_config(&["a@x.com"]);

        assert!(digest_due(&config, at(8, 0), window));
        assert!(digest_due(&config, at(7, 30), window));
        assert!(digest_due(&config, at(8, 25), window));
        assert!(!digest_due(&config, at(8, 45), window));
        assert!(!digest_due(&config, at(7, 0), window));

        // 08:00 at UTC+2 is 06:00 UTC.
        config.digest_utc_offset_minutes = 120;
        assert!(digest_due(&config, at(6, 10), window));
        assert!(!digest_due(&config, at(8, 0), window));

        config.digest_utc_offset_minutes = 0;
        config.last_digest_at = Some(at(0, 5));
        assert!(!digest_due(&config, at(8, 0), window));
        config.last_digest_at = Some(at(0, 5) - chrono::Duration::days(1));
        assert!(digest_due(&config, at(8, 0), window));

        config.digest_enabled = false;
        assert!(!digest_due(&config, at(8, 0), window));
    }

    #[tokio::test]
    async fn test_digest_sent_once_per_day() {
        let (db, _dir) = setup_test_db().await;
        let config = digest_config(&["a@x.com", "b@x.com"]);
        db.automations().create(&config).await.unwrap();
        db.proposals()
            .create_many(&[proposal(&config, "Acme"), proposal(&config, "Globex")])
            .await
            .unwrap();
        let mailer = Arc::new(RecordingMailer::default());
        let service = DigestService::new(
            db.clone(),
            Arc::new(PlainTextRenderer),
            mailer.clone(),
            30,
            24,
        );

        let report = service.send_daily_digests(at(8, 5)).await.unwrap();
        assert_eq!(report, DigestReport { due: 1, sent: 1, empty: 0, failed_recipients: 0 });
        {
            let sent = mailer.sent.lock().unwrap();
            assert_eq!(sent.len(), 2);
            assert_eq!(sent[0].0, "a@x.com");
            assert_eq!(sent[0].1, "[prospector] Fintech leads: 2 new proposals");
            assert!(sent[0].2.contains("PENDING (2)"));
            assert!(sent[0].2.contains("Acme <https://acme.example>"));
        }

        let again = service.send_daily_digests(at(8, 20)).await.unwrap();
        assert_eq!(again, DigestReport::default());
        assert_eq!(mailer.sent.lock().unwrap().len(), 2);

        let stored = db.automations().get(&config.id).await.unwrap().unwrap();
        assert_eq!(stored.last_digest_at, Some(at(8, 5)));
    }

    #[tokio::test]
    async fn test_quiet_day_is_marked_without_sending() {
        let (db, _dir) = setup_test_db().await;
        let config = digest_config(&["a@x.com"]);
        db.automations().create(&config).await.unwrap();
        let mailer = Arc::new(RecordingMailer::default());
        let service =
            DigestService::new(db.clone(), Arc::new(PlainTextRenderer), mailer.clone(), 30, 24);

        let report = service.send_daily_digests(at(8, 0)).await.unwrap();
        assert_eq!(report.empty, 1);
        assert!(mailer.sent.lock().unwrap().is_empty());
        let stored = db.automations().get(&config.id).await.unwrap().unwrap();
        assert_eq!(stored.last_digest_at, Some(at(8, 0)));
    }

    #[tokio::test]
    async fn test_recipient_failure_does_not_block_others() {
        let (db, _dir) = setup_test_db().await;
        let config = digest_config(&["bad@x.com", "good@x.com"]);
        db.automations().create(&config).await.unwrap();
        db.proposals().create(&proposal(&config, "Acme")).await.unwrap();
        let mailer = Arc::new(RecordingMailer {
            reject: vec!["bad@x.com".to_string()],
            ..Default::default()
        });
        let service =
            DigestService::new(db.clone(), Arc::new(PlainTextRenderer), mailer.clone(), 30, 24);

        let report = service.send_daily_digests(at(8, 0)).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed_recipients, 1);
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "good@x.com");
        assert_eq!(sent[0].1, "[prospector] Fintech leads: 1 new proposal");
        drop(sent);
        assert!(db.automations().get(&config.id).await.unwrap().unwrap().last_digest_at.is_some());
    }

    #[tokio::test]
    async fn test_summarizer_falls_back_to_plain_text() {
        let mut config = digest_config(&["a@x.com"]);
        let content = DigestContent::new(&config, at(0, 0), at(8, 0), vec![proposal(&config, "Acme")]);
        let renderer = SummarizingRenderer::new(Arc::new(Failing), Duration::from_secs(1));

        let plain = PlainTextRenderer::render_text(&content);
        assert_eq!(renderer.render(&config, &content).await, plain);

        config.digest_model = Some("llama3".to_string());
        assert_eq!(renderer.render(&config, &content).await, plain);
        assert!(plain.starts_with("Daily digest for Fintech leads"));
        assert!(plain.contains("1 new proposal: 1 pending\n"));
    }

    #[tokio::test]
    async fn test_summarizer_uses_generated_text() {
        let mut config = digest_config(&["a@x.com"]);
        config.digest_model = Some("llama3".to_string());
        let content = DigestContent::new(&config, at(0, 0), at(8, 0), vec![proposal(&config, "Acme")]);
        let generator = Arc::new(Summary(std::sync::Mutex::new(Vec::new())));
        let renderer = SummarizingRenderer::new(generator.clone(), Duration::from_secs(1));

        let body = renderer.render(&config, &content).await;
        assert_eq!(body, "One promising fintech lead today: Acme.");

        let requests = generator.0.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model.as_deref(), Some("llama3"));
        assert_eq!(requests[0].user, PlainTextRenderer::render_text(&content));
    }
}
