//! End-to-end tests for the email → thread pipeline.
//!
//! Each test wires scripted providers into a real `ApplicationProcessor`
//! backed by an in-memory libSQL database.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use job_tracker::config::TrackerConfig;
use job_tracker::error::{PipelineError, ProviderError, ProviderErrorKind};
use job_tracker::llm::Provider;
use job_tracker::pipeline::{
    ApplicationProcessor, ConfidenceSource, DeduplicationResolver, ProcessOutcome,
    ProviderChain, RawEmail, Status,
};
use job_tracker::store::{LibSqlBackend, ThreadStore};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

enum Behavior {
    Reply(&'static str),
    Fail(ProviderErrorKind),
    /// Reply normally, but panic when the prompt mentions the marker.
    PanicOn(&'static str, &'static str),
}

struct ScriptedProvider {
    name: &'static str,
    behavior: Behavior,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        prompt: &str,
        _schema_hint: &str,
        _timeout: Duration,
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Yield so concurrent emails interleave.
        tokio::task::yield_now().await;
        match &self.behavior {
            Behavior::Reply(text) => Ok(text.to_string()),
            Behavior::Fail(kind) => Err(ProviderError::new(self.name, *kind, "scripted failure")),
            Behavior::PanicOn(marker, text) => {
                if prompt.contains(marker) {
                    panic!("provider blew up on {marker}");
                }
                Ok(text.to_string())
            }
        }
    }
}

const ACME_BACKEND: &str = r#"Here is the data:
```json
{"company_name": "Acme", "position": "Backend Engineer", "status": "applied",
 "summary": "Application for Backend Engineer received.", "next_step": null}
```"#;

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, 9, 0, 0).unwrap()
}

fn email(id: &str, sender: &str, subject: &str, body: &str, day: u32) -> RawEmail {
    RawEmail {
        id: id.into(),
        sender: sender.into(),
        subject: subject.into(),
        body_text: body.into(),
        received_at: at(day),
    }
}

async fn build(
    providers: Vec<Arc<ScriptedProvider>>,
) -> (Arc<ApplicationProcessor>, Arc<LibSqlBackend>) {
    let config = TrackerConfig::default();
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());

    let mut chain = ProviderChain::from_config(&config).unwrap();
    for provider in providers {
        chain = chain.with_provider(provider, Duration::from_secs(2));
    }

    let processor = ApplicationProcessor::new(
        chain,
        DeduplicationResolver::from_config(&config.dedup),
        store.clone(),
        &config.pipeline,
    );
    (Arc::new(processor), store)
}

#[tokio::test]
async fn failover_reaches_later_provider_and_records_ai_event() {
    tokio::time::timeout(TEST_TIMEOUT, async {
        let quota = ScriptedProvider::new("hosted", Behavior::Fail(ProviderErrorKind::Quota));
        let garbage = ScriptedProvider::new("local", Behavior::Reply("I cannot help with that."));
        let good = ScriptedProvider::new("backup", Behavior::Reply(ACME_BACKEND));
        let (processor, store) =
            build(vec![quota.clone(), garbage.clone(), good.clone()]).await;

        let outcome = processor
            .process(&email(
                "m1",
                "Acme Careers <jobs@acme.com>",
                "Your application",
                "Thank you for applying.",
                1,
            ))
            .await
            .unwrap();

        let ProcessOutcome::Recorded { thread_id, is_new, source, status, .. } = outcome else {
            panic!("expected a recorded event, got {outcome:?}");
        };
        assert!(is_new);
        assert_eq!(source, ConfidenceSource::Ai);
        assert_eq!(status, Status::Applied);
        assert_eq!((quota.calls(), garbage.calls(), good.calls()), (1, 1, 1));

        let thread = store.get_thread(thread_id).await.unwrap().unwrap();
        assert_eq!(thread.company_name, "Acme");
        assert_eq!(thread.position.as_deref(), Some("Backend Engineer"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn all_providers_failing_falls_back_to_heuristic() {
    tokio::time::timeout(TEST_TIMEOUT, async {
        let (processor, store) = build(vec![
            ScriptedProvider::new("a", Behavior::Fail(ProviderErrorKind::Unavailable)),
            ScriptedProvider::new("b", Behavior::Fail(ProviderErrorKind::Alloc)),
        ])
        .await;

        let outcome = processor
            .process(&email(
                "m1",
                "jobs@globex.com",
                "Re: Interview invitation",
                "We would like to schedule a time for an interview.",
                1,
            ))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            ProcessOutcome::Recorded {
                source: ConfidenceSource::Heuristic,
                status: Status::Interview,
                had_defaults: true,
                ..
            }
        ));
        let threads = store.list_threads("globex").await.unwrap();
        assert_eq!(threads.len(), 1);
        let events = store.list_events(threads[0].thread_id).await.unwrap();
        assert_eq!(events[0].extraction_source, ConfidenceSource::Heuristic);
        assert_eq!(events[0].summary, "Interview or meeting related: Interview invitation");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn platform_company_is_corrected_and_status_upgraded() {
    tokio::time::timeout(TEST_TIMEOUT, async {
        let reply = r#"{"company_name": "Workday", "position": "Data Analyst", "status": "APPLIED", "summary": "Update."}"#;
        let (processor, store) = build(vec![ScriptedProvider::new("p", Behavior::Reply(reply))]).await;

        let outcome = processor
            .process(&email(
                "m1",
                "Workday <noreply@myworkdayjobs.com>",
                "Next steps",
                "We would like to invite you to an interview.\n\nBest regards,\nJane Doe, Initech Recruiting",
                1,
            ))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            ProcessOutcome::Recorded { status: Status::Interview, source: ConfidenceSource::Ai, .. }
        ));
        assert_eq!(store.list_threads("Initech").await.unwrap().len(), 1);
        assert!(store.list_threads("Workday").await.unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn concurrent_emails_for_same_application_share_one_thread() {
    tokio::time::timeout(TEST_TIMEOUT, async {
        let (processor, store) =
            build(vec![ScriptedProvider::new("p", Behavior::Reply(ACME_BACKEND))]).await;

        let emails: Vec<RawEmail> = (1..=8)
            .map(|i| {
                email(
                    &format!("m{i}"),
                    "jobs@acme.com",
                    "Application update",
                    "Thanks",
                    i,
                )
            })
            .collect();

        let report = processor.process_batch(emails).await;
        assert_eq!(report.failed(), 0);
        assert_eq!(report.recorded(), 8);
        assert_eq!(report.new_threads(), 1);

        let threads = store.list_all_threads().await.unwrap();
        assert_eq!(threads.len(), 1);
        let events = store.list_events(threads[0].thread_id).await.unwrap();
        assert_eq!(events.len(), 8);
        assert_eq!(threads[0].updated_at, at(8));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn panicking_email_is_isolated_and_queued_for_review() {
    tokio::time::timeout(TEST_TIMEOUT, async {
        let (processor, store) = build(vec![ScriptedProvider::new(
            "p",
            Behavior::PanicOn("boom", ACME_BACKEND),
        )])
        .await;

        let report = processor
            .process_batch(vec![
                email("m1", "jobs@acme.com", "Application received", "", 1),
                email("m2", "jobs@acme.com", "boom", "", 2),
                email("m3", "jobs@acme.com", "Application received", "", 3),
            ])
            .await;

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.recorded(), 2);
        assert_eq!(report.failed(), 1);
        assert!(matches!(
            &report.results[1].outcome,
            Err(PipelineError::Panicked { email_id, .. }) if email_id == "m2"
        ));

        let queue = store.list_review_queue().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].email_id, "m2");
        assert!(!store.has_event_for_email("m2").await.unwrap());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn distant_emails_start_separate_threads() {
    tokio::time::timeout(TEST_TIMEOUT, async {
        let (processor, store) =
            build(vec![ScriptedProvider::new("p", Behavior::Reply(ACME_BACKEND))]).await;

        let first = email("m1", "jobs@acme.com", "Application received", "", 1);
        let mut much_later = email("m2", "jobs@acme.com", "Application received", "", 1);
        much_later.received_at = at(1) + chrono::Duration::days(400);

        processor.process(&first).await.unwrap();
        let outcome = processor.process(&much_later).await.unwrap();

        assert!(matches!(outcome, ProcessOutcome::Recorded { is_new: true, .. }));
        assert_eq!(store.list_threads("acme").await.unwrap().len(), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn merged_duplicate_keeps_full_timeline() {
    tokio::time::timeout(TEST_TIMEOUT, async {
        let (processor, store) =
            build(vec![ScriptedProvider::new("p", Behavior::Reply(ACME_BACKEND))]).await;

        let first = email("m1", "jobs@acme.com", "Application received", "", 1);
        let mut much_later = email("m2", "jobs@acme.com", "Application received", "", 1);
        much_later.received_at = at(1) + chrono::Duration::days(400);
        processor.process(&first).await.unwrap();
        processor.process(&much_later).await.unwrap();

        let threads = store.list_threads("acme").await.unwrap();
        assert_eq!(threads.len(), 2);
        let (newer, older) = (&threads[0], &threads[1]);

        let merged = store
            .merge_threads(older.thread_id, newer.thread_id)
            .await
            .unwrap();
        assert_eq!(merged.created_at, at(1));
        assert_eq!(merged.updated_at, much_later.received_at);

        let remaining = store.list_threads("acme").await.unwrap();
        assert_eq!(remaining.len(), 1);
        let events = store.list_events(merged.thread_id).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].raw_email_id, "m1");
        assert_eq!(events[2].extraction_source, ConfidenceSource::Manual);
        assert_eq!(events[2].status_at_event, merged.current_status);
        assert!(store.has_event_for_email("m1").await.unwrap());
    })
    .await
    .expect("test timed out");
}
