//! Application processor: drives one email from raw text to a committed event.
//!
//! Flow:
//! 1. Skip rules and the already-processed check (no model calls)
//! 2. `ProviderChain::extract()` → refined candidate
//! 3. Per-company lock → list threads → `DeduplicationResolver::resolve()`
//! 4. `EventLog::append()` → thread write + event insert in one transaction
//!
//! Step 3 and 4 run under one lock per company key, so two emails for the
//! same company and position can never both start a new thread.

use std::any::Any;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{PipelineConfig, TrackerConfig};
use crate::error::{ConfigError, DatabaseError, PipelineError};
use crate::pipeline::chain::ProviderChain;
use crate::pipeline::dedup::DeduplicationResolver;
use crate::pipeline::event_log::EventLog;
use crate::pipeline::locks::KeyedLocks;
use crate::pipeline::types::{
    ApplicationThread, ConfidenceSource, ExtractionCandidate, RawEmail, Resolution, Status,
    company_key,
};
use crate::store::ThreadStore;

/// What happened to one email.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Sender is on a skip list.
    Skipped { reason: String },
    /// An event for this email id already exists.
    AlreadyProcessed,
    /// No company could be determined; queued for manual review.
    Unattributed,
    Recorded {
        thread_id: Uuid,
        event_id: Uuid,
        is_new: bool,
        status: Status,
        source: ConfidenceSource,
        /// Lower-confidence signal for whoever renders the result.
        had_defaults: bool,
    },
}

impl ProcessOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped { .. } => "skipped",
            Self::AlreadyProcessed => "already_processed",
            Self::Unattributed => "unattributed",
            Self::Recorded { is_new: true, .. } => "new_thread",
            Self::Recorded { is_new: false, .. } => "thread_update",
        }
    }
}

/// Per-email result inside a batch.
#[derive(Debug)]
pub struct EmailResult {
    pub email_id: String,
    pub outcome: Result<ProcessOutcome, PipelineError>,
}

/// Outcome of `process_batch`, in input order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<EmailResult>,
}

impl BatchReport {
    fn count(&self, predicate: impl Fn(&ProcessOutcome) -> bool) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome.as_ref().is_ok_and(&predicate))
            .count()
    }

    pub fn recorded(&self) -> usize {
        self.count(|o| matches!(o, ProcessOutcome::Recorded { .. }))
    }

    pub fn new_threads(&self) -> usize {
        self.count(|o| matches!(o, ProcessOutcome::Recorded { is_new: true, .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                ProcessOutcome::Skipped { .. } | ProcessOutcome::AlreadyProcessed
            )
        })
    }

    pub fn unattributed(&self) -> usize {
        self.count(|o| matches!(o, ProcessOutcome::Unattributed))
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_err()).count()
    }
}

pub struct ApplicationProcessor {
    chain: ProviderChain,
    resolver: DeduplicationResolver,
    store: Arc<dyn ThreadStore>,
    events: EventLog,
    locks: KeyedLocks,
    skip_domains: Vec<String>,
    skip_senders: Vec<String>,
    max_concurrency: usize,
}

impl ApplicationProcessor {
    pub fn new(
        chain: ProviderChain,
        resolver: DeduplicationResolver,
        store: Arc<dyn ThreadStore>,
        pipeline: &PipelineConfig,
    ) -> Self {
        let lower = |items: &[String]| -> Vec<String> {
            items.iter().map(|s| s.trim().to_lowercase()).collect()
        };
        Self {
            chain,
            resolver,
            events: EventLog::new(Arc::clone(&store)),
            store,
            locks: KeyedLocks::new(),
            skip_domains: lower(&pipeline.skip_domains),
            skip_senders: lower(&pipeline.skip_senders),
            max_concurrency: pipeline.max_concurrency.max(1),
        }
    }

    pub fn from_config(
        config: &TrackerConfig,
        store: Arc<dyn ThreadStore>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            ProviderChain::from_config(config)?,
            DeduplicationResolver::from_config(&config.dedup),
            store,
            &config.pipeline,
        ))
    }

    fn skip_reason(&self, email: &RawEmail) -> Option<String> {
        let address = email.sender_address();
        if self.skip_senders.contains(&address) {
            return Some(format!("sender {address} is skipped"));
        }
        let domain = email.sender_domain()?;
        self.skip_domains
            .iter()
            .find(|d| domain == **d || domain.ends_with(&format!(".{d}")))
            .map(|d| format!("domain {d} is skipped"))
    }

    /// Process one email through extraction, deduplication and the event log.
    pub async fn process(&self, email: &RawEmail) -> Result<ProcessOutcome, PipelineError> {
        info!(
            email_id = %email.id,
            sender = %email.sender,
            subject = %email.subject,
            "Processing email"
        );

        if let Some(reason) = self.skip_reason(email) {
            info!(email_id = %email.id, reason = %reason, "Email skipped");
            return Ok(ProcessOutcome::Skipped { reason });
        }
        if self.store.has_event_for_email(&email.id).await? {
            info!(email_id = %email.id, "Email already processed");
            return Ok(ProcessOutcome::AlreadyProcessed);
        }

        let candidate = self.chain.extract(email).await;
        let Some(company) = candidate
            .company_name
            .clone()
            .filter(|c| !c.trim().is_empty())
        else {
            warn!(email_id = %email.id, "No company resolved, queueing for review");
            self.store
                .flag_for_review(&email.id, "company unresolved")
                .await?;
            return Ok(ProcessOutcome::Unattributed);
        };

        let _guard = self.locks.lock(&company_key(&company)).await;

        // A duplicate delivery may have been committed while we were extracting.
        if self.store.has_event_for_email(&email.id).await? {
            return Ok(ProcessOutcome::AlreadyProcessed);
        }

        let threads = self.store.list_threads(&company).await?;
        let resolution = self.resolver.resolve(&candidate, email, &threads);
        let old_status = threads
            .iter()
            .find(|t| t.thread_id == resolution.thread_id)
            .map(|t| t.current_status);
        let thread = next_thread_state(&resolution, &threads, &company, &candidate, email)?;

        let event = self
            .events
            .append(thread, resolution.is_new, old_status, &candidate, email)
            .await?;

        Ok(ProcessOutcome::Recorded {
            thread_id: event.thread_id,
            event_id: event.event_id,
            is_new: resolution.is_new,
            status: candidate.status,
            source: candidate.confidence_source,
            had_defaults: candidate.had_defaults,
        })
    }

    /// Process emails concurrently. One email's failure never aborts the others.
    ///
    /// Failed emails (store errors, panics) are logged and queued for review.
    pub async fn process_batch(self: &Arc<Self>, emails: Vec<RawEmail>) -> BatchReport {
        let count = emails.len();
        info!(count, concurrency = self.max_concurrency, "Processing email batch");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let handles: Vec<_> = emails
            .into_iter()
            .map(|email| {
                let email_id = email.id.clone();
                let processor = Arc::clone(self);
                let semaphore = Arc::clone(&semaphore);
                let handle = tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.map_err(|e| {
                        PipelineError::Join {
                            email_id: email.id.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                    processor.process(&email).await
                });
                (email_id, handle)
            })
            .collect();

        let mut report = BatchReport::default();
        for (email_id, handle) in handles {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(PipelineError::Panicked {
                    email_id: email_id.clone(),
                    message: panic_message(e.into_panic()),
                }),
                Err(e) => Err(PipelineError::Join {
                    email_id: email_id.clone(),
                    reason: e.to_string(),
                }),
            };

            if let Err(ref e) = outcome {
                error!(email_id = %email_id, error = %e, "Failed to process email in batch");
                if let Err(flag_err) = self.store.flag_for_review(&email_id, &e.to_string()).await {
                    warn!(email_id = %email_id, error = %flag_err, "Could not queue email for review");
                }
            }
            report.results.push(EmailResult { email_id, outcome });
        }

        info!(
            total = count,
            recorded = report.recorded(),
            new_threads = report.new_threads(),
            skipped = report.skipped(),
            unattributed = report.unattributed(),
            failed = report.failed(),
            "Batch processing complete"
        );
        report
    }
}

/// Thread row after applying this email.
///
/// An existing thread only moves its status and `updated_at` forward when
/// the email is not older than the thread's latest event, so the thread
/// keeps mirroring its most recent event. A rejection closes the thread.
/// An unknown position is filled in.
fn next_thread_state(
    resolution: &Resolution,
    threads: &[ApplicationThread],
    company: &str,
    candidate: &ExtractionCandidate,
    email: &RawEmail,
) -> Result<ApplicationThread, DatabaseError> {
    if resolution.is_new {
        return Ok(ApplicationThread {
            thread_id: resolution.thread_id,
            company_name: company.to_string(),
            position: candidate.position.clone(),
            current_status: candidate.status,
            is_active: ApplicationThread::is_open_after(candidate.status),
            created_at: email.received_at,
            updated_at: email.received_at,
        });
    }

    let mut thread = threads
        .iter()
        .find(|t| t.thread_id == resolution.thread_id)
        .cloned()
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "application_thread".to_string(),
            id: resolution.thread_id.to_string(),
        })?;

    if email.received_at >= thread.updated_at {
        thread.current_status = candidate.status;
        thread.is_active = ApplicationThread::is_open_after(candidate.status);
        thread.updated_at = email.received_at;
    }
    if thread.position.is_none() {
        thread.position = candidate.position.clone();
    }
    Ok(thread)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
