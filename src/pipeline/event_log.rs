//! Event log: append-only record of each email's contribution to a thread.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::pipeline::types::{
    ApplicationEvent, ApplicationThread, ExtractionCandidate, RawEmail, Status,
};
use crate::store::{ThreadCommit, ThreadStore};

pub struct EventLog {
    store: Arc<dyn ThreadStore>,
}

impl EventLog {
    pub fn new(store: Arc<dyn ThreadStore>) -> Self {
        Self { store }
    }

    /// Build the event for `email` on `thread_id`. Timestamped with the email's arrival.
    ///
    /// `old_status` is the thread's status before this email, `None` for a new thread.
    pub fn record(
        thread_id: Uuid,
        old_status: Option<Status>,
        candidate: &ExtractionCandidate,
        email: &RawEmail,
    ) -> ApplicationEvent {
        ApplicationEvent {
            event_id: Uuid::new_v4(),
            thread_id,
            raw_email_id: email.id.clone(),
            old_status,
            status_at_event: candidate.status,
            summary: candidate.summary.clone(),
            extraction_source: candidate.confidence_source,
            email_subject: email.subject.clone(),
            created_at: email.received_at,
        }
    }

    /// Append an event and write `thread` in the same transaction.
    ///
    /// `thread` must already carry the state the event implies.
    pub async fn append(
        &self,
        thread: ApplicationThread,
        is_new: bool,
        old_status: Option<Status>,
        candidate: &ExtractionCandidate,
        email: &RawEmail,
    ) -> Result<ApplicationEvent, DatabaseError> {
        let event = Self::record(thread.thread_id, old_status, candidate, email);
        let commit = ThreadCommit {
            thread,
            is_new,
            event,
        };
        self.store.commit_event(&commit).await?;

        info!(
            email_id = %email.id,
            thread_id = %commit.thread.thread_id,
            event_id = %commit.event.event_id,
            is_new,
            old_status = ?commit.event.old_status,
            status = %commit.event.status_at_event,
            source = %commit.event.extraction_source,
            "Event appended"
        );
        Ok(commit.event)
    }
}
