//! `ThreadStore` trait: the pipeline's single async persistence interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::pipeline::types::{ApplicationEvent, ApplicationThread};

/// One atomic write: the thread's new state plus the event that produced it.
#[derive(Debug, Clone)]
pub struct ThreadCommit {
    /// Full thread row after applying the event.
    pub thread: ApplicationThread,
    /// Insert the thread instead of updating it.
    pub is_new: bool,
    pub event: ApplicationEvent,
}

/// An email that needs a human to look at it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewItem {
    pub email_id: String,
    pub reason: String,
    pub flagged_at: DateTime<Utc>,
}

#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Apply pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Threads ─────────────────────────────────────────────────────

    /// Threads of one company (case-insensitive), most recently updated first.
    async fn list_threads(&self, company_name: &str)
    -> Result<Vec<ApplicationThread>, DatabaseError>;

    async fn get_thread(&self, thread_id: Uuid) -> Result<Option<ApplicationThread>, DatabaseError>;

    /// Every thread, most recently updated first.
    async fn list_all_threads(&self) -> Result<Vec<ApplicationThread>, DatabaseError>;

    // ── Events ──────────────────────────────────────────────────────

    /// A thread's timeline, oldest first.
    async fn list_events(&self, thread_id: Uuid) -> Result<Vec<ApplicationEvent>, DatabaseError>;

    async fn has_event_for_email(&self, raw_email_id: &str) -> Result<bool, DatabaseError>;

    /// Write the thread and its event in one transaction. Both land or neither does.
    async fn commit_event(&self, commit: &ThreadCommit) -> Result<(), DatabaseError>;

    /// Fold `source` into `target` in one transaction and return the merged target.
    ///
    /// Moves every event, appends a `MANUAL` merge event, then deletes `source`.
    /// Fails with `NotFound` for an unknown id and `Constraint` when both ids match.
    async fn merge_threads(
        &self,
        source_id: Uuid,
        target_id: Uuid,
    ) -> Result<ApplicationThread, DatabaseError>;

    // ── Manual review ───────────────────────────────────────────────

    /// Queue an email for manual review. Re-flagging replaces the reason.
    async fn flag_for_review(&self, email_id: &str, reason: &str) -> Result<(), DatabaseError>;

    /// Review queue, oldest first.
    async fn list_review_queue(&self) -> Result<Vec<ReviewItem>, DatabaseError>;
}
