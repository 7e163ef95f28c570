//! libSQL backend: async `ThreadStore` implementation.
//!
//! Supports local file and in-memory databases. Every statement, read or
//! write, goes through one connection guarded by a lock, so a reader never
//! observes another task's open transaction.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::pipeline::types::{ApplicationEvent, ApplicationThread, ConfidenceSource, Status, company_key};
use crate::store::migrations;
use crate::store::traits::{ReviewItem, ThreadCommit, ThreadStore};

const THREAD_COLUMNS: &str =
    "thread_id, company_name, position, current_status, is_active, created_at, updated_at";

const EVENT_COLUMNS: &str = "event_id, thread_id, raw_email_id, old_status, status_at_event, summary, extraction_source, email_subject, created_at";

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    conn_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            conn_lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_threads(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<Vec<ApplicationThread>, DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        fetch_threads(self.conn(), sql, params, op).await
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn format_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Query(format!("bad timestamp '{s}': {e}")))
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Query(format!("bad uuid '{s}': {e}")))
}

fn text(row: &libsql::Row, idx: i32) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::Query(format!("row parse (column {idx}): {e}")))
}

fn parse_status(s: &str) -> Result<Status, DatabaseError> {
    s.parse::<Status>().map_err(DatabaseError::Query)
}

fn row_to_thread(row: &libsql::Row) -> Result<ApplicationThread, DatabaseError> {
    let thread_id: String = text(row, 0)?;
    let status: String = text(row, 3)?;
    let is_active: i64 = row
        .get(4)
        .map_err(|e| DatabaseError::Query(format!("row parse (column 4): {e}")))?;
    let created_at: String = text(row, 5)?;
    let updated_at: String = text(row, 6)?;

    Ok(ApplicationThread {
        thread_id: parse_uuid(&thread_id)?,
        company_name: text(row, 1)?,
        position: row.get::<String>(2).ok(),
        current_status: parse_status(&status)?,
        is_active: is_active != 0,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn row_to_event(row: &libsql::Row) -> Result<ApplicationEvent, DatabaseError> {
    let event_id: String = text(row, 0)?;
    let thread_id: String = text(row, 1)?;
    let status: String = text(row, 4)?;
    let source: String = text(row, 6)?;
    let created_at: String = text(row, 8)?;

    Ok(ApplicationEvent {
        event_id: parse_uuid(&event_id)?,
        thread_id: parse_uuid(&thread_id)?,
        raw_email_id: text(row, 2)?,
        old_status: row
            .get::<String>(3)
            .ok()
            .map(|s| parse_status(&s))
            .transpose()?,
        status_at_event: parse_status(&status)?,
        summary: text(row, 5)?,
        extraction_source: source
            .parse::<ConfidenceSource>()
            .map_err(DatabaseError::Query)?,
        email_subject: text(row, 7)?,
        created_at: parse_ts(&created_at)?,
    })
}

async fn fetch_threads(
    conn: &Connection,
    sql: &str,
    params: impl libsql::params::IntoParams,
    op: &str,
) -> Result<Vec<ApplicationThread>, DatabaseError> {
    let mut rows = conn
        .query(sql, params)
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

    let mut threads = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
    {
        threads.push(row_to_thread(&row)?);
    }
    Ok(threads)
}

async fn fetch_thread(
    conn: &Connection,
    thread_id: Uuid,
    op: &str,
) -> Result<ApplicationThread, DatabaseError> {
    fetch_threads(
        conn,
        &format!("SELECT {THREAD_COLUMNS} FROM application_threads WHERE thread_id = ?1"),
        params![thread_id.to_string()],
        op,
    )
    .await?
    .pop()
    .ok_or_else(|| DatabaseError::NotFound {
        entity: "application_thread".to_string(),
        id: thread_id.to_string(),
    })
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn write_error(op: &str, e: libsql::Error) -> DatabaseError {
    let message = e.to_string();
    if message.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{op}: {message}"))
    } else {
        DatabaseError::Query(format!("{op}: {message}"))
    }
}

/// Thread upsert plus event insert, on whatever connection or transaction is given.
async fn write_commit(conn: &Connection, commit: &ThreadCommit) -> Result<(), DatabaseError> {
    let thread = &commit.thread;
    if commit.is_new {
        conn.execute(
            "INSERT INTO application_threads (thread_id, company_name, company_key, position, current_status, is_active, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                thread.thread_id.to_string(),
                thread.company_name.as_str(),
                company_key(&thread.company_name),
                opt_text(thread.position.as_deref()),
                thread.current_status.as_str(),
                thread.is_active as i64,
                format_ts(&thread.created_at),
                format_ts(&thread.updated_at),
            ],
        )
        .await
        .map_err(|e| write_error("insert_thread", e))?;
    } else {
        update_thread(conn, thread).await?;
    }
    insert_event(conn, &commit.event).await
}

async fn update_thread(conn: &Connection, thread: &ApplicationThread) -> Result<(), DatabaseError> {
    let updated = conn
        .execute(
            "UPDATE application_threads SET position = ?1, current_status = ?2, is_active = ?3, created_at = ?4, updated_at = ?5 WHERE thread_id = ?6",
            params![
                opt_text(thread.position.as_deref()),
                thread.current_status.as_str(),
                thread.is_active as i64,
                format_ts(&thread.created_at),
                format_ts(&thread.updated_at),
                thread.thread_id.to_string(),
            ],
        )
        .await
        .map_err(|e| write_error("update_thread", e))?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity: "application_thread".to_string(),
            id: thread.thread_id.to_string(),
        });
    }
    Ok(())
}

async fn insert_event(conn: &Connection, event: &ApplicationEvent) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO application_events (event_id, thread_id, raw_email_id, old_status, status_at_event, summary, extraction_source, email_subject, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            event.event_id.to_string(),
            event.thread_id.to_string(),
            event.raw_email_id.as_str(),
            opt_text(event.old_status.map(|s| s.as_str())),
            event.status_at_event.as_str(),
            event.summary.as_str(),
            event.extraction_source.as_str(),
            event.email_subject.as_str(),
            format_ts(&event.created_at),
        ],
    )
    .await
    .map_err(|e| write_error("insert_event", e))?;
    Ok(())
}

/// Move `source`'s events onto `target`, log the merge, and delete `source`.
///
/// The target's status and activity are recomputed from its latest event;
/// the earliest `created_at` of the two threads is kept.
async fn write_merge(
    conn: &Connection,
    source_id: Uuid,
    target_id: Uuid,
) -> Result<(ApplicationThread, ApplicationEvent), DatabaseError> {
    let source = fetch_thread(conn, source_id, "merge_threads").await?;
    let target = fetch_thread(conn, target_id, "merge_threads").await?;

    conn.execute(
        "UPDATE application_events SET thread_id = ?1 WHERE thread_id = ?2",
        params![target_id.to_string(), source_id.to_string()],
    )
    .await
    .map_err(|e| write_error("move_events", e))?;

    let mut rows = conn
        .query(
            "SELECT status_at_event, created_at FROM application_events WHERE thread_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
            params![target_id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("latest_event: {e}")))?;
    let latest = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("latest_event: {e}")))?;
    let (status, updated_at) = match latest {
        Some(row) => {
            let status: String = text(&row, 0)?;
            let created_at: String = text(&row, 1)?;
            (parse_status(&status)?, parse_ts(&created_at)?)
        }
        None => (target.current_status, target.updated_at.max(source.updated_at)),
    };
    drop(rows);

    let merged = ApplicationThread {
        thread_id: target.thread_id,
        company_name: target.company_name.clone(),
        position: target.position.clone().or_else(|| source.position.clone()),
        current_status: status,
        is_active: ApplicationThread::is_open_after(status),
        created_at: target.created_at.min(source.created_at),
        updated_at,
    };
    update_thread(conn, &merged).await?;

    let event = ApplicationEvent {
        event_id: Uuid::new_v4(),
        thread_id: target.thread_id,
        raw_email_id: format!("merge:{source_id}"),
        old_status: Some(target.current_status),
        status_at_event: status,
        summary: format!(
            "Merged duplicate thread {} ({}) into this one.",
            source.company_name,
            source.position.as_deref().unwrap_or("position unknown")
        ),
        extraction_source: ConfidenceSource::Manual,
        email_subject: "System merge".to_string(),
        created_at: updated_at,
    };
    insert_event(conn, &event).await?;

    conn.execute(
        "DELETE FROM application_threads WHERE thread_id = ?1",
        params![source_id.to_string()],
    )
    .await
    .map_err(|e| write_error("delete_thread", e))?;

    Ok((merged, event))
}

// ── ThreadStore implementation ──────────────────────────────────────

#[async_trait]
impl ThreadStore for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        migrations::run_migrations(self.conn()).await
    }

    async fn list_threads(
        &self,
        company_name: &str,
    ) -> Result<Vec<ApplicationThread>, DatabaseError> {
        self.query_threads(
            &format!(
                "SELECT {THREAD_COLUMNS} FROM application_threads WHERE company_key = ?1 ORDER BY updated_at DESC"
            ),
            params![company_key(company_name)],
            "list_threads",
        )
        .await
    }

    async fn get_thread(&self, thread_id: Uuid) -> Result<Option<ApplicationThread>, DatabaseError> {
        let mut threads = self
            .query_threads(
                &format!("SELECT {THREAD_COLUMNS} FROM application_threads WHERE thread_id = ?1"),
                params![thread_id.to_string()],
                "get_thread",
            )
            .await?;
        Ok(threads.pop())
    }

    async fn list_all_threads(&self) -> Result<Vec<ApplicationThread>, DatabaseError> {
        self.query_threads(
            &format!("SELECT {THREAD_COLUMNS} FROM application_threads ORDER BY updated_at DESC"),
            (),
            "list_all_threads",
        )
        .await
    }

    async fn list_events(&self, thread_id: Uuid) -> Result<Vec<ApplicationEvent>, DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM application_events WHERE thread_id = ?1 ORDER BY created_at ASC, rowid ASC"
                ),
                params![thread_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_events: {e}")))?;

        let mut events = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_events: {e}")))?
        {
            events.push(row_to_event(&row)?);
        }
        Ok(events)
    }

    async fn has_event_for_email(&self, raw_email_id: &str) -> Result<bool, DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM application_events WHERE raw_email_id = ?1 LIMIT 1",
                params![raw_email_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("has_event_for_email: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("has_event_for_email: {e}")))?;
        Ok(row.is_some())
    }

    async fn commit_event(&self, commit: &ThreadCommit) -> Result<(), DatabaseError> {
        let _guard = self.conn_lock.lock().await;

        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Transaction(format!("begin: {e}")))?;

        match write_commit(&tx, commit).await {
            Ok(()) => {
                tx.commit()
                    .await
                    .map_err(|e| DatabaseError::Transaction(format!("commit: {e}")))?;
                debug!(
                    thread_id = %commit.thread.thread_id,
                    event_id = %commit.event.event_id,
                    is_new = commit.is_new,
                    "Event committed"
                );
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn merge_threads(
        &self,
        source_id: Uuid,
        target_id: Uuid,
    ) -> Result<ApplicationThread, DatabaseError> {
        if source_id == target_id {
            return Err(DatabaseError::Constraint(format!(
                "merge_threads: cannot merge thread {source_id} into itself"
            )));
        }
        let _guard = self.conn_lock.lock().await;

        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Transaction(format!("begin: {e}")))?;

        match write_merge(&tx, source_id, target_id).await {
            Ok((merged, event)) => {
                tx.commit()
                    .await
                    .map_err(|e| DatabaseError::Transaction(format!("commit: {e}")))?;
                info!(
                    source = %source_id,
                    target = %target_id,
                    event_id = %event.event_id,
                    status = %merged.current_status,
                    "Threads merged"
                );
                Ok(merged)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn flag_for_review(&self, email_id: &str, reason: &str) -> Result<(), DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        self.conn()
            .execute(
                "INSERT INTO review_queue (email_id, reason, flagged_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(email_id) DO UPDATE SET reason = excluded.reason, flagged_at = excluded.flagged_at",
                params![email_id, reason, format_ts(&Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("flag_for_review: {e}")))?;
        debug!(email_id, reason, "Email queued for manual review");
        Ok(())
    }

    async fn list_review_queue(&self) -> Result<Vec<ReviewItem>, DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                "SELECT email_id, reason, flagged_at FROM review_queue ORDER BY flagged_at ASC",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_review_queue: {e}")))?;

        let mut items = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_review_queue: {e}")))?
        {
            let flagged_at: String = text(&row, 2)?;
            items.push(ReviewItem {
                email_id: text(&row, 0)?,
                reason: text(&row, 1)?,
                flagged_at: parse_ts(&flagged_at)?,
            });
        }
        Ok(items)
    }
}
