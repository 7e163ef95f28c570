//! Shared types for the extraction and reconciliation pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Raw email ───────────────────────────────────────────────────────

/// An inbound recruiting email as handed over by the mail collaborator.
///
/// `body_text` arrives already truncated; the pipeline never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEmail {
    /// Mailbox-native message id.
    pub id: String,
    /// Full `From` header, e.g. `"Acme Careers" <jobs@acme.com>`.
    pub sender: String,
    pub subject: String,
    pub body_text: String,
    pub received_at: DateTime<Utc>,
}

impl RawEmail {
    /// Bare address part of the sender header, lowercased.
    pub fn sender_address(&self) -> String {
        let raw = match (self.sender.find('<'), self.sender.rfind('>')) {
            (Some(start), Some(end)) if end > start => &self.sender[start + 1..end],
            _ => self.sender.as_str(),
        };
        raw.trim().trim_matches('"').to_lowercase()
    }

    /// Display-name part of the sender header, if any.
    pub fn sender_name(&self) -> Option<String> {
        let start = self.sender.find('<')?;
        let name = self.sender[..start].trim().trim_matches('"').trim();
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }

    /// Domain of the sender address, lowercased.
    pub fn sender_domain(&self) -> Option<String> {
        let address = self.sender_address();
        let (_, domain) = address.rsplit_once('@')?;
        let domain = domain.trim().trim_end_matches('.');
        if domain.is_empty() {
            None
        } else {
            Some(domain.to_string())
        }
    }

    /// Subject and body joined, lowercased, for keyword scans.
    pub fn searchable_text(&self) -> String {
        format!("{}\n{}", self.subject, self.body_text).to_lowercase()
    }
}

// ── Status ──────────────────────────────────────────────────────────

/// Canonical application status.
///
/// The single source of truth for status casing: every persistence or
/// reporting boundary goes through `as_str` / `FromStr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Applied,
    Assessment,
    Interview,
    Offer,
    Rejected,
    Unknown,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Applied,
        Status::Assessment,
        Status::Interview,
        Status::Offer,
        Status::Rejected,
        Status::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "APPLIED",
            Self::Assessment => "ASSESSMENT",
            Self::Interview => "INTERVIEW",
            Self::Offer => "OFFER",
            Self::Rejected => "REJECTED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// OFFER and REJECTED end an application process.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Offer | Self::Rejected)
    }

    /// Progression rank: higher means further along the process.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Applied => 1,
            Self::Assessment => 3,
            Self::Interview => 4,
            Self::Rejected => 5,
            Self::Offer => 6,
        }
    }

    /// Lenient parse of model output: case-insensitive, with common synonyms.
    ///
    /// Returns `None` when nothing matches so callers can flag the default.
    pub fn parse_loose(value: &str) -> Option<Self> {
        let normalized: String = value
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();
        let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");

        let status = match normalized.as_str() {
            "applied" | "application received" | "application submitted" | "submitted"
            | "received" | "confirmation" | "beworben" => Self::Applied,
            "assessment" | "test" | "coding challenge" | "challenge" | "take home"
            | "assignment" | "eignungstest" => Self::Assessment,
            "interview" | "interviewing" | "interview scheduled" | "meeting"
            | "vorstellungsgespräch" => Self::Interview,
            "offer" | "offered" | "job offer" | "vertragsangebot" => Self::Offer,
            "rejected" | "rejection" | "declined" | "closed" | "absage" => Self::Rejected,
            "unknown" => Self::Unknown,
            _ => return None,
        };
        Some(status)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown status: '{s}'"))
    }
}

// ── Extraction candidate ────────────────────────────────────────────

/// Where a candidate's field values came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceSource {
    Ai,
    Heuristic,
    /// Recorded by an operator action such as a thread merge.
    Manual,
}

impl ConfidenceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ai => "AI",
            Self::Heuristic => "HEURISTIC",
            Self::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for ConfidenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfidenceSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AI" => Ok(Self::Ai),
            "HEURISTIC" => Ok(Self::Heuristic),
            "MANUAL" => Ok(Self::Manual),
            other => Err(format!("unknown confidence source: '{other}'")),
        }
    }
}

/// One extraction attempt's result, prior to deduplication.
///
/// `None` in an optional text field means "unknown".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionCandidate {
    pub company_name: Option<String>,
    pub position: Option<String>,
    pub status: Status,
    pub summary: String,
    pub next_step: Option<String>,
    pub confidence_source: ConfidenceSource,
    /// At least one field was missing or malformed and got a default.
    pub had_defaults: bool,
}

impl ExtractionCandidate {
    /// A candidate with every field at its default.
    pub fn unknown(source: ConfidenceSource) -> Self {
        Self {
            company_name: None,
            position: None,
            status: Status::Unknown,
            summary: String::new(),
            next_step: None,
            confidence_source: source,
            had_defaults: true,
        }
    }

    /// Structurally usable: a non-empty company after refinement.
    pub fn is_well_formed(&self) -> bool {
        self.company_name
            .as_deref()
            .is_some_and(|name| !name.trim().is_empty())
    }
}

// ── Threads and events ──────────────────────────────────────────────

/// One job application's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationThread {
    pub thread_id: Uuid,
    pub company_name: String,
    pub position: Option<String>,
    pub current_status: Status,
    /// Cleared once the process ends in a rejection.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    /// Timestamp of the thread's most recent event.
    pub updated_at: DateTime<Utc>,
}

impl ApplicationThread {
    /// A thread still accepts later emails unless `status` closed it.
    pub fn is_open_after(status: Status) -> bool {
        status != Status::Rejected
    }
}

/// Immutable log entry of one email's contribution to a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationEvent {
    pub event_id: Uuid,
    pub thread_id: Uuid,
    pub raw_email_id: String,
    /// Thread status before this event; `None` when the event opened the thread.
    pub old_status: Option<Status>,
    pub status_at_event: Status,
    pub summary: String,
    pub extraction_source: ConfidenceSource,
    pub email_subject: String,
    pub created_at: DateTime<Utc>,
}

/// Deduplication decision for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub thread_id: Uuid,
    pub is_new: bool,
}

/// Case-insensitive key used for company matching and per-company locking.
pub fn company_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
