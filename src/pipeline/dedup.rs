//! Deduplication resolver: continue an existing thread or start a new one.
//!
//! A thread matches when the company is the same (case-insensitive), the
//! position matches exactly or by token overlap, and the thread was updated
//! within the lookback window of the email's arrival. Among matches the most
//! recently updated thread wins. Unknown positions on either side act as a
//! wildcard. A closed thread only takes emails dated no later than its
//! closing event.

use std::collections::HashSet;

use chrono::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::config::DedupConfig;
use crate::pipeline::types::{ApplicationThread, ExtractionCandidate, RawEmail, Resolution, company_key};

/// How a candidate's position compared to a thread's.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionMatch {
    Exact,
    Overlap(f64),
    /// At least one side has no known position.
    Wildcard,
    Mismatch,
}

impl PositionMatch {
    fn is_match(self) -> bool {
        !matches!(self, Self::Mismatch)
    }
}

#[derive(Debug, Clone)]
pub struct DeduplicationResolver {
    lookback: Duration,
    overlap_threshold: f64,
}

impl DeduplicationResolver {
    pub fn new(lookback: Duration, overlap_threshold: f64) -> Self {
        Self {
            lookback,
            overlap_threshold,
        }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(config.lookback(), config.token_overlap_threshold)
    }

    /// Pick the thread this candidate belongs to.
    ///
    /// `existing_threads` may contain other companies' threads; they are ignored.
    pub fn resolve(
        &self,
        candidate: &ExtractionCandidate,
        email: &RawEmail,
        existing_threads: &[ApplicationThread],
    ) -> Resolution {
        let Some(company) = candidate.company_name.as_deref().map(company_key) else {
            return Self::new_thread(email, "no company");
        };

        let best = existing_threads
            .iter()
            .filter(|thread| company_key(&thread.company_name) == company)
            .filter(|thread| accepts(thread, email))
            .filter(|thread| self.within_window(thread, email))
            .filter_map(|thread| {
                let position =
                    self.compare_positions(candidate.position.as_deref(), thread.position.as_deref());
                position.is_match().then_some((thread, position))
            })
            .max_by_key(|(thread, _)| thread.updated_at);

        match best {
            Some((thread, position)) => {
                debug!(
                    email_id = %email.id,
                    thread_id = %thread.thread_id,
                    position_match = ?position,
                    "Continuing existing thread"
                );
                Resolution {
                    thread_id: thread.thread_id,
                    is_new: false,
                }
            }
            None => Self::new_thread(email, "no matching thread"),
        }
    }

    fn new_thread(email: &RawEmail, reason: &str) -> Resolution {
        let thread_id = Uuid::new_v4();
        debug!(email_id = %email.id, thread_id = %thread_id, reason, "Starting new thread");
        Resolution {
            thread_id,
            is_new: true,
        }
    }

    /// `|received_at - updated_at| <= lookback`; late-arriving older emails still match.
    fn within_window(&self, thread: &ApplicationThread, email: &RawEmail) -> bool {
        let distance = (email.received_at - thread.updated_at).abs();
        distance <= self.lookback
    }

    pub fn compare_positions(&self, candidate: Option<&str>, thread: Option<&str>) -> PositionMatch {
        let (Some(a), Some(b)) = (candidate, thread) else {
            return PositionMatch::Wildcard;
        };
        let a = normalize_position(a);
        let b = normalize_position(b);
        if a.is_empty() || b.is_empty() {
            return PositionMatch::Wildcard;
        }
        if a == b {
            return PositionMatch::Exact;
        }
        let overlap = token_overlap(&a, &b);
        if overlap >= self.overlap_threshold {
            PositionMatch::Overlap(overlap)
        } else {
            PositionMatch::Mismatch
        }
    }
}

/// Open threads take anything; closed ones only emails that predate the closing.
fn accepts(thread: &ApplicationThread, email: &RawEmail) -> bool {
    thread.is_active || email.received_at <= thread.updated_at
}

fn normalize_position(position: &str) -> String {
    position
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Jaccard similarity of the whitespace tokens of two normalized strings.
fn token_overlap(a: &str, b: &str) -> f64 {
    let a: HashSet<&str> = a.split(' ').collect();
    let b: HashSet<&str> = b.split(' ').collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}
