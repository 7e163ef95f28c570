//! Email → application event pipeline.
//!
//! Every inbound email flows through:
//! 1. `ProviderChain::extract()`: providers in order, then the heuristic fallback
//!    - `recovery::parse()` pulls one JSON object out of the raw completion
//!    - `normalize::normalize()` maps field/status synonyms onto a candidate
//!    - `RefinementEngine::refine()` fixes platform company names and statuses
//! 2. `DeduplicationResolver::resolve()`: existing thread or a new one
//! 3. `EventLog::append()`: thread write + event insert, atomically
//!
//! `ApplicationProcessor` drives the steps per email and per batch.

pub mod chain;
pub mod company;
pub mod dedup;
pub mod event_log;
pub mod heuristic;
pub mod locks;
pub mod normalize;
pub mod processor;
pub mod recovery;
pub mod refine;
pub mod types;

pub use chain::ProviderChain;
pub use dedup::DeduplicationResolver;
pub use event_log::EventLog;
pub use heuristic::{HeuristicExtractor, RuleBasedExtractor};
pub use processor::{ApplicationProcessor, BatchReport, EmailResult, ProcessOutcome};
pub use refine::RefinementEngine;
pub use types::{
    ApplicationEvent, ApplicationThread, ConfidenceSource, ExtractionCandidate, RawEmail,
    Resolution, Status,
};
