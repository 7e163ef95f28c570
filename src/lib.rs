//! Job tracker: turns recruiting emails into deduplicated application timelines.

pub mod config;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod pipeline;
pub mod store;
