//! Persistence layer: libSQL-backed storage for threads, events and the review queue.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ReviewItem, ThreadCommit, ThreadStore};
