//! Error types for the job tracker.

use std::fmt;
use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),
}

/// Why an extraction backend failed to produce text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The call did not finish within its time budget.
    Timeout,
    /// Rate limit or spend quota exhausted.
    Quota,
    /// The backend could not allocate memory for the model or request.
    Alloc,
    /// Anything else: connection refused, bad credentials, 5xx, empty output.
    Unavailable,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Timeout => "timeout",
            Self::Quota => "quota",
            Self::Alloc => "alloc",
            Self::Unavailable => "unavailable",
        };
        f.write_str(label)
    }
}

/// An extraction backend failed. Recoverable: the chain fails over.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Provider {provider} failed ({kind}): {reason}")]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub reason: String,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, kind: ProviderErrorKind, reason: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind,
            reason: reason.into(),
        }
    }

    pub fn timeout(provider: impl Into<String>, after: Duration) -> Self {
        Self::new(
            provider,
            ProviderErrorKind::Timeout,
            format!("no response after {after:?}"),
        )
    }

    /// Classify a free-form backend error message.
    ///
    /// Used for transports that only surface a string (rig, llama servers).
    pub fn classify(provider: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let kind = if lower.contains("timed out") || lower.contains("timeout") {
            ProviderErrorKind::Timeout
        } else if lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("rate_limit")
            || lower.contains("quota")
            || lower.contains("insufficient_quota")
        {
            ProviderErrorKind::Quota
        } else if lower.contains("out of memory")
            || lower.contains("failed to allocate")
            || lower.contains("allocation")
            || lower
                .split(|c: char| !c.is_ascii_alphanumeric())
                .any(|word| word == "oom")
        {
            ProviderErrorKind::Alloc
        } else {
            ProviderErrorKind::Unavailable
        };
        Self::new(provider, kind, message)
    }
}

/// Model output could not be turned into a JSON object.
///
/// Internal to extraction; never surfaced past the provider chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unparseable model output: {reason}")]
pub struct ParseFailure {
    pub reason: String,
}

impl ParseFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Fatal failure for a single email. The email is queued for manual review;
/// the rest of the batch keeps going.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Store failure: {0}")]
    Store(#[from] DatabaseError),

    #[error("Processing of email {email_id} panicked: {message}")]
    Panicked { email_id: String, message: String },

    #[error("Worker task for email {email_id} failed: {reason}")]
    Join { email_id: String, reason: String },
}

/// Failure reading emails from disk.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed message in {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("Unsupported file type: {0}")]
    Unsupported(String),
}
