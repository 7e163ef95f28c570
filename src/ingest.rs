//! Email ingestion from disk: RFC 5322 `.eml` files and JSON exports.

use std::path::Path;

use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use tracing::{debug, warn};

use crate::error::IngestError;
use crate::pipeline::types::RawEmail;

/// Load every email in `path`. `.eml` yields one message, `.json` an array.
pub async fn load_file(path: &Path) -> Result<Vec<RawEmail>, IngestError> {
    let shown = path.display().to_string();
    let bytes = tokio::fs::read(path).await.map_err(|source| IngestError::Io {
        path: shown.clone(),
        source,
    })?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("eml") => {
            let fallback_id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("message");
            let email = parse_eml(&bytes, fallback_id).ok_or_else(|| IngestError::Malformed {
                path: shown.clone(),
                reason: "not a MIME message".to_string(),
            })?;
            Ok(vec![email])
        }
        Some("json") => {
            let emails: Vec<RawEmail> =
                serde_json::from_slice(&bytes).map_err(|e| IngestError::Malformed {
                    path: shown.clone(),
                    reason: e.to_string(),
                })?;
            debug!(path = %shown, count = emails.len(), "Loaded JSON email export");
            Ok(emails)
        }
        _ => Err(IngestError::Unsupported(shown)),
    }
}

/// Parse one MIME message into a `RawEmail`.
///
/// Missing Message-ID falls back to `fallback_id`; missing Date to now.
/// Quoted reply text is removed from the body.
pub fn parse_eml(bytes: &[u8], fallback_id: &str) -> Option<RawEmail> {
    let message = MessageParser::default().parse(bytes)?;

    let id = message
        .message_id()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback_id.to_string());

    let sender = message
        .from()
        .and_then(|from| from.first())
        .map(|addr| {
            let address = addr.address().unwrap_or_default();
            match addr.name().map(str::trim).filter(|n| !n.is_empty()) {
                Some(name) => format!("\"{name}\" <{address}>"),
                None => address.to_string(),
            }
        })
        .unwrap_or_default();

    let received_at = message
        .date()
        .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.to_timestamp(), 0))
        .unwrap_or_else(|| {
            warn!(email_id = %id, "Message has no usable Date header, using current time");
            Utc::now()
        });

    let body_text = message
        .body_text(0)
        .map(|body| strip_quoted_text(&body))
        .unwrap_or_default();

    Some(RawEmail {
        id,
        sender,
        subject: message.subject().unwrap_or_default().to_string(),
        body_text,
        received_at,
    })
}

/// Strip quoted reply text from an email body.
///
/// Drops `>` lines and everything after an "On ... wrote:" attribution or
/// an "Original Message" separator.
pub fn strip_quoted_text(body: &str) -> String {
    let mut kept = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('>') {
            continue;
        }
        if (trimmed.starts_with("On ") && trimmed.ends_with("wrote:"))
            || (trimmed.starts_with("Am ") && trimmed.ends_with("schrieb:"))
            || (trimmed.starts_with("---") && trimmed.contains("Original Message"))
        {
            break;
        }
        kept.push(line);
    }

    while kept.last().is_some_and(|l| l.trim().is_empty()) {
        kept.pop();
    }
    kept.join("\n")
}
