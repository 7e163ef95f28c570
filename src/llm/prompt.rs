//! Extraction prompt and schema.

use crate::pipeline::types::{RawEmail, Status};

/// System preamble shared by every backend.
pub const PREAMBLE: &str = "You extract job application data from recruiting emails. \
Answer with one JSON object only, no commentary.";

/// JSON schema of the fields a provider is asked to return.
pub const SCHEMA_HINT: &str = r#"{
  "type": "object",
  "properties": {
    "company_name": {"type": "string", "description": "The hiring employer, never the applicant-tracking platform"},
    "position": {"type": "string", "description": "Job title, or \"Unknown\""},
    "status": {"type": "string", "enum": ["APPLIED", "ASSESSMENT", "INTERVIEW", "OFFER", "REJECTED", "UNKNOWN"]},
    "summary": {"type": "string", "description": "One professional sentence"},
    "next_step": {"type": "string", "description": "What the applicant should do next, or \"None\""}
  },
  "required": ["company_name", "position", "status", "summary", "next_step"]
}"#;

/// Build the user prompt for one email.
///
/// Body whitespace is collapsed and the body cut to `max_body_chars` characters.
pub fn prompt_for(email: &RawEmail, max_body_chars: usize) -> String {
    let body: String = email
        .body_text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_body_chars)
        .collect();

    let statuses = Status::ALL
        .iter()
        .map(Status::as_str)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Extract job application data.\n\
         Sender: {sender}\n\
         Subject: {subject}\n\
         Content: {body}\n\n\
         Rules:\n\
         - 'company_name' must be the employer, not the platform (use 'Tesla', not 'Workday').\n\
         - 'status' must be one of: {statuses}.\n\
         - 'summary' should be a single, professional sentence.\n\
         - Use \"Unknown\" for anything the email does not say.",
        sender = email.sender,
        subject = email.subject,
    )
}
