//! Schema normalizer: coerces a parsed JSON object into a complete candidate.
//!
//! Total by construction: any input map, including an empty one, yields an
//! `ExtractionCandidate` with every field set. Missing, null, or mistyped
//! fields get a default and set `had_defaults`.

use serde_json::Value;
use tracing::debug;

use crate::pipeline::recovery::JsonMap;
use crate::pipeline::types::{ConfidenceSource, ExtractionCandidate, Status};

/// Bump when `SYNONYMS` changes meaningfully.
pub const SYNONYM_TABLE_VERSION: u32 = 1;

/// Canonical candidate fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    CompanyName,
    Position,
    Status,
    Summary,
    NextStep,
}

const FIELDS: [(Field, &str); 5] = [
    (Field::CompanyName, "company_name"),
    (Field::Position, "position"),
    (Field::Status, "status"),
    (Field::Summary, "summary"),
    (Field::NextStep, "next_step"),
];

/// Alternative key → canonical field.
///
/// Keys are compared after folding: lowercase, non-alphanumerics removed,
/// so `companyName`, `company-name` and `Company Name` all read `companyname`.
const SYNONYMS: &[(&str, Field)] = &[
    ("companyname", Field::CompanyName),
    ("company", Field::CompanyName),
    ("employer", Field::CompanyName),
    ("employername", Field::CompanyName),
    ("organization", Field::CompanyName),
    ("organisation", Field::CompanyName),
    ("firm", Field::CompanyName),
    ("unternehmen", Field::CompanyName),
    ("firma", Field::CompanyName),
    ("position", Field::Position),
    ("jobtitle", Field::Position),
    ("title", Field::Position),
    ("role", Field::Position),
    ("job", Field::Position),
    ("positionname", Field::Position),
    ("stelle", Field::Position),
    ("status", Field::Status),
    ("applicationstatus", Field::Status),
    ("state", Field::Status),
    ("stage", Field::Status),
    ("summary", Field::Summary),
    ("description", Field::Summary),
    ("details", Field::Summary),
    ("zusammenfassung", Field::Summary),
    ("nextstep", Field::NextStep),
    ("nextsteps", Field::NextStep),
    ("nextaction", Field::NextStep),
    ("action", Field::NextStep),
];

/// Placeholder strings models emit instead of leaving a field out.
const UNKNOWN_MARKERS: &[&str] = &["", "unknown", "n/a", "na", "none", "null", "not specified", "-"];

fn fold_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn lookup_field(key: &str) -> Option<Field> {
    let folded = fold_key(key);
    SYNONYMS
        .iter()
        .find(|(alias, _)| *alias == folded)
        .map(|(_, field)| *field)
}

/// Convert a raw mapping into a typed candidate tagged `AI`.
pub fn normalize(mapping: &JsonMap) -> ExtractionCandidate {
    // Canonical keys win over synonyms, whatever their order in the object.
    // Null, mistyped or placeholder values count as absent, so a synonym
    // can still fill the slot.
    let mut slots: [Option<&Value>; 5] = [None; 5];
    for (index, (_, name)) in FIELDS.iter().enumerate() {
        slots[index] = mapping.get(*name).filter(|v| is_present(v));
    }
    for (key, value) in mapping {
        if let Some(field) = lookup_field(key) {
            let index = field_index(field);
            if slots[index].is_none() && is_present(value) {
                slots[index] = Some(value);
            }
        }
    }

    let mut had_defaults = false;
    let mut flag = |field: Field, ok: bool| {
        if !ok {
            debug!(field = ?field, "Defaulting candidate field");
            had_defaults = true;
        }
    };

    let company_name = optional_text(slots[field_index(Field::CompanyName)]);
    flag(Field::CompanyName, company_name.is_some());

    let position = optional_text(slots[field_index(Field::Position)]);
    flag(Field::Position, position.is_some());

    let status = slots[field_index(Field::Status)]
        .and_then(Value::as_str)
        .and_then(Status::parse_loose);
    flag(Field::Status, status.is_some());

    let summary = optional_text(slots[field_index(Field::Summary)]);
    flag(Field::Summary, summary.is_some());

    let next_step = optional_text(slots[field_index(Field::NextStep)]);
    flag(Field::NextStep, next_step.is_some());

    ExtractionCandidate {
        company_name,
        position,
        status: status.unwrap_or(Status::Unknown),
        summary: summary.unwrap_or_default(),
        next_step,
        confidence_source: ConfidenceSource::Ai,
        had_defaults,
    }
}

fn field_index(field: Field) -> usize {
    FIELDS
        .iter()
        .position(|(f, _)| *f == field)
        .unwrap_or_default()
}

/// Every candidate field is text; anything else is treated as missing.
fn is_present(value: &Value) -> bool {
    optional_text(Some(value)).is_some()
}

/// A trimmed, non-placeholder string, or `None`.
fn optional_text(value: Option<&Value>) -> Option<String> {
    let text = value?.as_str()?.trim();
    if UNKNOWN_MARKERS.contains(&text.to_lowercase().as_str()) {
        None
    } else {
        Some(text.split_whitespace().collect::<Vec<_>>().join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> JsonMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("test input must be an object"),
        }
    }

    #[test]
    fn complete_mapping_has_no_defaults() {
        let candidate = normalize(&map(json!({
            "company_name": "Acme",
            "position": "Backend Engineer",
            "status": "INTERVIEW",
            "summary": "Invited to a first interview.",
            "next_step": "Pick a slot",
        })));
        assert_eq!(candidate.company_name.as_deref(), Some("Acme"));
        assert_eq!(candidate.position.as_deref(), Some("Backend Engineer"));
        assert_eq!(candidate.status, Status::Interview);
        assert_eq!(candidate.next_step.as_deref(), Some("Pick a slot"));
        assert_eq!(candidate.confidence_source, ConfidenceSource::Ai);
        assert!(!candidate.had_defaults);
    }

    #[test]
    fn empty_mapping_is_fully_defaulted() {
        let candidate = normalize(&JsonMap::new());
        assert!(candidate.company_name.is_none());
        assert!(candidate.position.is_none());
        assert_eq!(candidate.status, Status::Unknown);
        assert_eq!(candidate.summary, "");
        assert!(candidate.next_step.is_none());
        assert!(candidate.had_defaults);
    }

    #[test]
    fn synonyms_map_to_canonical_fields() {
        let candidate = normalize(&map(json!({
            "employer": "Initech",
            "jobTitle": "Data Analyst",
            "Application Status": "rejected",
            "description": "Not moving forward.",
            "next-steps": "None needed",
        })));
        assert_eq!(candidate.company_name.as_deref(), Some("Initech"));
        assert_eq!(candidate.position.as_deref(), Some("Data Analyst"));
        assert_eq!(candidate.status, Status::Rejected);
        assert_eq!(candidate.summary, "Not moving forward.");
        assert_eq!(candidate.next_step.as_deref(), Some("None needed"));
        assert!(!candidate.had_defaults);
    }

    #[test]
    fn canonical_key_wins_over_synonym() {
        let candidate = normalize(&map(json!({
            "employer": "Workday",
            "company_name": "Acme",
            "status": "APPLIED",
            "summary": "x",
            "position": "y",
            "next_step": "z",
        })));
        assert_eq!(candidate.company_name.as_deref(), Some("Acme"));
    }

    #[test]
    fn null_canonical_key_yields_to_synonym() {
        let candidate = normalize(&map(json!({
            "company_name": null,
            "employer": "Acme",
            "position": 7,
            "role": "Backend Engineer",
            "status": "unknown",
            "stage": "Interview",
        })));
        assert_eq!(candidate.company_name.as_deref(), Some("Acme"));
        assert_eq!(candidate.position.as_deref(), Some("Backend Engineer"));
        assert_eq!(candidate.status, Status::Interview);
    }

    #[test]
    fn synonym_table_is_pinned_to_its_version() {
        // Changing SYNONYMS without bumping the version fails here.
        let fingerprint: Vec<String> = SYNONYMS
            .iter()
            .map(|(alias, field)| format!("{alias}={field:?}"))
            .collect();
        assert_eq!(SYNONYM_TABLE_VERSION, 1);
        assert_eq!(SYNONYMS.len(), 28);
        assert_eq!(fingerprint.first().map(String::as_str), Some("companyname=CompanyName"));
        assert_eq!(fingerprint.last().map(String::as_str), Some("action=NextStep"));
        for (field, name) in FIELDS {
            assert_eq!(lookup_field(name), Some(field), "canonical key {name} must be listed");
        }
    }

    #[test]
    fn null_and_mistyped_fields_default() {
        let candidate = normalize(&map(json!({
            "company_name": null,
            "position": 42,
            "status": ["APPLIED"],
            "summary": {"text": "nested"},
            "next_step": true,
        })));
        assert!(candidate.company_name.is_none());
        assert!(candidate.position.is_none());
        assert_eq!(candidate.status, Status::Unknown);
        assert_eq!(candidate.summary, "");
        assert!(candidate.next_step.is_none());
        assert!(candidate.had_defaults);
    }

    #[test]
    fn placeholder_strings_are_unknown() {
        let candidate = normalize(&map(json!({
            "company_name": "Unknown",
            "position": "N/A",
            "status": "APPLIED",
            "summary": "ok",
            "next_step": "",
        })));
        assert!(candidate.company_name.is_none());
        assert!(candidate.position.is_none());
        assert!(candidate.next_step.is_none());
        assert!(candidate.had_defaults);
    }

    #[test]
    fn title_case_status_is_accepted() {
        let candidate = normalize(&map(json!({ "status": "Applied" })));
        assert_eq!(candidate.status, Status::Applied);
    }

    #[test]
    fn unrecognized_status_defaults_to_unknown() {
        let candidate = normalize(&map(json!({
            "company_name": "Acme",
            "position": "Dev",
            "status": "PENDING_REVIEW",
            "summary": "s",
            "next_step": "n",
        })));
        assert_eq!(candidate.status, Status::Unknown);
        assert!(candidate.had_defaults);
    }

    #[test]
    fn whitespace_is_collapsed() {
        let candidate = normalize(&map(json!({ "company_name": "  Acme \n Corp  " })));
        assert_eq!(candidate.company_name.as_deref(), Some("Acme Corp"));
    }

    #[test]
    fn fold_key_ignores_case_and_punctuation() {
        assert_eq!(fold_key("Company_Name"), "companyname");
        assert_eq!(fold_key("company-name"), "companyname");
        assert_eq!(lookup_field("Job Title"), Some(Field::Position));
        assert_eq!(lookup_field("salary"), None);
    }
}
