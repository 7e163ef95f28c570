//! Rule-based fallback extraction, used when every provider has failed.

use tracing::debug;

use crate::config::{KeywordRule, TrackerConfig};
use crate::pipeline::company::CompanyResolver;
use crate::pipeline::types::{ConfidenceSource, ExtractionCandidate, RawEmail, Status};

/// Non-AI extraction strategy.
///
/// Always returns a candidate tagged `HEURISTIC`; fields it cannot determine
/// are left unknown.
pub trait HeuristicExtractor: Send + Sync {
    fn extract(&self, email: &RawEmail) -> ExtractionCandidate;
}

/// Status precedence when several keyword groups match.
const STATUS_PRECEDENCE: [Status; 5] = [
    Status::Rejected,
    Status::Offer,
    Status::Interview,
    Status::Assessment,
    Status::Applied,
];

/// Default extractor: sender, signature and subject rules plus the keyword table.
pub struct RuleBasedExtractor {
    companies: CompanyResolver,
    keywords: Vec<(String, Status)>,
}

impl RuleBasedExtractor {
    pub fn new(companies: CompanyResolver, keywords: &[KeywordRule]) -> Self {
        let keywords = keywords
            .iter()
            .map(|rule| (rule.keyword.trim().to_lowercase(), rule.status))
            .filter(|(needle, _)| !needle.is_empty())
            .collect();
        Self {
            companies,
            keywords,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(CompanyResolver::new(&config.extraction), &config.keywords)
    }

    fn detect_company(&self, email: &RawEmail) -> Option<String> {
        self.companies
            .from_sender_domain(email)
            .or_else(|| self.companies.from_sender_name(email))
            .or_else(|| self.companies.from_signature(&email.body_text))
            .or_else(|| self.companies.from_subject(&email.subject))
    }

    fn detect_status(&self, email: &RawEmail) -> Status {
        let text = email.searchable_text();
        STATUS_PRECEDENCE
            .into_iter()
            .find(|status| {
                self.keywords
                    .iter()
                    .any(|(needle, rule_status)| rule_status == status && text.contains(needle))
            })
            .unwrap_or(Status::Unknown)
    }
}

impl HeuristicExtractor for RuleBasedExtractor {
    fn extract(&self, email: &RawEmail) -> ExtractionCandidate {
        let company_name = self.detect_company(email);
        let status = self.detect_status(email);
        let summary = summarize(status, &clean_subject(&email.subject));

        debug!(
            email_id = %email.id,
            company = ?company_name,
            status = %status,
            "Heuristic extraction"
        );

        ExtractionCandidate {
            company_name,
            position: None,
            status,
            summary,
            next_step: None,
            confidence_source: ConfidenceSource::Heuristic,
            had_defaults: true,
        }
    }
}

/// Subject with reply/forward prefixes removed.
fn clean_subject(subject: &str) -> String {
    let mut rest = subject.trim();
    loop {
        let lower = rest.to_lowercase();
        let Some(prefix) = ["re:", "aw:", "fw:", "fwd:", "wg:"]
            .iter()
            .find(|p| lower.starts_with(*p))
        else {
            break;
        };
        rest = rest[prefix.len()..].trim_start();
    }
    rest.to_string()
}

fn summarize(status: Status, subject: &str) -> String {
    match status {
        Status::Applied => format!("Application confirmed: {subject}"),
        Status::Assessment => format!("Assessment or test task: {subject}"),
        Status::Interview => format!("Interview or meeting related: {subject}"),
        Status::Offer => format!("Job offer received: {subject}"),
        Status::Rejected => format!("Application rejected or closed: {subject}"),
        Status::Unknown => format!("General update: {subject}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn extractor() -> RuleBasedExtractor {
        RuleBasedExtractor::from_config(&TrackerConfig::default())
    }

    fn email(sender: &str, subject: &str, body: &str) -> RawEmail {
        RawEmail {
            id: "m1".into(),
            sender: sender.into(),
            subject: subject.into(),
            body_text: body.into(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn company_from_sender_domain() {
        let c = extractor().extract(&email(
            "Acme Careers <jobs@acme.com>",
            "Application received",
            "Thank you for applying.",
        ));
        assert_eq!(c.company_name.as_deref(), Some("Acme"));
        assert_eq!(c.status, Status::Applied);
        assert_eq!(c.confidence_source, ConfidenceSource::Heuristic);
        assert_eq!(c.summary, "Application confirmed: Application received");
    }

    #[test]
    fn company_from_sender_name_when_domain_is_platform() {
        let c = extractor().extract(&email(
            "\"Globex Recruiting\" <noreply@greenhouse.io>",
            "Update",
            "Hello",
        ));
        assert_eq!(c.company_name.as_deref(), Some("Globex"));
        assert_eq!(c.status, Status::Unknown);
    }

    #[test]
    fn company_from_signature_when_sender_is_generic() {
        let c = extractor().extract(&email(
            "noreply@myworkdayjobs.com",
            "Your application",
            "We received it.\n\nBest regards,\nJane Doe\nInitech Talent Acquisition",
        ));
        assert_eq!(c.company_name.as_deref(), Some("Initech"));
    }

    #[test]
    fn company_from_subject_pattern() {
        let c = extractor().extract(&email(
            "noreply@myworkdayjobs.com",
            "Re: Your application to Umbrella",
            "Thanks",
        ));
        assert_eq!(c.company_name.as_deref(), Some("Umbrella"));
    }

    #[test]
    fn unknown_company_when_nothing_matches() {
        let c = extractor().extract(&email("noreply@myworkdayjobs.com", "hi", "hello"));
        assert!(c.company_name.is_none());
        assert!(c.had_defaults);
    }

    #[test]
    fn rejection_wins_over_interview_keywords() {
        let c = extractor().extract(&email(
            "jobs@acme.com",
            "Your interview",
            "Unfortunately we will not continue after the interview.",
        ));
        assert_eq!(c.status, Status::Rejected);
    }

    #[test]
    fn subject_prefixes_are_stripped_from_summary() {
        let c = extractor().extract(&email(
            "jobs@acme.com",
            "AW: Re: Einladung zum Vorstellungsgespräch",
            "",
        ));
        assert_eq!(c.status, Status::Interview);
        assert_eq!(
            c.summary,
            "Interview or meeting related: Einladung zum Vorstellungsgespräch"
        );
    }
}
