//! Refinement engine: deterministic post-pass over every candidate.
//!
//! Two passes, both pure functions of (candidate, email, config):
//!
//! - **Company correction.** When the extracted company is actually an
//!   applicant-tracking platform ("Workday"), the real employer is looked
//!   up in the signature block, an "X via Platform" phrase, then the
//!   sender's domain. If nothing qualifies the company becomes unknown.
//! - **Status override.** The keyword table may raise a status when a
//!   higher-priority keyword is present. Terminal statuses never change and
//!   a status never moves to a lower progression rank.

use tracing::debug;

use crate::config::{ExtractionConfig, KeywordRule, TrackerConfig};
use crate::pipeline::company::CompanyResolver;
use crate::pipeline::types::{ExtractionCandidate, RawEmail, Status};

/// Confidence a status carries on its own, on the keyword priority scale.
///
/// `None` for terminal statuses: they are never overridden.
fn implied_confidence(status: Status) -> Option<u8> {
    match status {
        Status::Unknown => Some(0),
        Status::Applied => Some(20),
        Status::Assessment => Some(50),
        Status::Interview => Some(65),
        Status::Offer | Status::Rejected => None,
    }
}

/// Keyword rule with its needle pre-lowercased.
#[derive(Debug, Clone)]
struct OverrideRule {
    needle: String,
    status: Status,
    priority: u8,
}

#[derive(Debug, Clone)]
pub struct RefinementEngine {
    companies: CompanyResolver,
    /// Sorted by priority, highest first; ties keep table order.
    rules: Vec<OverrideRule>,
}

impl RefinementEngine {
    pub fn new(extraction: &ExtractionConfig, keywords: &[KeywordRule]) -> Self {
        let mut rules: Vec<OverrideRule> = keywords
            .iter()
            .map(|rule| OverrideRule {
                needle: rule.keyword.trim().to_lowercase(),
                status: rule.status,
                priority: rule.priority,
            })
            .filter(|rule| !rule.needle.is_empty())
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        Self {
            companies: CompanyResolver::new(extraction),
            rules,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(&config.extraction, &config.keywords)
    }

    /// Run both passes.
    pub fn refine(&self, candidate: ExtractionCandidate, email: &RawEmail) -> ExtractionCandidate {
        let candidate = self.correct_company(candidate, email);
        self.override_status(candidate, email)
    }

    /// Replace a platform name with the employer found elsewhere in the email.
    ///
    /// Status, summary and next step pass through untouched.
    pub fn correct_company(
        &self,
        mut candidate: ExtractionCandidate,
        email: &RawEmail,
    ) -> ExtractionCandidate {
        let Some(ref company) = candidate.company_name else {
            return candidate;
        };
        if !self.companies.is_platform_name(company) {
            return candidate;
        }

        let corrected = self
            .companies
            .from_signature(&email.body_text)
            .or_else(|| self.companies.from_via_phrase(&email.body_text))
            .or_else(|| self.companies.from_via_phrase(&email.subject))
            .or_else(|| self.companies.from_sender_domain(email));

        debug!(
            email_id = %email.id,
            platform = %company,
            corrected = ?corrected,
            "Correcting platform name reported as company"
        );

        if corrected.is_none() {
            candidate.had_defaults = true;
        }
        candidate.company_name = corrected;
        candidate
    }

    /// Raise the status when a keyword outranks what the candidate implies.
    ///
    /// The first matching rule (by descending priority) whose priority
    /// exceeds the current status's implied confidence and whose status ranks
    /// above the current one wins.
    pub fn override_status(
        &self,
        mut candidate: ExtractionCandidate,
        email: &RawEmail,
    ) -> ExtractionCandidate {
        let Some(confidence) = implied_confidence(candidate.status) else {
            return candidate;
        };

        let text = email.searchable_text();
        let current_rank = candidate.status.rank();
        let hit = self.rules.iter().find(|rule| {
            rule.priority > confidence
                && rule.status.rank() > current_rank
                && text.contains(&rule.needle)
        });

        if let Some(rule) = hit {
            debug!(
                email_id = %email.id,
                from = %candidate.status,
                to = %rule.status,
                keyword = %rule.needle,
                "Keyword override raised status"
            );
            candidate.status = rule.status;
        }
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_keywords;
    use crate::pipeline::types::ConfidenceSource;
    use chrono::Utc;

    fn engine() -> RefinementEngine {
        RefinementEngine::new(&ExtractionConfig::default(), &default_keywords())
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

    fn candidate(company: &str, status: Status) -> ExtractionCandidate {
        ExtractionCandidate {
            company_name: Some(company.into()),
            position: Some("Backend Engineer".into()),
            status,
            summary: "Summary text".into(),
            next_step: None,
            confidence_source: ConfidenceSource::Ai,
            had_defaults: false,
        }
    }

    #[test]
    fn platform_company_is_replaced_from_signature() {
        let e = email(
            "Workday <noreply@myworkday.com>",
            "Application received",
            "Thanks for applying to Acme via Workday. Regards, Jane, Acme Recruiting",
        );
        let refined = engine().refine(candidate("Workday", Status::Applied), &e);
        assert_eq!(refined.company_name.as_deref(), Some("Acme"));
        assert_eq!(refined.status, Status::Applied);
        assert_eq!(refined.summary, "Summary text");
    }

    #[test]
    fn platform_company_falls_back_to_via_phrase() {
        let e = email(
            "noreply@greenhouse.io",
            "Update",
            "Your application to Globex via Greenhouse was received.",
        );
        let refined = engine().correct_company(candidate("Greenhouse", Status::Applied), &e);
        assert_eq!(refined.company_name.as_deref(), Some("Globex"));
    }

    #[test]
    fn platform_company_falls_back_to_sender_domain() {
        let e = email("jobs@initech.com", "Hello", "Powered by Lever.");
        let refined = engine().correct_company(candidate("Lever", Status::Applied), &e);
        assert_eq!(refined.company_name.as_deref(), Some("Initech"));
    }

    #[test]
    fn unresolvable_platform_company_becomes_unknown() {
        let e = email("noreply@myworkdayjobs.com", "Hello", "No details here.");
        let refined = engine().correct_company(candidate("Workday", Status::Applied), &e);
        assert!(refined.company_name.is_none());
        assert!(refined.had_defaults);
        assert!(!refined.is_well_formed());
    }

    #[test]
    fn real_company_is_left_alone() {
        let e = email("jobs@acme.com", "Hi", "Regards, Jane, Globex Recruiting");
        let refined = engine().correct_company(candidate("Acme", Status::Applied), &e);
        assert_eq!(refined.company_name.as_deref(), Some("Acme"));
    }

    #[test]
    fn keyword_raises_applied_to_interview() {
        let e = email(
            "jobs@acme.com",
            "Next steps",
            "We would like to invite you to an interview.",
        );
        let refined = engine().override_status(candidate("Acme", Status::Applied), &e);
        assert_eq!(refined.status, Status::Interview);
    }

    #[test]
    fn german_rejection_keyword_applies() {
        let e = email(
            "jobs@acme.de",
            "Ihre Bewerbung",
            "Leider müssen wir Ihnen mitteilen, dass wir uns für andere Kandidaten entschieden haben.",
        );
        let refined = engine().override_status(candidate("Acme", Status::Applied), &e);
        assert_eq!(refined.status, Status::Rejected);
    }

    #[test]
    fn terminal_statuses_never_change() {
        let e = email(
            "jobs@acme.com",
            "Interview",
            "Unfortunately we regret... pleased to offer... interview",
        );
        for status in [Status::Offer, Status::Rejected] {
            let refined = engine().override_status(candidate("Acme", status), &e);
            assert_eq!(refined.status, status);
        }
    }

    #[test]
    fn override_never_lowers_rank() {
        // "thank you for applying" must not pull an interview back to APPLIED.
        let e = email(
            "jobs@acme.com",
            "Interview",
            "Thank you for applying. Let's schedule a chat.",
        );
        let refined = engine().override_status(candidate("Acme", Status::Interview), &e);
        assert_eq!(refined.status, Status::Interview);
    }

    #[test]
    fn override_is_monotonic_for_every_status() {
        let texts = [
            "pleased to offer you the role",
            "unfortunately we are not moving forward",
            "interview invitation",
            "please complete the coding challenge",
            "thank you for applying",
            "nothing relevant",
        ];
        for status in Status::ALL {
            for text in texts {
                let e = email("jobs@acme.com", "", text);
                let refined = engine().override_status(candidate("Acme", status), &e);
                assert!(refined.status.rank() >= status.rank());
                if status.is_terminal() {
                    assert_eq!(refined.status, status);
                }
            }
        }
    }

    #[test]
    fn low_priority_keyword_does_not_override_assessment() {
        let e = email("jobs@acme.com", "", "Thank you for applying.");
        let refined = engine().override_status(candidate("Acme", Status::Assessment), &e);
        assert_eq!(refined.status, Status::Assessment);
    }

    #[test]
    fn unknown_status_picks_highest_priority_match() {
        let e = email(
            "jobs@acme.com",
            "",
            "Thank you for applying. Unfortunately we are not moving forward.",
        );
        let refined = engine().override_status(candidate("Acme", Status::Unknown), &e);
        assert_eq!(refined.status, Status::Rejected);
    }

    #[test]
    fn refine_is_deterministic() {
        let e = email(
            "Workday <noreply@myworkday.com>",
            "Interview invitation",
            "Thanks for applying to Acme via Workday. Regards, Jane, Acme Recruiting",
        );
        let c = candidate("Workday", Status::Applied);
        assert_eq!(engine().refine(c.clone(), &e), engine().refine(c, &e));
    }
}
