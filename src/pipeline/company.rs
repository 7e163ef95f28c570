//! Company-name detection shared by refinement and the heuristic extractor.
//!
//! Every source here is a best guess: signature blocks, "X via Platform"
//! phrases, the sender's domain and display name, subject-line patterns.
//! Applicant-tracking platforms are never accepted as the employer.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::config::ExtractionConfig;
use crate::pipeline::types::RawEmail;

/// Closing phrases that open a signature block (English and German).
static CLOSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:best regards|kind regards|warm regards|regards|sincerely|best wishes|cheers|mit freundlichen grüßen|mit freundlichen grüssen|freundliche grüße|viele grüße|herzliche grüße|beste grüße)\b",
    )
    .expect("closing regex is valid")
});

/// "to Acme via Workday", "bei Acme über Personio".
static VIA_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?i:to|at|with|for|bei|für)\s+([A-Z][\w&.\-]*(?:\s+[A-Z][\w&.\-]*){0,3})\s+(?i:via|through|über)\s",
    )
    .expect("via regex is valid")
});

/// Legal-form suffixes that mark a segment as an organization.
const COMPANY_SUFFIXES: &[&str] = &[
    "gmbh", "ag", "inc", "ltd", "llc", "corp", "corporation", "se", "kg", "plc", "co", "group",
];

/// Lowercase words allowed inside a capitalized name.
const CONNECTORS: &[&str] = &["&", "and", "und", "of", "de", "the", "for"];

/// Second-level labels that precede a country code (`acme.co.uk`).
const SECOND_LEVEL_LABELS: &[&str] = &["co", "com", "org", "net", "ac", "gov"];

/// Characters of the signature block considered after the closing phrase.
const SIGNATURE_WINDOW: usize = 300;

/// A compiled subject-line pattern.
#[derive(Debug, Clone)]
struct SubjectRule {
    regex: Regex,
    group: usize,
}

/// Company-name detection with configured platform and generic-name lists.
#[derive(Debug, Clone)]
pub struct CompanyResolver {
    platform_names: Vec<String>,
    platform_domains: Vec<String>,
    generic_domains: Vec<String>,
    generic_names: Vec<String>,
    subject_rules: Vec<SubjectRule>,
}

impl CompanyResolver {
    pub fn new(config: &ExtractionConfig) -> Self {
        let lower = |items: &[String]| -> Vec<String> {
            items
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };

        let subject_rules = config
            .subject_patterns
            .iter()
            .filter_map(|p| match Regex::new(&p.pattern) {
                Ok(regex) => Some(SubjectRule {
                    regex,
                    group: p.group,
                }),
                Err(e) => {
                    warn!(pattern = %p.pattern, error = %e, "Skipping invalid subject pattern");
                    None
                }
            })
            .collect();

        Self {
            platform_names: lower(&config.platform_names),
            platform_domains: lower(&config.platform_domains),
            generic_domains: lower(&config.generic_domains),
            generic_names: lower(&config.generic_names),
            subject_rules,
        }
    }

    /// Name matches a known platform, exactly or as a case-insensitive word run.
    pub fn is_platform_name(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.platform_names
            .iter()
            .any(|platform| contains_word(&name, platform))
    }

    /// Domain belongs to a platform (listed domain, subdomain, or named label).
    ///
    /// Names of three letters or fewer only match a whole label.
    pub fn is_platform_domain(&self, domain: &str) -> bool {
        let domain = domain.to_lowercase();
        let listed = self
            .platform_domains
            .iter()
            .any(|d| domain == *d || domain.ends_with(&format!(".{d}")));
        listed
            || domain.split('.').any(|label| {
                self.platform_names
                    .iter()
                    .any(|platform| {
                        label == platform.as_str()
                            || (platform.len() > 3 && label.contains(platform.as_str()))
                    })
            })
    }

    fn is_generic_word(&self, word: &str) -> bool {
        let word = word.to_lowercase();
        self.generic_names.iter().any(|g| *g == word)
    }

    /// Drop department words ("Recruiting", "Talent Acquisition") from a name.
    ///
    /// Returns `None` when nothing meaningful is left or what is left is a platform.
    pub fn strip_generic(&self, name: &str) -> Option<String> {
        let kept: Vec<&str> = name
            .split_whitespace()
            .map(trim_word)
            .filter(|w| !w.is_empty() && !self.is_generic_word(w))
            .collect();
        // Connectors only make sense between kept words.
        let kept = trim_connectors(&kept);
        if kept.is_empty() {
            return None;
        }
        let cleaned = kept.join(" ");
        if cleaned.chars().count() < 2 || self.is_platform_name(&cleaned) {
            None
        } else {
            Some(cleaned)
        }
    }

    /// Organization named in the signature block after a closing phrase.
    ///
    /// Segments after "Regards" are split on commas and line breaks. A
    /// capitalized multi-word segment carrying an organization signal (a
    /// department word or legal suffix) wins; otherwise the first capitalized
    /// multi-word segment that is not the leading one, which is usually the
    /// sender's own name.
    pub fn from_signature(&self, body: &str) -> Option<String> {
        let closing = CLOSING.find_iter(body).last()?;
        let tail: String = body[closing.end()..].chars().take(SIGNATURE_WINDOW).collect();

        let segments: Vec<&str> = tail
            .split([',', '\n', '\r', ';', '|'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        let mut fallback = None;
        for (index, segment) in segments.iter().enumerate() {
            let Some(words) = capitalized_words(segment) else {
                continue;
            };
            if words.len() < 2 {
                continue;
            }
            let has_signal = words.iter().any(|w| {
                self.is_generic_word(w) || COMPANY_SUFFIXES.contains(&w.to_lowercase().as_str())
            });
            let Some(name) = self.strip_generic(&words.join(" ")) else {
                continue;
            };
            if has_signal {
                return Some(name);
            }
            if index > 0 && fallback.is_none() {
                fallback = Some(name);
            }
        }
        fallback
    }

    /// Employer named in an "applying to X via Platform" phrase.
    pub fn from_via_phrase(&self, text: &str) -> Option<String> {
        VIA_PHRASE
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .find_map(|m| self.strip_generic(m.as_str()))
    }

    /// Employer derived from the sender's domain, skipping platform and free-mail domains.
    pub fn from_sender_domain(&self, email: &RawEmail) -> Option<String> {
        let domain = email.sender_domain()?;
        if self.is_platform_domain(&domain) || self.generic_domains.contains(&domain) {
            return None;
        }

        let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
        if labels.len() < 2 {
            return None;
        }
        let mut index = labels.len() - 2;
        let country_code = labels[labels.len() - 1].len() == 2;
        if index > 0 && country_code && SECOND_LEVEL_LABELS.contains(&labels[index]) {
            index -= 1;
        }

        let label = labels[index];
        if label.len() <= 2 || self.is_generic_word(label) || self.is_platform_name(label) {
            return None;
        }
        Some(capitalize(label))
    }

    /// Employer from the sender display name: `"Acme Recruiting" <...>` → `Acme`.
    pub fn from_sender_name(&self, email: &RawEmail) -> Option<String> {
        static RELAY_MARKER: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"(?i)\s+(?:via|über|@)\s+").expect("relay regex is valid")
        });

        let name = email.sender_name()?;
        // "Jane via Greenhouse": nothing after the marker names the employer.
        let name = RELAY_MARKER.split(&name).next().unwrap_or_default();
        let cleaned = self.strip_generic(name)?;
        if cleaned.chars().count() <= 2 {
            None
        } else {
            Some(cleaned)
        }
    }

    /// Employer captured by the first matching subject pattern.
    pub fn from_subject(&self, subject: &str) -> Option<String> {
        self.subject_rules.iter().find_map(|rule| {
            let caps = rule.regex.captures(subject)?;
            let captured = caps.get(rule.group)?.as_str();
            self.strip_generic(&strip_subject_noise(captured))
        })
    }
}

/// Case-insensitive word-run containment (`needle` bounded by non-alphanumerics).
fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn trim_word(word: &str) -> &str {
    word.trim_matches(|c: char| !c.is_alphanumeric() && c != '&')
}

fn trim_connectors<'a>(words: &[&'a str]) -> Vec<&'a str> {
    let is_connector = |w: &&str| CONNECTORS.contains(&w.to_lowercase().as_str());
    let start = words.iter().position(|w| !is_connector(w));
    let end = words.iter().rposition(|w| !is_connector(w));
    match (start, end) {
        (Some(start), Some(end)) => words[start..=end].to_vec(),
        _ => Vec::new(),
    }
}

/// Words of a segment if it reads as a capitalized name, else `None`.
fn capitalized_words(segment: &str) -> Option<Vec<&str>> {
    let words: Vec<&str> = segment
        .split_whitespace()
        .map(trim_word)
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() || words.len() > 6 || segment.chars().count() > 60 {
        return None;
    }
    let all_capitalized = words.iter().all(|w| {
        CONNECTORS.contains(&w.to_lowercase().as_str())
            || w.chars()
                .next()
                .is_some_and(|c| c.is_uppercase() || c.is_ascii_digit())
    });
    all_capitalized.then_some(words)
}

/// Remove trailing subject filler: "Acme application received" → "Acme".
fn strip_subject_noise(captured: &str) -> String {
    static NOISE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?i)\s+(?:application|role|job|position|update|candidates|received|eingegangen|ist\s+abgeschlossen|for\s+the|was\s+sent).*$",
        )
        .expect("noise regex is valid")
    });
    NOISE.replace(captured.trim(), "").trim().to_string()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn resolver() -> CompanyResolver {
        CompanyResolver::new(&ExtractionConfig::default())
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
    fn platform_names_match_case_insensitively() {
        let r = resolver();
        assert!(r.is_platform_name("Workday"));
        assert!(r.is_platform_name("workday"));
        assert!(r.is_platform_name("Acme via Greenhouse"));
        assert!(!r.is_platform_name("Leverage Capital"));
        assert!(!r.is_platform_name("Acme"));
    }

    #[test]
    fn sap_is_a_platform_without_swallowing_lookalikes() {
        let r = resolver();
        assert!(r.is_platform_name("SAP"));
        assert!(r.is_platform_name("SAP SuccessFactors"));
        assert!(!r.is_platform_name("Sapient"));

        assert!(r.is_platform_domain("jobs.sap.com"));
        assert!(!r.is_platform_domain("sapient.com"));
        assert!(!r.is_platform_domain("asap-logistics.com"));
    }

    #[test]
    fn platform_domains_include_subdomains() {
        let r = resolver();
        assert!(r.is_platform_domain("acme.myworkdayjobs.com"));
        assert!(r.is_platform_domain("greenhouse.io"));
        assert!(r.is_platform_domain("mail.personio.de"));
        assert!(!r.is_platform_domain("acme.com"));
    }

    #[test]
    fn signature_prefers_organization_segment() {
        let r = resolver();
        let body = "Thanks for applying to Acme via Workday. Regards, Jane, Acme Recruiting";
        assert_eq!(r.from_signature(body).as_deref(), Some("Acme"));
    }

    #[test]
    fn signature_with_legal_suffix() {
        let r = resolver();
        let body = "Wir melden uns.\n\nMit freundlichen Grüßen\nMax Mustermann\nMusterfirma GmbH\n";
        assert_eq!(r.from_signature(body).as_deref(), Some("Musterfirma GmbH"));
    }

    #[test]
    fn signature_skips_leading_person_name() {
        let r = resolver();
        let body = "Best regards,\nJane Doe\nGlobex Industries";
        assert_eq!(r.from_signature(body).as_deref(), Some("Globex Industries"));
    }

    #[test]
    fn signature_with_only_person_name_yields_nothing() {
        let r = resolver();
        assert!(r.from_signature("Regards,\nJane Doe").is_none());
    }

    #[test]
    fn signature_without_closing_yields_nothing() {
        let r = resolver();
        assert!(r.from_signature("Acme Recruiting will be in touch.").is_none());
    }

    #[test]
    fn signature_never_returns_platform() {
        let r = resolver();
        assert!(r.from_signature("Regards,\nThe Team\nWorkday Notifications").is_none());
    }

    #[test]
    fn via_phrase_names_employer() {
        let r = resolver();
        assert_eq!(
            r.from_via_phrase("Thanks for applying to Acme via Workday.").as_deref(),
            Some("Acme")
        );
        assert!(r.from_via_phrase("Sent via Workday").is_none());
    }

    #[test]
    fn domain_skips_platforms_and_free_mail() {
        let r = resolver();
        assert!(r.from_sender_domain(&email("noreply@myworkdayjobs.com", "", "")).is_none());
        assert!(r.from_sender_domain(&email("jane@gmail.com", "", "")).is_none());
        assert_eq!(
            r.from_sender_domain(&email("Acme <jobs@careers.acme.com>", "", "")).as_deref(),
            Some("Acme")
        );
    }

    #[test]
    fn domain_handles_country_second_level() {
        let r = resolver();
        assert_eq!(
            r.from_sender_domain(&email("hr@initech.co.uk", "", "")).as_deref(),
            Some("Initech")
        );
    }

    #[test]
    fn sender_name_drops_department_words() {
        let r = resolver();
        assert_eq!(
            r.from_sender_name(&email("\"Globex Talent Acquisition\" <x@y.com>", "", ""))
                .as_deref(),
            Some("Globex")
        );
        assert!(r.from_sender_name(&email("\"Hiring Team\" <x@y.com>", "", "")).is_none());
        assert!(r.from_sender_name(&email("Workday <x@y.com>", "", "")).is_none());
    }

    #[test]
    fn subject_pattern_captures_company() {
        let r = resolver();
        assert_eq!(
            r.from_subject("Your application to Initech").as_deref(),
            Some("Initech")
        );
        assert_eq!(
            r.from_subject("Ihre Bewerbung bei Musterfirma ist eingegangen").as_deref(),
            Some("Musterfirma")
        );
        assert!(r.from_subject("hello there").is_none());
    }

    #[test]
    fn contains_word_respects_boundaries() {
        assert!(contains_word("acme via workday", "workday"));
        assert!(!contains_word("cleverly", "lever"));
        assert!(!contains_word("anything", ""));
    }
}
