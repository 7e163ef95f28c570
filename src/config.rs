//! Configuration types.
//!
//! Everything the pipeline consumes but does not own: provider order and
//! timeouts, the dedup window, the keyword override table, platform lists.
//! Loaded from an optional TOML file, then overridden by `JOB_TRACKER_*`
//! environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::pipeline::types::Status;

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub database: DatabaseConfig,
    /// Extraction backends in priority order.
    pub providers: Vec<ProviderConfig>,
    pub extraction: ExtractionConfig,
    /// Language-tagged status override table.
    pub keywords: Vec<KeywordRule>,
    pub dedup: DedupConfig,
    pub pipeline: PipelineConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            providers: Vec::new(),
            extraction: ExtractionConfig::default(),
            keywords: default_keywords(),
            dedup: DedupConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/job-tracker.db"),
        }
    }
}

/// Supported extraction backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderBackend {
    Anthropic,
    #[serde(alias = "open_ai")]
    OpenAi,
    /// Local model served over an Ollama-compatible HTTP API.
    Ollama,
}

/// One extraction backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub backend: ProviderBackend,
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider_timeout_secs() -> u64 {
    60
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolve the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<Option<SecretString>, ConfigError> {
        let Some(ref var) = self.api_key_env else {
            return Ok(None);
        };
        match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => Ok(Some(SecretString::from(value))),
            _ => Err(ConfigError::MissingEnvVar(var.clone())),
        }
    }
}

/// Regex applied to the subject line when nothing else yields a company.
#[derive(Debug, Clone, Deserialize)]
pub struct SubjectPattern {
    pub pattern: String,
    #[serde(default = "default_capture_group")]
    pub group: usize,
}

fn default_capture_group() -> usize {
    1
}

/// Inputs for company-name recovery and the heuristic extractor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Applicant-tracking platforms that must never be reported as the employer.
    pub platform_names: Vec<String>,
    /// Sender domains owned by those platforms.
    pub platform_domains: Vec<String>,
    /// Free-mail domains that say nothing about the employer.
    pub generic_domains: Vec<String>,
    /// Words that mark a department rather than a company ("Recruiting", "Team").
    pub generic_names: Vec<String>,
    /// Body characters included in the model prompt.
    pub max_body_chars: usize,
    pub subject_patterns: Vec<SubjectPattern>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            platform_names: to_strings(&[
                "Workday",
                "Greenhouse",
                "SmartRecruiters",
                "Lever",
                "Ashby",
                "Jobvite",
                "Breezy",
                "Recruitee",
                "Personio",
                "Workable",
                "SuccessFactors",
                "SAP",
            ]),
            platform_domains: to_strings(&[
                "myworkdayjobs.com",
                "myworkday.com",
                "workday.com",
                "successfactors.eu",
                "successfactors.com",
                "greenhouse.io",
                "smartrecruiters.com",
                "lever.co",
                "ashbyhq.com",
                "ashby.io",
                "jobvite.com",
                "breezy.hr",
                "recruitee.com",
                "personio.de",
                "personio.com",
                "workable.com",
            ]),
            generic_domains: to_strings(&[
                "gmail.com",
                "googlemail.com",
                "yahoo.com",
                "outlook.com",
                "hotmail.com",
                "icloud.com",
                "me.com",
                "live.com",
                "msn.com",
                "web.de",
                "gmx.de",
                "t-online.de",
            ]),
            generic_names: to_strings(&[
                "hiring",
                "team",
                "recruiting",
                "recruitment",
                "recruiter",
                "careers",
                "career",
                "jobs",
                "notifications",
                "notification",
                "no-reply",
                "noreply",
                "via",
                "bewerbermanagement",
                "personalabteilung",
                "system",
                "hr",
                "human",
                "resources",
                "talent",
                "acquisition",
                "people",
            ]),
            max_body_chars: 3500,
            subject_patterns: vec![
                SubjectPattern {
                    pattern: r"(?:[Aa]pplication (?:to|at|with)|[Aa]pplying to|[Bb]ewerbung bei)\s+([A-Z][\w&.\-]*(?:\s+[A-Z][\w&.\-]*)*)".into(),
                    group: 1,
                },
                SubjectPattern {
                    pattern: r"^([A-Z][\w&.\-]*(?:\s+[A-Z][\w&.\-]*)*)\s*[|:\-]\s".into(),
                    group: 1,
                },
            ],
        }
    }
}

/// One row of the status override table.
#[derive(Debug, Clone, Deserialize)]
pub struct KeywordRule {
    /// Case-insensitive substring searched in subject + body.
    pub keyword: String,
    /// ISO 639-1 tag, informational.
    #[serde(default = "default_language")]
    pub language: String,
    pub status: Status,
    /// Higher wins; compared against the candidate's implied confidence.
    pub priority: u8,
}

fn default_language() -> String {
    "en".to_string()
}

fn keyword(keyword: &str, language: &str, status: Status, priority: u8) -> KeywordRule {
    KeywordRule {
        keyword: keyword.to_string(),
        language: language.to_string(),
        status,
        priority,
    }
}

/// Built-in English/German override table.
pub fn default_keywords() -> Vec<KeywordRule> {
    vec![
        keyword("pleased to offer", "en", Status::Offer, 95),
        keyword("offer letter", "en", Status::Offer, 95),
        keyword("vertragsangebot", "de", Status::Offer, 95),
        keyword("not moving forward", "en", Status::Rejected, 90),
        keyword("unfortunately", "en", Status::Rejected, 90),
        keyword("we regret", "en", Status::Rejected, 90),
        keyword("other candidates", "en", Status::Rejected, 90),
        keyword("absage", "de", Status::Rejected, 90),
        keyword("leider", "de", Status::Rejected, 88),
        keyword("anderen kandidaten", "de", Status::Rejected, 88),
        keyword("interview", "en", Status::Interview, 70),
        keyword("schedule a time", "en", Status::Interview, 70),
        keyword("vorstellungsgespräch", "de", Status::Interview, 70),
        keyword("kennenlerngespräch", "de", Status::Interview, 70),
        keyword("coding challenge", "en", Status::Assessment, 60),
        keyword("take-home", "en", Status::Assessment, 60),
        keyword("assessment", "en", Status::Assessment, 60),
        keyword("hackerrank", "en", Status::Assessment, 60),
        keyword("codility", "en", Status::Assessment, 60),
        keyword("arbeitsprobe", "de", Status::Assessment, 60),
        keyword("testaufgabe", "de", Status::Assessment, 60),
        keyword("thank you for applying", "en", Status::Applied, 20),
        keyword("application received", "en", Status::Applied, 20),
        keyword("we have received your application", "en", Status::Applied, 20),
        keyword("vielen dank für ihre bewerbung", "de", Status::Applied, 20),
        keyword("bewerbung eingegangen", "de", Status::Applied, 20),
    ]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Max distance between a thread's last update and a new email.
    pub lookback_days: i64,
    /// Minimum token overlap (Jaccard) for a fuzzy position match.
    pub token_overlap_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            lookback_days: 90,
            token_overlap_threshold: 0.5,
        }
    }
}

impl DedupConfig {
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::days(self.lookback_days)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Emails processed in parallel by `process_batch`.
    pub max_concurrency: usize,
    /// How long a failed provider is skipped for later emails. 0 disables.
    pub provider_cooldown_secs: u64,
    /// Sender domains ignored entirely.
    pub skip_domains: Vec<String>,
    /// Sender addresses ignored entirely.
    pub skip_senders: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            provider_cooldown_secs: 300,
            skip_domains: Vec::new(),
            skip_senders: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn provider_cooldown(&self) -> Duration {
        Duration::from_secs(self.provider_cooldown_secs)
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl TrackerConfig {
    /// Load from an optional TOML file, apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply `JOB_TRACKER_*` overrides using the given lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("JOB_TRACKER_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(days) = lookup("JOB_TRACKER_LOOKBACK_DAYS") {
            self.dedup.lookback_days = parse_value("JOB_TRACKER_LOOKBACK_DAYS", &days)?;
        }
        if let Some(threshold) = lookup("JOB_TRACKER_OVERLAP_THRESHOLD") {
            self.dedup.token_overlap_threshold =
                parse_value("JOB_TRACKER_OVERLAP_THRESHOLD", &threshold)?;
        }
        if let Some(concurrency) = lookup("JOB_TRACKER_MAX_CONCURRENCY") {
            self.pipeline.max_concurrency =
                parse_value("JOB_TRACKER_MAX_CONCURRENCY", &concurrency)?;
        }
        if let Some(timeout) = lookup("JOB_TRACKER_PROVIDER_TIMEOUT_SECS") {
            let secs: u64 = parse_value("JOB_TRACKER_PROVIDER_TIMEOUT_SECS", &timeout)?;
            for provider in &mut self.providers {
                provider.timeout_secs = secs;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.dedup.token_overlap_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(invalid(
                "dedup.token_overlap_threshold",
                format!("must be in (0, 1], got {threshold}"),
            ));
        }
        if self.dedup.lookback_days <= 0 {
            return Err(invalid("dedup.lookback_days", "must be > 0"));
        }
        if self.pipeline.max_concurrency == 0 {
            return Err(invalid("pipeline.max_concurrency", "must be > 0"));
        }
        if self.extraction.max_body_chars == 0 {
            return Err(invalid("extraction.max_body_chars", "must be > 0"));
        }
        for provider in &self.providers {
            if provider.timeout_secs == 0 {
                return Err(invalid(
                    &format!("providers.{}.timeout_secs", provider.name),
                    "must be > 0",
                ));
            }
            if provider.model.trim().is_empty() {
                return Err(invalid(
                    &format!("providers.{}.model", provider.name),
                    "must not be empty",
                ));
            }
        }
        if let Some(rule) = self.keywords.iter().find(|r| r.keyword.trim().is_empty()) {
            return Err(invalid(
                "keywords",
                format!("empty keyword for status {}", rule.status),
            ));
        }
        for pattern in &self.extraction.subject_patterns {
            regex::Regex::new(&pattern.pattern).map_err(|e| {
                invalid("extraction.subject_patterns", format!("{}: {e}", pattern.pattern))
            })?;
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| invalid(key, format!("cannot parse '{raw}'")))
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}
