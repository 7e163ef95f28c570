//! Provider chain: ordered failover across extraction backends.
//!
//! For one email each provider is tried at most once, in order. A provider
//! reply goes through recovery parsing, normalization and refinement; the
//! first structurally usable candidate wins. When every provider fails the
//! heuristic extractor answers, so `extract` never fails.
//!
//! A failed provider is put on cooldown and skipped for later emails until
//! the cooldown runs out.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::error::{ConfigError, ProviderError};
use crate::llm::{Provider, SCHEMA_HINT, create_provider, prompt_for};
use crate::pipeline::heuristic::{HeuristicExtractor, RuleBasedExtractor};
use crate::pipeline::normalize::normalize;
use crate::pipeline::recovery;
use crate::pipeline::refine::RefinementEngine;
use crate::pipeline::types::{ConfidenceSource, ExtractionCandidate, RawEmail};

/// Why one provider attempt produced no candidate.
#[derive(Debug)]
enum AttemptFailure {
    Provider(ProviderError),
    Unparseable(String),
    Incomplete,
}

impl AttemptFailure {
    fn label(&self) -> &'static str {
        match self {
            Self::Provider(_) => "provider_error",
            Self::Unparseable(_) => "parse_failure",
            Self::Incomplete => "incomplete_candidate",
        }
    }
}

struct ProviderSlot {
    provider: Arc<dyn Provider>,
    timeout: Duration,
    /// Skip this provider until the instant passes.
    cooldown_until: Mutex<Option<Instant>>,
}

impl ProviderSlot {
    fn cooling_down(&self, now: Instant) -> bool {
        match self.cooldown_until.lock() {
            Ok(guard) => guard.is_some_and(|until| now < until),
            Err(_) => false,
        }
    }

    fn set_cooldown(&self, until: Option<Instant>) {
        if let Ok(mut guard) = self.cooldown_until.lock() {
            *guard = until;
        }
    }
}

pub struct ProviderChain {
    slots: Vec<ProviderSlot>,
    refinement: RefinementEngine,
    heuristic: Arc<dyn HeuristicExtractor>,
    max_body_chars: usize,
    cooldown: Duration,
}

impl ProviderChain {
    pub fn new(
        refinement: RefinementEngine,
        heuristic: Arc<dyn HeuristicExtractor>,
        max_body_chars: usize,
    ) -> Self {
        Self {
            slots: Vec::new(),
            refinement,
            heuristic,
            max_body_chars,
            cooldown: Duration::ZERO,
        }
    }

    /// Build from configuration: providers in priority order, rule-based fallback.
    pub fn from_config(config: &TrackerConfig) -> Result<Self, ConfigError> {
        let mut chain = Self::new(
            RefinementEngine::from_config(config),
            Arc::new(RuleBasedExtractor::from_config(config)),
            config.extraction.max_body_chars,
        )
        .with_cooldown(config.pipeline.provider_cooldown());

        for provider_config in &config.providers {
            let provider = create_provider(provider_config)?;
            chain = chain.with_provider(provider, provider_config.timeout());
        }
        Ok(chain)
    }

    /// Append a provider after the existing ones.
    pub fn with_provider(mut self, provider: Arc<dyn Provider>, timeout: Duration) -> Self {
        self.slots.push(ProviderSlot {
            provider,
            timeout,
            cooldown_until: Mutex::new(None),
        });
        self
    }

    /// Cooldown applied to a provider after it fails. Zero disables.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Extract a refined candidate for one email. Never fails.
    pub async fn extract(&self, email: &RawEmail) -> ExtractionCandidate {
        let prompt = prompt_for(email, self.max_body_chars);

        for slot in &self.slots {
            let name = slot.provider.name();
            if slot.cooling_down(Instant::now()) {
                debug!(email_id = %email.id, provider = %name, "Skipping provider on cooldown");
                continue;
            }

            match self.attempt(slot, &prompt, email).await {
                Ok(candidate) => {
                    slot.set_cooldown(None);
                    info!(
                        email_id = %email.id,
                        provider = %name,
                        company = ?candidate.company_name,
                        status = %candidate.status,
                        "Extracted with provider"
                    );
                    return candidate;
                }
                Err(failure) => {
                    match &failure {
                        AttemptFailure::Provider(e) => warn!(
                            email_id = %email.id,
                            provider = %name,
                            kind = %e.kind,
                            reason = %e.reason,
                            "Provider failed, trying next"
                        ),
                        AttemptFailure::Unparseable(reason) => warn!(
                            email_id = %email.id,
                            provider = %name,
                            reason = %reason,
                            "Unparseable provider output, trying next"
                        ),
                        AttemptFailure::Incomplete => warn!(
                            email_id = %email.id,
                            provider = %name,
                            "Provider output has no usable company, trying next"
                        ),
                    }
                    // Bad output from a working backend is not a reason to bench it.
                    if matches!(failure, AttemptFailure::Provider(_)) && !self.cooldown.is_zero()
                    {
                        slot.set_cooldown(Some(Instant::now() + self.cooldown));
                    }
                    debug!(provider = %name, failure = failure.label(), "Attempt failed");
                }
            }
        }

        let candidate = self.heuristic_fallback(email);
        info!(
            email_id = %email.id,
            company = ?candidate.company_name,
            status = %candidate.status,
            "All providers failed, used heuristic extraction"
        );
        candidate
    }

    async fn attempt(
        &self,
        slot: &ProviderSlot,
        prompt: &str,
        email: &RawEmail,
    ) -> Result<ExtractionCandidate, AttemptFailure> {
        let name = slot.provider.name();
        let raw = tokio::time::timeout(
            slot.timeout,
            slot.provider.generate(prompt, SCHEMA_HINT, slot.timeout),
        )
        .await
        .map_err(|_| AttemptFailure::Provider(ProviderError::timeout(name, slot.timeout)))?
        .map_err(AttemptFailure::Provider)?;

        let mapping =
            recovery::parse(&raw).map_err(|e| AttemptFailure::Unparseable(e.reason))?;
        let candidate = self.refinement.refine(normalize(&mapping), email);

        if candidate.is_well_formed() {
            Ok(candidate)
        } else {
            Err(AttemptFailure::Incomplete)
        }
    }

    fn heuristic_fallback(&self, email: &RawEmail) -> ExtractionCandidate {
        let mut candidate = self.refinement.refine(self.heuristic.extract(email), email);
        candidate.confidence_source = ConfidenceSource::Heuristic;
        candidate
    }
}
