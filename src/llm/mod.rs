//! Extraction backends.
//!
//! Supports:
//! - **Anthropic**: hosted, via rig-core
//! - **OpenAI**: hosted, via rig-core
//! - **Ollama**: local model over HTTP, via reqwest
//!
//! Every backend is exposed as a `Provider`; the chain in
//! `pipeline::chain` decides the order they are tried in.

mod ollama;
pub mod prompt;
pub mod provider;
mod rig_adapter;

pub use ollama::OllamaProvider;
pub use prompt::{PREAMBLE, SCHEMA_HINT, prompt_for};
pub use provider::{Provider, with_schema};
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::{ExposeSecret, SecretString};

use crate::config::{ProviderBackend, ProviderConfig};
use crate::error::ConfigError;

const EXTRACTION_TEMPERATURE: f64 = 0.1;
const EXTRACTION_MAX_TOKENS: u64 = 1024;

/// Create a provider from configuration.
///
/// Hosted backends need an API key; when `api_key_env` is unset the
/// conventional variable for the backend is used.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>, ConfigError> {
    match config.backend {
        ProviderBackend::Anthropic => {
            let key = hosted_key(config, "ANTHROPIC_API_KEY")?;
            create_anthropic_provider(&config.name, &config.model, &key)
        }
        ProviderBackend::OpenAi => {
            let key = hosted_key(config, "OPENAI_API_KEY")?;
            create_openai_provider(&config.name, &config.model, &key)
        }
        ProviderBackend::Ollama => {
            let provider =
                OllamaProvider::new(&config.name, &config.model, config.base_url.as_deref())
                    .map_err(|e| ConfigError::InvalidValue {
                        key: format!("providers.{}", config.name),
                        message: e.to_string(),
                    })?;
            tracing::info!("Using Ollama (model: {})", config.model);
            Ok(Arc::new(provider))
        }
    }
}

fn hosted_key(config: &ProviderConfig, default_env: &str) -> Result<SecretString, ConfigError> {
    if let Some(key) = config.api_key()? {
        return Ok(key);
    }
    match std::env::var(default_env) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretString::from(value)),
        _ => Err(ConfigError::MissingEnvVar(default_env.to_string())),
    }
}

fn create_anthropic_provider(
    name: &str,
    model: &str,
    api_key: &SecretString,
) -> Result<Arc<dyn Provider>, ConfigError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(api_key.expose_secret()).map_err(|e| {
            ConfigError::InvalidValue {
                key: format!("providers.{name}"),
                message: format!("Failed to create Anthropic client: {e}"),
            }
        })?;

    let agent = client
        .agent(model)
        .preamble(PREAMBLE)
        .temperature(EXTRACTION_TEMPERATURE)
        .max_tokens(EXTRACTION_MAX_TOKENS)
        .build();
    tracing::info!("Using Anthropic (model: {})", model);
    Ok(Arc::new(RigAdapter::new(name, model, agent)))
}

fn create_openai_provider(
    name: &str,
    model: &str,
    api_key: &SecretString,
) -> Result<Arc<dyn Provider>, ConfigError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(api_key.expose_secret()).map_err(|e| ConfigError::InvalidValue {
            key: format!("providers.{name}"),
            message: format!("Failed to create OpenAI client: {e}"),
        })?;

    let agent = client
        .agent(model)
        .preamble(PREAMBLE)
        .temperature(EXTRACTION_TEMPERATURE)
        .max_tokens(EXTRACTION_MAX_TOKENS)
        .build();
    tracing::info!("Using OpenAI (model: {})", model);
    Ok(Arc::new(RigAdapter::new(name, model, agent)))
}
