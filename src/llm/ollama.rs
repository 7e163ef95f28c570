//! Local model served over an Ollama-compatible HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{ProviderError, ProviderErrorKind};
use crate::llm::prompt::PREAMBLE;
use crate::llm::provider::Provider;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    /// Either `"json"` or a JSON schema object.
    format: Value,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

pub struct OllamaProvider {
    name: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        base_url: Option<&str>,
    ) -> Result<Self, ProviderError> {
        let name = name.into();
        let client = reqwest::Client::builder().build().map_err(|e| {
            ProviderError::new(
                &name,
                ProviderErrorKind::Unavailable,
                format!("Failed to build HTTP client: {e}"),
            )
        })?;
        Ok(Self {
            name,
            model: model.into(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn transport_error(&self, e: reqwest::Error, timeout: Duration) -> ProviderError {
        if e.is_timeout() {
            ProviderError::timeout(&self.name, timeout)
        } else if e.is_connect() {
            ProviderError::new(
                &self.name,
                ProviderErrorKind::Unavailable,
                format!("Cannot reach {}: {e}", self.base_url),
            )
        } else {
            ProviderError::classify(&self.name, e.to_string())
        }
    }
}

/// Ollama accepts a schema object as `format`; fall back to plain JSON mode.
fn output_format(schema_hint: &str) -> Value {
    match serde_json::from_str::<Value>(schema_hint) {
        Ok(schema @ Value::Object(_)) => schema,
        _ => Value::String("json".to_string()),
    }
}

/// Map a non-success HTTP reply to a provider error.
fn status_error(provider: &str, status: StatusCode, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| body.trim().to_string());

    if status == StatusCode::TOO_MANY_REQUESTS {
        return ProviderError::new(provider, ProviderErrorKind::Quota, message);
    }
    let classified = ProviderError::classify(provider, format!("HTTP {status}: {message}"));
    // A 5xx naming no cause is simply an unavailable backend.
    if classified.kind == ProviderErrorKind::Timeout && status != StatusCode::GATEWAY_TIMEOUT {
        return ProviderError::new(provider, ProviderErrorKind::Unavailable, classified.reason);
    }
    classified
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        schema_hint: &str,
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        let body = GenerateRequest {
            model: &self.model,
            system: PREAMBLE,
            prompt,
            format: output_format(schema_hint),
            stream: false,
            options: GenerateOptions { temperature: 0.1 },
        };

        debug!(provider = %self.name, model = %self.model, "Calling local model");

        let response = self
            .client
            .post(self.endpoint())
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(&self.name, status, &text));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error(e, timeout))?;

        if parsed.response.trim().is_empty() {
            return Err(ProviderError::new(
                &self.name,
                ProviderErrorKind::Unavailable,
                "empty response",
            ));
        }
        Ok(parsed.response)
    }
}
