//! Provider capability consumed by the extraction chain.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;

/// An extraction backend: local or hosted language model.
///
/// Implementations only turn a prompt into raw text. Parsing, normalization
/// and refinement of that text happen in the chain. Implementations should
/// honor `timeout` in their transport; the chain also enforces it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Name used in logs, cooldown tracking and errors.
    fn name(&self) -> &str;

    /// Model identifier.
    fn model_name(&self) -> &str;

    /// Generate raw text for `prompt`, asked to conform to `schema_hint`.
    async fn generate(
        &self,
        prompt: &str,
        schema_hint: &str,
        timeout: Duration,
    ) -> Result<String, ProviderError>;
}

/// Append the schema instruction for backends without native structured output.
pub fn with_schema(prompt: &str, schema_hint: &str) -> String {
    if schema_hint.trim().is_empty() {
        return prompt.to_string();
    }
    format!(
        "{prompt}\n\nRespond with a single JSON object matching this schema and nothing else:\n{schema_hint}"
    )
}
