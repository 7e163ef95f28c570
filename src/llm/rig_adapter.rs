//! Adapter from rig agents to the `Provider` trait.

use std::time::Duration;

use async_trait::async_trait;
use rig::agent::Agent;
use rig::completion::{CompletionModel, Prompt};
use tracing::debug;

use crate::error::ProviderError;
use crate::llm::provider::{Provider, with_schema};

/// Hosted model behind a rig agent.
///
/// rig has no per-request timeout, so `timeout` is left to the chain.
pub struct RigAdapter<M: CompletionModel> {
    name: String,
    model_name: String,
    agent: Agent<M>,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(name: impl Into<String>, model_name: impl Into<String>, agent: Agent<M>) -> Self {
        Self {
            name: name.into(),
            model_name: model_name.into(),
            agent,
        }
    }
}

#[async_trait]
impl<M> Provider for RigAdapter<M>
where
    M: CompletionModel + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn generate(
        &self,
        prompt: &str,
        schema_hint: &str,
        _timeout: Duration,
    ) -> Result<String, ProviderError> {
        let request = with_schema(prompt, schema_hint);
        debug!(provider = %self.name, model = %self.model_name, chars = request.len(), "Prompting hosted model");

        self.agent
            .prompt(request.as_str())
            .await
            .map_err(|e| ProviderError::classify(&self.name, e.to_string()))
    }
}
