//! Dummy LLM provider. Echoes input back prefixed with `[echo]`.
//! Used to exercise the provider path without a real endpoint.

use crate::llm::{LlmRequest, LlmResponse, ProviderError};

#[derive(Debug, Clone)]
pub struct DummyProvider;

impl DummyProvider {
    pub async fn complete(&self, request: LlmRequest<'_>) -> Result<LlmResponse, ProviderError> {
        Ok(LlmResponse { text: format!("[echo] {}", request.text), usage: None })
    }
}
