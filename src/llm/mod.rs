//! LLM provider abstraction.
//!
//! `LlmProvider` is an enum over concrete provider implementations.
//! Add a new variant + module in `providers/` for each additional backend.
//!
//! A provider instance is the *shape* of a backend (family, endpoint, HTTP
//! client).  Credentials, model and history travel in each [`LlmRequest`], so
//! one cached instance keeps working across key rotation.

pub mod providers;

use std::time::Duration;

use thiserror::Error;

use crate::subsystems::memory::ChatMessage;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider did not answer within {0:?}")]
    Timeout(Duration),
    #[error("provider returned an empty response")]
    EmptyResponse,
}

// ── Request / response ────────────────────────────────────────────────────────

/// One round-trip worth of input.
#[derive(Debug, Clone, Copy)]
pub struct LlmRequest<'a> {
    /// System prompt (persona).
    pub system: &'a str,
    /// Prior turns, oldest first.  Already trimmed to the context window.
    pub history: &'a [ChatMessage],
    /// The new user message.
    pub text: &'a str,
    pub model: &'a str,
    pub api_key: &'a str,
    pub temperature: Option<f32>,
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Default)]
pub struct LlmUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Option<LlmUsage>,
}

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends.
///
/// Enum dispatch avoids `dyn` trait objects and the `async-trait` dependency.
/// Adding a backend = new module + new variant + new `complete` arm.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
    Dummy(providers::dummy::DummyProvider),
}

impl LlmProvider {
    /// Send the request and return the provider's text reply.
    pub async fn complete(&self, request: LlmRequest<'_>) -> Result<LlmResponse, ProviderError> {
        match self {
            LlmProvider::OpenAiCompatible(p) => p.complete(request).await,
            LlmProvider::Dummy(p) => p.complete(request).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LlmProvider::OpenAiCompatible(_) => "openai-compatible",
            LlmProvider::Dummy(_) => "dummy",
        }
    }
}
