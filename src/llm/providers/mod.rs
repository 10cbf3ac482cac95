//! LLM provider implementations.
//!
//! `build(family, endpoint)` is the factory, called during runtime bundle
//! construction, once per cache key.

pub mod dummy;
pub mod openai_compatible;

use crate::config::ProviderFamily;
use crate::llm::{LlmProvider, ProviderError};

/// Construct the backend for `family` talking to `endpoint` (an API root such
/// as `https://api.openai.com/v1`).
pub fn build(family: ProviderFamily, endpoint: &str) -> Result<LlmProvider, ProviderError> {
    match family {
        ProviderFamily::Dummy => Ok(LlmProvider::Dummy(dummy::DummyProvider)),
        ProviderFamily::OpenAi | ProviderFamily::Xai => {
            let p = openai_compatible::OpenAiCompatibleProvider::new(endpoint)?;
            Ok(LlmProvider::OpenAiCompatible(p))
        }
    }
}
