//! Response strategies: the per-call [`selector`] and the credential-free
//! [`fallback`] responder.

pub mod fallback;
pub mod selector;

pub use fallback::FallbackResponder;
pub use selector::{EffectiveMode, resolve_mode};

use crate::config::AppConfig;

/// System prompt handed to providers for the configured persona.
pub fn system_prompt(config: &AppConfig) -> String {
    format!(
        "You are {}, a warm and attentive conversational companion. \
         Keep replies short, kind and focused on the user.",
        config.agent_name()
    )
}

/// Opening line for the configured persona.  Pure: no I/O, no cache.
pub fn greeting_text(config: &AppConfig) -> String {
    match resolve_mode(config) {
        EffectiveMode::Fallback => FallbackResponder::new().greeting(config.agent_name()),
        EffectiveMode::Provider => format!(
            "Hello! I'm {}. What would you like to chat about?",
            config.agent_name()
        ),
    }
}
