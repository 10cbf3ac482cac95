//! Per-call choice between the configured provider and the built-in responder.

use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, ProviderMode};

/// Strategy actually used to answer one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectiveMode {
    Provider,
    Fallback,
}

impl EffectiveMode {
    pub fn as_str(self) -> &'static str {
        match self {
            EffectiveMode::Provider => "provider",
            EffectiveMode::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for EffectiveMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Provider` only when the host asked for it and supplied a non-blank key.
/// Anything else answers with the fallback responder; this never fails.
///
/// Evaluated on every send, independent of the cached runtime bundle, so a
/// key added or removed between calls takes effect immediately.
pub fn resolve_mode(config: &AppConfig) -> EffectiveMode {
    match config.mode {
        ProviderMode::Provider if config.provider.has_credentials() => EffectiveMode::Provider,
        ProviderMode::Provider | ProviderMode::Fallback => EffectiveMode::Fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderFamily;

    fn provider_config(family: ProviderFamily, key: &str) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.mode = ProviderMode::Provider;
        cfg.provider.family = family;
        cfg.provider.api_key = key.to_string();
        cfg
    }

    #[test]
    fn default_config_is_fallback() {
        assert_eq!(resolve_mode(&AppConfig::default()), EffectiveMode::Fallback);
    }

    #[test]
    fn provider_without_credentials_falls_back() {
        for family in [ProviderFamily::OpenAi, ProviderFamily::Xai, ProviderFamily::Dummy] {
            for key in ["", "   ", "\t\n"] {
                assert_eq!(resolve_mode(&provider_config(family, key)), EffectiveMode::Fallback);
            }
        }
    }

    #[test]
    fn provider_with_credentials_is_used() {
        for family in [ProviderFamily::OpenAi, ProviderFamily::Xai, ProviderFamily::Dummy] {
            assert_eq!(resolve_mode(&provider_config(family, "k")), EffectiveMode::Provider);
        }
    }

    #[test]
    fn fallback_mode_ignores_credentials() {
        let mut cfg = provider_config(ProviderFamily::OpenAi, "k");
        cfg.mode = ProviderMode::Fallback;
        assert_eq!(resolve_mode(&cfg), EffectiveMode::Fallback);
    }

    #[test]
    fn serialises_lowercase() {
        assert_eq!(serde_json::to_string(&EffectiveMode::Fallback).unwrap(), "\"fallback\"");
        assert_eq!(EffectiveMode::Provider.to_string(), "provider");
    }
}
