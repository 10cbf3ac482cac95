//! Conversation session controller: the five host-facing operations.
//!
//! ```text
//!   host ──▶ ConversationManager ──▶ RuntimeCache ──▶ BundleBuilder
//!                  │                      │
//!                  │                      └─▶ RuntimeBundle (provider)
//!                  ├─▶ resolve_mode / FallbackResponder
//!                  └─▶ MessageStore (history.json per conversation)
//! ```
//!
//! Every operation takes plain data (an [`AppConfig`] and an optional data
//! directory) and returns plain data.  The manager owns the runtime cache and
//! the message store; hosts that want a single process-wide instance use
//! [`ConversationManager::shared`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, Settings};
use crate::error::ChatError;
use crate::llm::{LlmRequest, ProviderError};
use crate::subsystems::chat::{self, EffectiveMode, resolve_mode};
use crate::subsystems::memory::{ChatMessage, MessageStore};
use crate::subsystems::runtime::{
    BundleBuilder, DefaultBundleBuilder, RuntimeBundle, RuntimeCache, build_key, normalize_dir,
};

/// Result of one [`send_message`](ConversationManager::send_message) call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub response_text: String,
    /// The strategy that actually produced `response_text`.
    pub effective_mode: EffectiveMode,
}

static SHARED: LazyLock<ConversationManager> =
    LazyLock::new(|| ConversationManager::new(&Settings::default()));

pub struct ConversationManager<B = DefaultBundleBuilder> {
    default_data_dir: PathBuf,
    provider_timeout: Duration,
    history_context: usize,
    cache: RuntimeCache<B>,
    store: MessageStore,
}

impl ConversationManager<DefaultBundleBuilder> {
    pub fn new(settings: &Settings) -> Self {
        Self::with_builder(settings, DefaultBundleBuilder)
    }

    /// Lazily-initialised process-wide manager using built-in settings.
    pub fn shared() -> &'static ConversationManager {
        &SHARED
    }
}

impl<B: BundleBuilder> ConversationManager<B> {
    pub fn with_builder(settings: &Settings, builder: B) -> Self {
        Self {
            default_data_dir: settings.data_dir.clone(),
            provider_timeout: settings.provider_timeout,
            history_context: settings.history_context,
            cache: RuntimeCache::new(builder),
            store: MessageStore::new(settings.history_cap),
        }
    }

    fn data_dir(&self, data_dir: Option<&Path>) -> PathBuf {
        normalize_dir(data_dir.unwrap_or(&self.default_data_dir))
    }

    /// Cached bundle for `(config, data_dir)`, built on first use.
    pub async fn get_or_create_runtime(
        &self,
        config: &AppConfig,
        data_dir: Option<&Path>,
    ) -> Result<Arc<RuntimeBundle>, ChatError> {
        let key = build_key(config, &self.data_dir(data_dir));
        Ok(self.cache.get_or_create(&key).await?)
    }

    /// Answer `text` and record the turn.
    ///
    /// Provider failures and timeouts degrade to the fallback responder and
    /// are reported only through `effective_mode`.  The user message and the
    /// reply are stored together; on a storage error neither is kept.
    pub async fn send_message(
        &self,
        config: &AppConfig,
        text: &str,
        data_dir: Option<&Path>,
    ) -> Result<SendOutcome, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::InvalidInput("message text is empty".into()));
        }

        let dir = self.data_dir(data_dir);
        let conversation = config.conversation_id();
        let bundle = self.cache.get_or_create(&build_key(config, &dir)).await?;
        let history = self.store.list(conversation, &dir).await?;

        let (response_text, effective_mode) = match resolve_mode(config) {
            EffectiveMode::Provider => match self.ask_provider(&bundle, config, &history, text).await {
                Ok(reply) => (reply, EffectiveMode::Provider),
                Err(e) => {
                    warn!(
                        conversation = %conversation,
                        provider = bundle.provider().name(),
                        error = %e,
                        "provider failed, answering with fallback"
                    );
                    (bundle.responder().respond(text, &history), EffectiveMode::Fallback)
                }
            },
            EffectiveMode::Fallback => {
                (bundle.responder().respond(text, &history), EffectiveMode::Fallback)
            }
        };

        self.store
            .append_turn(
                conversation,
                &dir,
                ChatMessage::user(text),
                ChatMessage::assistant(response_text.clone()),
            )
            .await?;

        debug!(conversation = %conversation, mode = %effective_mode, "turn recorded");
        Ok(SendOutcome { response_text, effective_mode })
    }

    async fn ask_provider(
        &self,
        bundle: &RuntimeBundle,
        config: &AppConfig,
        history: &[ChatMessage],
        text: &str,
    ) -> Result<String, ProviderError> {
        let system = chat::system_prompt(config);
        let context = &history[history.len().saturating_sub(self.history_context)..];
        let request = LlmRequest {
            system: &system,
            history: context,
            text,
            model: config.provider.model_name(),
            api_key: config.provider.api_key.trim(),
            temperature: config.provider.temperature,
        };

        let response = tokio::time::timeout(self.provider_timeout, bundle.generate(request))
            .await
            .map_err(|_| ProviderError::Timeout(self.provider_timeout))??;

        if let Some(usage) = &response.usage {
            debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "provider usage"
            );
        }
        Ok(response.text)
    }

    /// Drop the conversation's history.  The cached bundle is untouched.
    pub async fn reset_conversation(
        &self,
        config: &AppConfig,
        data_dir: Option<&Path>,
    ) -> Result<(), ChatError> {
        let dir = self.data_dir(data_dir);
        self.store.clear(config.conversation_id(), &dir).await?;
        info!(conversation = %config.conversation_id(), "conversation reset");
        Ok(())
    }

    pub async fn get_history(
        &self,
        config: &AppConfig,
        data_dir: Option<&Path>,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let dir = self.data_dir(data_dir);
        Ok(self.store.list(config.conversation_id(), &dir).await?)
    }

    /// Opening line for the persona.  No I/O and no cache access.
    pub fn get_greeting_text(&self, config: &AppConfig) -> String {
        chat::greeting_text(config)
    }

    /// Keys with a ready bundle or a build in flight.
    pub fn cached_runtimes(&self) -> usize {
        self.cache.len()
    }

    /// Release every cached bundle; the next call builds fresh ones.
    #[cfg(any(test, feature = "test-hooks"))]
    pub fn shutdown(&self) {
        self.cache.shutdown();
    }
}
