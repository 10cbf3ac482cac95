//! Conversational runtime manager.
//!
//! Hosts call the five operations on [`ConversationManager`]: build or reuse
//! a runtime bundle, send a message, reset a conversation, read its history,
//! and get the persona greeting.  Everything is keyed by an [`AppConfig`]
//! supplied per call plus an optional storage directory.

pub mod config;
pub mod error;
pub mod llm;
pub mod logger;
pub mod manager;
pub mod subsystems;

pub use config::{AppConfig, ProviderFamily, ProviderMode, ProviderSettings, Settings};
pub use error::{ChatError, ConstructionError, StorageError};
pub use manager::{ConversationManager, SendOutcome};
pub use subsystems::chat::EffectiveMode;
pub use subsystems::memory::{ChatMessage, Role};
pub use subsystems::runtime::{BundleBuilder, CacheKey, RuntimeBundle, RuntimeCache};
