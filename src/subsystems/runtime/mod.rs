//! Runtime subsystem: construction and caching of conversational backends.
//!
//! A [`RuntimeBundle`] pairs the provider client for one [`CacheKey`] with the
//! fallback responder.  Bundles are built by a [`BundleBuilder`] and owned by
//! a [`RuntimeCache`]; callers get shared `Arc` handles.

pub mod cache;
pub mod key;

pub use cache::RuntimeCache;
pub use key::{CacheKey, build_key, normalize_dir};

use std::future::Future;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::ConstructionError;
use crate::llm::{LlmProvider, LlmRequest, LlmResponse, ProviderError, providers};
use crate::subsystems::chat::FallbackResponder;

// ── RuntimeBundle ─────────────────────────────────────────────────────────────

/// A constructed backend plus its message-generation capabilities.
#[derive(Debug)]
pub struct RuntimeBundle {
    id: Uuid,
    key: CacheKey,
    created_at: DateTime<Utc>,
    provider: LlmProvider,
    responder: FallbackResponder,
}

impl RuntimeBundle {
    pub fn new(key: CacheKey, provider: LlmProvider, responder: FallbackResponder) -> Self {
        Self {
            id: Uuid::now_v7(),
            key,
            created_at: Utc::now(),
            provider,
            responder,
        }
    }

    /// Unique per construction; two handles with the same id are the same bundle.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn provider(&self) -> &LlmProvider {
        &self.provider
    }

    pub fn responder(&self) -> &FallbackResponder {
        &self.responder
    }

    /// Ask the external provider for a reply.
    pub async fn generate(&self, request: LlmRequest<'_>) -> Result<LlmResponse, ProviderError> {
        self.provider.complete(request).await
    }
}

// ── Construction ──────────────────────────────────────────────────────────────

/// Builds bundles for cache misses.  The cache guarantees at most one build
/// in flight per key.
pub trait BundleBuilder: Send + Sync + 'static {
    fn build(
        &self,
        key: &CacheKey,
    ) -> impl Future<Output = Result<RuntimeBundle, ConstructionError>> + Send;
}

/// Production builder: prepares the storage directory and the provider
/// client for the key's family and endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBundleBuilder;

impl BundleBuilder for DefaultBundleBuilder {
    async fn build(&self, key: &CacheKey) -> Result<RuntimeBundle, ConstructionError> {
        let fingerprint = key.fingerprint();

        tokio::fs::create_dir_all(key.data_dir()).await.map_err(|e| {
            ConstructionError::new(
                &fingerprint,
                format!("cannot create {}: {e}", key.data_dir().display()),
            )
        })?;

        let provider = providers::build(key.family(), key.endpoint())
            .map_err(|e| ConstructionError::new(&fingerprint, e.to_string()))?;

        info!(
            key = %fingerprint,
            family = key.family().as_str(),
            provider = provider.name(),
            data_dir = %key.data_dir().display(),
            "runtime bundle built"
        );

        Ok(RuntimeBundle::new(key.clone(), provider, FallbackResponder::new()))
    }
}
