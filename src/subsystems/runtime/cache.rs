//! [`RuntimeCache`]: process-wide table of runtime bundles.
//!
//! Each key maps to either a ready bundle or a build in flight.  An in-flight
//! build is a [`Shared`] future stored in the table, so every caller that
//! arrives while it runs awaits the same result instead of starting its own.
//! Builds are tagged with a generation number; a build only settles its slot
//! if that slot still carries its generation, which keeps `shutdown()` from
//! being undone by a build that finishes afterwards.
//!
//! ```text
//!   miss ──▶ Building{gen, shared} ──ok──▶ Ready(bundle)
//!                                  └─err─▶ (evicted, next call retries)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::error::ConstructionError;
use super::{BundleBuilder, CacheKey, DefaultBundleBuilder, RuntimeBundle};

type BuildResult = Result<Arc<RuntimeBundle>, ConstructionError>;
type PendingBuild = Shared<BoxFuture<'static, BuildResult>>;

enum Slot {
    Ready(Arc<RuntimeBundle>),
    Building { generation: u64, pending: PendingBuild },
}

/// Caches one bundle per [`CacheKey`] with at-most-once construction.
pub struct RuntimeCache<B = DefaultBundleBuilder> {
    builder: Arc<B>,
    slots: Mutex<HashMap<CacheKey, Slot>>,
    next_generation: AtomicU64,
}

impl Default for RuntimeCache<DefaultBundleBuilder> {
    fn default() -> Self {
        Self::new(DefaultBundleBuilder)
    }
}

impl<B: BundleBuilder> RuntimeCache<B> {
    pub fn new(builder: B) -> Self {
        Self {
            builder: Arc::new(builder),
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
        // Never held across an await and never left half-updated.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the bundle for `key`, building it on first use.
    ///
    /// Concurrent callers for a key that is being built all receive the
    /// outcome of that one build, success or failure.  A failed build is
    /// evicted so the next call starts fresh.
    pub async fn get_or_create(&self, key: &CacheKey) -> BuildResult {
        let (generation, pending) = {
            let mut slots = self.slots();
            match slots.get(key) {
                Some(Slot::Ready(bundle)) => return Ok(Arc::clone(bundle)),
                Some(Slot::Building { generation, pending }) => {
                    debug!(key = %key, "joining in-flight runtime build");
                    (*generation, pending.clone())
                }
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let builder = Arc::clone(&self.builder);
                    let build_key = key.clone();
                    let pending = async move { builder.build(&build_key).await.map(Arc::new) }
                        .boxed()
                        .shared();
                    slots.insert(
                        key.clone(),
                        Slot::Building { generation, pending: pending.clone() },
                    );
                    info!(key = %key, family = key.family().as_str(), "building runtime bundle");
                    (generation, pending)
                }
            }
        };

        let result = pending.await;
        self.settle(key, generation, &result);
        result
    }

    /// Move a finished build out of the `Building` state.  Idempotent: the
    /// first waiter to get here does the work, later ones find nothing to do.
    fn settle(&self, key: &CacheKey, generation: u64, result: &BuildResult) {
        let mut slots = self.slots();
        let owns_slot = matches!(
            slots.get(key),
            Some(Slot::Building { generation: g, .. }) if *g == generation
        );
        if !owns_slot {
            return;
        }
        match result {
            Ok(bundle) => {
                info!(key = %key, bundle = %bundle.id(), "runtime bundle cached");
                slots.insert(key.clone(), Slot::Ready(Arc::clone(bundle)));
            }
            Err(e) => {
                warn!(key = %key, error = %e, "runtime build failed, evicting");
                slots.remove(key);
            }
        }
    }

    /// Whether a ready bundle is cached for `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        matches!(self.slots().get(key), Some(Slot::Ready(_)))
    }

    /// Number of keys with a ready bundle or a build in flight.
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached bundle and forget in-flight builds.  Waiters already
    /// awaiting a forgotten build still get its result, but it is not cached.
    /// Safe on an empty cache.
    #[cfg(any(test, feature = "test-hooks"))]
    pub fn shutdown(&self) {
        let drained: Vec<(CacheKey, Slot)> = self.slots().drain().collect();
        let in_flight = drained
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Building { .. }))
            .count();
        info!(released = drained.len(), in_flight, "runtime cache shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ProviderFamily};
    use crate::llm::{LlmProvider, providers::dummy::DummyProvider};
    use crate::subsystems::chat::FallbackResponder;
    use crate::subsystems::runtime::build_key;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Counts builds; fails while `fail` is set; sleeps to widen race windows.
    #[derive(Default)]
    struct CountingBuilder {
        builds: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    impl BundleBuilder for Arc<CountingBuilder> {
        async fn build(&self, key: &CacheKey) -> Result<RuntimeBundle, ConstructionError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(ConstructionError::new(key.fingerprint(), "induced failure"));
            }
            Ok(RuntimeBundle::new(
                key.clone(),
                LlmProvider::Dummy(DummyProvider),
                FallbackResponder::new(),
            ))
        }
    }

    fn key(dir: &str) -> CacheKey {
        let mut cfg = AppConfig::default();
        cfg.provider.family = ProviderFamily::Dummy;
        build_key(&cfg, Path::new(dir))
    }

    #[tokio::test]
    async fn hit_returns_same_bundle() {
        let counter = Arc::new(CountingBuilder::default());
        let cache = RuntimeCache::new(counter.clone());
        let k = key("/tmp/cache-hit");

        let a = cache.get_or_create(&k).await.unwrap();
        let b = cache.get_or_create(&k).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(counter.builds.load(Ordering::SeqCst), 1);
        assert!(cache.contains(&k));
    }

    #[tokio::test]
    async fn concurrent_misses_build_once() {
        let counter = Arc::new(CountingBuilder::default());
        let cache = Arc::new(RuntimeCache::new(counter.clone()));
        let k = key("/tmp/cache-race");

        let mut tasks = Vec::new();
        for _ in 0..12 {
            let cache = cache.clone();
            let k = k.clone();
            tasks.push(tokio::spawn(async move { cache.get_or_create(&k).await }));
        }
        let mut ids = Vec::new();
        for t in tasks {
            ids.push(t.await.unwrap().unwrap().id());
        }

        assert_eq!(counter.builds.load(Ordering::SeqCst), 1);
        assert!(ids.iter().all(|id| *id == ids[0]));
    }

    #[tokio::test]
    async fn failure_is_shared_then_evicted() {
        let counter = Arc::new(CountingBuilder::default());
        counter.fail.store(true, Ordering::SeqCst);
        let cache = Arc::new(RuntimeCache::new(counter.clone()));
        let k = key("/tmp/cache-fail");

        let (a, b) = tokio::join!(cache.get_or_create(&k), cache.get_or_create(&k));
        let (a, b) = (a.unwrap_err(), b.unwrap_err());
        assert_eq!(a.reason, "induced failure");
        assert_eq!(a.reason, b.reason);
        assert_eq!(counter.builds.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());

        counter.fail.store(false, Ordering::SeqCst);
        cache.get_or_create(&k).await.unwrap();
        assert_eq!(counter.builds.load(Ordering::SeqCst), 2);
        assert!(cache.contains(&k));
    }

    #[tokio::test]
    async fn distinct_keys_build_separately() {
        let counter = Arc::new(CountingBuilder::default());
        let cache = RuntimeCache::new(counter.clone());
        let a = cache.get_or_create(&key("/tmp/cache-a")).await.unwrap();
        let b = cache.get_or_create(&key("/tmp/cache-b")).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn shutdown_forces_fresh_builds() {
        let counter = Arc::new(CountingBuilder::default());
        let cache = RuntimeCache::new(counter.clone());
        cache.shutdown();

        let k = key("/tmp/cache-shutdown");
        let before = cache.get_or_create(&k).await.unwrap();
        cache.shutdown();
        assert!(cache.is_empty());

        let after = cache.get_or_create(&k).await.unwrap();
        assert_ne!(before.id(), after.id());
        assert_eq!(counter.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shutdown_during_build_is_not_undone() {
        let counter = Arc::new(CountingBuilder::default());
        let cache = Arc::new(RuntimeCache::new(counter.clone()));
        let k = key("/tmp/cache-shutdown-race");

        let waiter = {
            let cache = cache.clone();
            let k = k.clone();
            tokio::spawn(async move { cache.get_or_create(&k).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.shutdown();

        waiter.await.unwrap().unwrap();
        assert!(!cache.contains(&k));
    }
}
