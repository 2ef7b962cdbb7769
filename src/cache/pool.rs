//! Single-flight registry of generators with sliding expiry.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use metrics::{counter, gauge};
use tracing::{debug, info, warn};

use crate::{
    application::pipeline::FrameExtractor, domain::signature::RequestSignature,
    infra::storage::PreviewStore,
};

use super::{
    config::PoolConfig,
    expiry::Expiry,
    generator::Generator,
    keys::PoolKey,
    metrics::{METRIC_POOL_ENTRIES, METRIC_POOL_EVICTED_TOTAL, METRIC_POOL_LOOKUP_TOTAL},
};

const SOURCE: &str = "cache::pool";

struct PoolEntry {
    generator: Arc<Generator>,
    expiry: Arc<Expiry>,
}

struct PoolInner {
    entries: DashMap<PoolKey, PoolEntry>,
    ttl: Duration,
    store: Arc<dyn PreviewStore>,
    extractor: Arc<dyn FrameExtractor>,
}

/// Process-local pool of [`Generator`]s keyed by request signature.
///
/// The first lookup for a key creates the generator and drives its first
/// attempt inside the pool. A failed first attempt is evicted immediately; a
/// successful one stays until no lookup has touched it for a full TTL window.
#[derive(Clone)]
pub struct GeneratorPool {
    inner: Arc<PoolInner>,
}

impl GeneratorPool {
    pub fn new(
        config: &PoolConfig,
        store: Arc<dyn PreviewStore>,
        extractor: Arc<dyn FrameExtractor>,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                entries: DashMap::new(),
                ttl: config.ttl(),
                store,
                extractor,
            }),
        }
    }

    /// Fetch or create the generator for `signature`.
    ///
    /// The creating caller waits for the first attempt. That attempt runs on
    /// its own task and finishes even if this future is dropped.
    pub async fn get(&self, signature: RequestSignature) -> Arc<Generator> {
        let key = PoolKey::from(&signature);

        let created = match self.inner.entries.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let entry = entry.get();
                entry.expiry.reset();
                counter!(METRIC_POOL_LOOKUP_TOTAL, "result" => "hit").increment(1);
                return Arc::clone(&entry.generator);
            }
            Entry::Vacant(entry) => {
                let generator = Arc::new(Generator::new(
                    signature,
                    Arc::clone(&self.inner.store),
                    Arc::clone(&self.inner.extractor),
                ));
                entry.insert(PoolEntry {
                    generator: Arc::clone(&generator),
                    expiry: Arc::new(Expiry::start(self.inner.ttl)),
                });
                generator
            }
        };

        counter!(METRIC_POOL_LOOKUP_TOTAL, "result" => "created").increment(1);
        gauge!(METRIC_POOL_ENTRIES).set(self.inner.entries.len() as f64);
        debug!(
            target = SOURCE,
            op = "pool::get",
            result = "created",
            key = %key,
            storage_key = %created.key(),
            "Created generator"
        );

        let inner = Arc::clone(&self.inner);
        let generator = Arc::clone(&created);
        let task_key = key.clone();
        let primed =
            tokio::spawn(async move { PoolInner::prime(&inner, task_key, generator).await });
        if let Err(err) = primed.await {
            warn!(
                target = SOURCE,
                op = "pool::prime",
                result = "panicked",
                key = %key,
                error = %err,
                "First attempt did not complete"
            );
            self.inner.evict(&key, &created, "failed");
        }

        created
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn contains(&self, signature: &RequestSignature) -> bool {
        self.inner.entries.contains_key(&PoolKey::from(signature))
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Drop every entry and cancel all pending expiry waiters.
    pub fn shutdown(&self) {
        let count = self.inner.entries.len();
        self.inner.entries.clear();
        gauge!(METRIC_POOL_ENTRIES).set(0.0);
        info!(
            target = SOURCE,
            op = "pool::shutdown",
            entries = count,
            "Generator pool cleared"
        );
    }
}

impl PoolInner {
    async fn prime(inner: &Arc<Self>, key: PoolKey, generator: Arc<Generator>) {
        match generator.get().await {
            Ok(_) => Self::arm_expiry(inner, key, generator),
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "pool::prime",
                    result = "failed",
                    key = %key,
                    stage = err.stage(),
                    error = %err,
                    "First attempt failed, evicting generator"
                );
                inner.evict(&key, &generator, "failed");
            }
        }
    }

    fn arm_expiry(inner: &Arc<Self>, key: PoolKey, generator: Arc<Generator>) {
        let expiry = match inner.entries.get(&key) {
            Some(entry) if Arc::ptr_eq(&entry.generator, &generator) => Arc::clone(&entry.expiry),
            _ => return,
        };

        let pool: Weak<Self> = Arc::downgrade(inner);
        expiry.arm(move || match pool.upgrade() {
            Some(pool) => pool.expire(&key, &generator),
            None => true,
        });
    }

    /// Remove `key` only while it still maps to `generator`.
    fn evict(&self, key: &PoolKey, generator: &Arc<Generator>, reason: &'static str) -> bool {
        let removed = self
            .entries
            .remove_if(key, |_, entry| Arc::ptr_eq(&entry.generator, generator));
        match removed {
            Some((_, entry)) => {
                self.record_eviction(key, &entry, reason);
                true
            }
            None => false,
        }
    }

    /// Expiry callback. The deadline is re-read under the map shard lock, the
    /// same lock a hit holds while resetting it, so a lookup that slid the
    /// window after the waiter woke keeps the entry.
    ///
    /// Returns `false` only when the entry was kept because its window moved.
    fn expire(&self, key: &PoolKey, generator: &Arc<Generator>) -> bool {
        let mut extended = false;
        let removed = self.entries.remove_if(key, |_, entry| {
            if !Arc::ptr_eq(&entry.generator, generator) {
                return false;
            }
            if entry.expiry.is_due() {
                return true;
            }
            extended = true;
            false
        });

        if let Some((_, entry)) = removed {
            self.record_eviction(key, &entry, "expired");
            return true;
        }
        if extended {
            debug!(
                target = SOURCE,
                op = "pool::expire",
                result = "extended",
                key = %key,
                "Expiry window moved, keeping generator"
            );
        }
        !extended
    }

    fn record_eviction(&self, key: &PoolKey, entry: &PoolEntry, reason: &'static str) {
        entry.expiry.cancel();

        counter!(METRIC_POOL_EVICTED_TOTAL, "reason" => reason).increment(1);
        gauge!(METRIC_POOL_ENTRIES).set(self.entries.len() as f64);
        debug!(
            target = SOURCE,
            op = "pool::evict",
            result = reason,
            key = %key,
            "Evicted generator"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::time::sleep;

    use super::*;
    use crate::{
        application::pipeline::{DecoderInvocation, PipelineError},
        domain::signature::parse_source,
        infra::storage::MemoryPreviewStore,
    };

    #[derive(Default)]
    struct ScriptedExtractor {
        calls: AtomicUsize,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl FrameExtractor for ScriptedExtractor {
        async fn extract(&self, _: &DecoderInvocation) -> Result<Bytes, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failing {
                Err(PipelineError::Exit { exit_code: Some(1) })
            } else {
                Ok(Bytes::from_static(b"frame"))
            }
        }
    }

    fn pool_with(extractor: Arc<ScriptedExtractor>, ttl: Duration) -> GeneratorPool {
        GeneratorPool::new(
            &PoolConfig::with_ttl(ttl),
            Arc::new(MemoryPreviewStore::new()),
            extractor,
        )
    }

    fn signature() -> RequestSignature {
        RequestSignature::new(parse_source("http://example.com/video.mp4").expect("url"))
    }

    #[tokio::test]
    async fn created_generator_is_already_resolved() {
        let extractor = Arc::new(ScriptedExtractor::default());
        let pool = pool_with(extractor.clone(), Duration::from_secs(60));

        let generator = pool.get(signature()).await;
        assert!(generator.is_resolved());
        assert!(pool.contains(&signature()));

        let again = pool.get(signature()).await;
        assert!(Arc::ptr_eq(&generator, &again));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_eviction_leaves_newer_entry_alone() {
        let extractor = Arc::new(ScriptedExtractor::default());
        let pool = pool_with(extractor, Duration::from_secs(60));

        let first = pool.get(signature()).await;
        let key = PoolKey::from(&signature());
        assert!(pool.inner.evict(&key, &first, "expired"));

        let second = pool.get(signature()).await;
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!pool.inner.evict(&key, &first, "expired"));
        assert!(pool.contains(&signature()));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_rechecks_the_deadline_before_removing() {
        let extractor = Arc::new(ScriptedExtractor::default());
        let pool = pool_with(extractor, Duration::from_secs(60));
        let key = PoolKey::from(&signature());

        let generator = pool.get(signature()).await;
        sleep(Duration::from_secs(30)).await;

        // A waiter that woke before a lookup slid the window keeps the entry.
        assert!(!pool.inner.expire(&key, &generator));
        assert!(pool.contains(&signature()));

        // A waiter for a generator that is no longer pooled settles quietly.
        let stranger = Arc::new(Generator::new(
            signature(),
            Arc::clone(&pool.inner.store),
            Arc::clone(&pool.inner.extractor),
        ));
        assert!(pool.inner.expire(&key, &stranger));
        assert!(pool.contains(&signature()));

        sleep(Duration::from_secs(31)).await;
        assert!(!pool.contains(&signature()));
    }

    #[tokio::test]
    async fn failed_first_attempt_is_not_retained() {
        let extractor = Arc::new(ScriptedExtractor {
            failures_left: AtomicUsize::new(1),
            ..Default::default()
        });
        let pool = pool_with(extractor.clone(), Duration::from_secs(60));

        let failed = pool.get(signature()).await;
        assert!(failed.get().await.is_err());
        assert!(pool.is_empty());

        let fresh = pool.get(signature()).await;
        assert!(fresh.get().await.is_ok());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_expiry() {
        let extractor = Arc::new(ScriptedExtractor::default());
        let pool = pool_with(extractor, Duration::from_secs(60));

        let generator = pool.get(signature()).await;
        pool.shutdown();
        assert!(pool.is_empty());

        let replacement = pool.get(signature()).await;
        assert!(!Arc::ptr_eq(&generator, &replacement));

        sleep(Duration::from_secs(30)).await;
        assert!(pool.contains(&signature()));
    }
}
