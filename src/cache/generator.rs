//! Memoized thumbnail generation for a single request signature.

use std::{io, sync::Arc, time::Instant};

use bytes::Bytes;
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::{io::AsyncReadExt, sync::OnceCell};
use tracing::{info, warn};

use crate::{
    application::pipeline::{DecoderInvocation, FrameExtractor, PipelineError},
    domain::signature::RequestSignature,
    infra::storage::{PreviewStore, StoreError},
};

use super::{
    keys::StorageKey,
    metrics::{
        METRIC_PIPELINE_MS, METRIC_PIPELINE_RUNS_TOTAL, METRIC_STORE_READ_TOTAL,
        METRIC_STORE_WRITE_FAILED_TOTAL,
    },
};

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("failed to prepare decoder parameters for key={key}")]
    Prepare {
        key: StorageKey,
        #[source]
        source: PipelineError,
    },
    #[error("failed to fetch preview key={key}")]
    Fetch {
        key: StorageKey,
        #[source]
        source: StoreError,
    },
    #[error("failed to read stored preview key={key}")]
    ReadStored {
        key: StorageKey,
        #[source]
        source: io::Error,
    },
    #[error("failed to generate preview key={key}")]
    Pipeline {
        key: StorageKey,
        #[source]
        source: PipelineError,
    },
}

impl GenerateError {
    /// Stage of the attempt that failed, for diagnostics.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Prepare { .. } => "prepare",
            Self::Fetch { .. } => "fetch",
            Self::ReadStored { .. } => "read_stored",
            Self::Pipeline { .. } => "pipeline",
        }
    }
}

/// Outcome of a generation attempt; failures are shared between all callers.
pub type GenerateResult = Result<Bytes, Arc<GenerateError>>;

/// One memoized unit of work.
///
/// The first call to [`Generator::get`] reads through the preview store and
/// falls back to the decoder; every later call replays that outcome, failures
/// included. Concurrent callers wait for the attempt in progress.
pub struct Generator {
    signature: RequestSignature,
    key: StorageKey,
    store: Arc<dyn PreviewStore>,
    extractor: Arc<dyn FrameExtractor>,
    outcome: OnceCell<GenerateResult>,
}

impl Generator {
    pub fn new(
        signature: RequestSignature,
        store: Arc<dyn PreviewStore>,
        extractor: Arc<dyn FrameExtractor>,
    ) -> Self {
        let key = StorageKey::derive(&signature);
        Self {
            signature,
            key,
            store,
            extractor,
            outcome: OnceCell::new(),
        }
    }

    pub fn signature(&self) -> &RequestSignature {
        &self.signature
    }

    pub fn key(&self) -> &StorageKey {
        &self.key
    }

    /// True once an attempt has completed, successfully or not.
    pub fn is_resolved(&self) -> bool {
        self.outcome.initialized()
    }

    pub async fn get(&self) -> GenerateResult {
        self.outcome
            .get_or_init(|| async { self.generate().await.map_err(Arc::new) })
            .await
            .clone()
    }

    async fn generate(&self) -> Result<Bytes, GenerateError> {
        let invocation =
            DecoderInvocation::build(&self.signature).map_err(|source| GenerateError::Prepare {
                key: self.key.clone(),
                source,
            })?;

        if let Some(bytes) = self.read_stored().await? {
            return Ok(bytes);
        }

        let started_at = Instant::now();
        let bytes = match self.extractor.extract(&invocation).await {
            Ok(bytes) => {
                counter!(METRIC_PIPELINE_RUNS_TOTAL, "result" => "ok").increment(1);
                bytes
            }
            Err(source) => {
                counter!(METRIC_PIPELINE_RUNS_TOTAL, "result" => "error").increment(1);
                return Err(GenerateError::Pipeline {
                    key: self.key.clone(),
                    source,
                });
            }
        };
        histogram!(METRIC_PIPELINE_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        if let Err(err) = self.store.put(&self.key, bytes.clone()).await {
            counter!(METRIC_STORE_WRITE_FAILED_TOTAL).increment(1);
            warn!(
                target = "cache::generator",
                op = "generator::store",
                result = "write_failed",
                key = %self.key,
                error = %err,
                "Failed to put preview to store"
            );
        }

        info!(
            target = "cache::generator",
            op = "generator::generate",
            result = "generated",
            key = %self.key,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            image_bytes = bytes.len(),
            "Preview generated"
        );

        Ok(bytes)
    }

    /// Read-through lookup. `Ok(None)` means the store has no preview for this key.
    async fn read_stored(&self) -> Result<Option<Bytes>, GenerateError> {
        let mut reader = match self.store.get(&self.key).await {
            Ok(reader) => reader,
            Err(StoreError::NotFound { .. }) => {
                counter!(METRIC_STORE_READ_TOTAL, "result" => "miss").increment(1);
                return Ok(None);
            }
            Err(source) => {
                counter!(METRIC_STORE_READ_TOTAL, "result" => "error").increment(1);
                return Err(GenerateError::Fetch {
                    key: self.key.clone(),
                    source,
                });
            }
        };

        let mut buffer = Vec::new();
        reader
            .read_to_end(&mut buffer)
            .await
            .map_err(|source| GenerateError::ReadStored {
                key: self.key.clone(),
                source,
            })?;
        counter!(METRIC_STORE_READ_TOTAL, "result" => "hit").increment(1);

        info!(
            target = "cache::generator",
            op = "generator::read_stored",
            result = "hit",
            key = %self.key,
            image_bytes = buffer.len(),
            "Preview served from store"
        );
        Ok(Some(Bytes::from(buffer)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        domain::signature::parse_source,
        infra::storage::{MemoryPreviewStore, PreviewReader},
    };

    struct CountingExtractor {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingExtractor {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FrameExtractor for CountingExtractor {
        async fn extract(&self, _: &DecoderInvocation) -> Result<Bytes, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(PipelineError::Exit { exit_code: Some(1) })
            } else {
                Ok(Bytes::from_static(b"frame"))
            }
        }
    }

    /// Store whose reads fail with a transport-style error and whose writes always fail.
    struct BrokenStore {
        reads: AtomicUsize,
    }

    #[async_trait]
    impl PreviewStore for BrokenStore {
        async fn get(&self, key: &StorageKey) -> Result<PreviewReader, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Read {
                key: key.to_string(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "access denied"),
            })
        }

        async fn put(&self, key: &StorageKey, _: Bytes) -> Result<(), StoreError> {
            Err(StoreError::Write {
                key: key.to_string(),
                source: io::Error::other("bucket offline"),
            })
        }
    }

    /// Store that always misses on read and fails every write.
    struct WriteFailingStore;

    #[async_trait]
    impl PreviewStore for WriteFailingStore {
        async fn get(&self, key: &StorageKey) -> Result<PreviewReader, StoreError> {
            Err(StoreError::NotFound {
                key: key.to_string(),
            })
        }

        async fn put(&self, key: &StorageKey, _: Bytes) -> Result<(), StoreError> {
            Err(StoreError::Write {
                key: key.to_string(),
                source: io::Error::other("bucket offline"),
            })
        }
    }

    fn signature() -> RequestSignature {
        RequestSignature::new(parse_source("http://example.com/video.mp4").expect("url"))
    }

    #[tokio::test]
    async fn miss_generates_and_writes_back() {
        let store = Arc::new(MemoryPreviewStore::new());
        let extractor = CountingExtractor::new(false);
        let generator = Generator::new(signature(), store.clone(), extractor.clone());

        let bytes = generator.get().await.expect("generated");
        assert_eq!(&bytes[..], b"frame");
        assert_eq!(extractor.calls(), 1);
        assert_eq!(
            store.object(generator.key()).as_deref(),
            Some(&b"frame"[..])
        );
        assert!(generator.is_resolved());
    }

    #[tokio::test]
    async fn success_is_replayed_without_io() {
        let store = Arc::new(MemoryPreviewStore::new());
        let extractor = CountingExtractor::new(false);
        let generator = Generator::new(signature(), store, extractor.clone());

        let first = generator.get().await.expect("generated");
        for _ in 0..5 {
            assert_eq!(generator.get().await.expect("memoized"), first);
        }
        assert_eq!(extractor.calls(), 1);
    }

    #[tokio::test]
    async fn failure_is_memoized() {
        let store = Arc::new(MemoryPreviewStore::new());
        let extractor = CountingExtractor::new(true);
        let generator = Generator::new(signature(), store.clone(), extractor.clone());

        let first = generator.get().await.expect_err("pipeline failed");
        let second = generator.get().await.expect_err("still failed");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.stage(), "pipeline");
        assert_eq!(extractor.calls(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn stored_preview_skips_the_pipeline() {
        let store = Arc::new(MemoryPreviewStore::new());
        let extractor = CountingExtractor::new(false);
        let key = StorageKey::derive(&signature());
        store
            .put(&key, Bytes::from_static(b"cached"))
            .await
            .expect("seeded");

        let generator = Generator::new(signature(), store, extractor.clone());
        assert_eq!(&generator.get().await.expect("read through")[..], b"cached");
        assert_eq!(extractor.calls(), 0);
    }

    #[tokio::test]
    async fn store_read_error_is_fatal_and_memoized() {
        let store = Arc::new(BrokenStore {
            reads: AtomicUsize::new(0),
        });
        let extractor = CountingExtractor::new(false);
        let generator = Generator::new(signature(), store.clone(), extractor.clone());

        let err = generator.get().await.expect_err("read failed");
        assert_eq!(err.stage(), "fetch");
        let _ = generator.get().await.expect_err("memoized");
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
        assert_eq!(extractor.calls(), 0);
    }

    #[tokio::test]
    async fn write_failure_does_not_fail_the_request() {
        let extractor = CountingExtractor::new(false);
        let generator = Generator::new(signature(), Arc::new(WriteFailingStore), extractor);

        assert_eq!(&generator.get().await.expect("still served")[..], b"frame");
    }

    #[tokio::test]
    async fn unsupported_format_fails_before_store_and_pipeline() {
        let store = Arc::new(BrokenStore {
            reads: AtomicUsize::new(0),
        });
        let extractor = CountingExtractor::new(false);
        let generator = Generator::new(
            signature().with_format("png"),
            store.clone(),
            extractor.clone(),
        );

        let err = generator.get().await.expect_err("png rejected");
        assert_eq!(err.stage(), "prepare");
        assert_eq!(store.reads.load(Ordering::SeqCst), 0);
        assert_eq!(extractor.calls(), 0);
    }
}
