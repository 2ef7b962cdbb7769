#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use thumbgen::{
    application::pipeline::{DecoderInvocation, FrameExtractor, PipelineError},
    cache::{GeneratorPool, PoolConfig, StorageKey},
    domain::signature::{RequestSignature, parse_source},
    infra::storage::{MemoryPreviewStore, PreviewReader, PreviewStore, StoreError},
};

pub const FRAME: &[u8] = b"RIFF\x00\x00\x00\x00WEBPVP8 frame";
pub const SOURCE: &str = "http://example.com/video.mp4";

/// Frame extractor that records every invocation and can be told to fail or stall.
#[derive(Default)]
pub struct RecordingExtractor {
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Option<Duration>,
    invocations: Mutex<Vec<Vec<String>>>,
}

impl RecordingExtractor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(times: usize) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicUsize::new(times),
            ..Default::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.invocations.lock().expect("invocations lock").clone()
    }
}

#[async_trait]
impl FrameExtractor for RecordingExtractor {
    async fn extract(&self, invocation: &DecoderInvocation) -> Result<Bytes, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.invocations
            .lock()
            .expect("invocations lock")
            .push(invocation.args().to_vec());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            Err(PipelineError::Exit { exit_code: Some(1) })
        } else {
            Ok(Bytes::from_static(FRAME))
        }
    }
}

/// In-memory store that counts reads and writes.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryPreviewStore,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn memory(&self) -> &MemoryPreviewStore {
        &self.inner
    }
}

#[async_trait]
impl PreviewStore for CountingStore {
    async fn get(&self, key: &StorageKey) -> Result<PreviewReader, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn put(&self, key: &StorageKey, data: Bytes) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, data).await
    }
}

pub fn signature() -> RequestSignature {
    RequestSignature::new(parse_source(SOURCE).expect("valid url"))
}

pub fn pool(
    ttl: Duration,
    store: Arc<CountingStore>,
    extractor: Arc<RecordingExtractor>,
) -> GeneratorPool {
    GeneratorPool::new(&PoolConfig::with_ttl(ttl), store, extractor)
}
