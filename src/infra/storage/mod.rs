//! Persistent preview storage.
//!
//! Previews are opaque blobs addressed by [`StorageKey`]. A missing object is
//! reported as [`StoreError::NotFound`], distinct from every transport or
//! filesystem failure.

mod fs;
mod memory;

use std::{io, pin::Pin};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::cache::StorageKey;

pub use fs::FsPreviewStore;
pub use memory::MemoryPreviewStore;

/// Readable stream over a stored preview.
pub type PreviewReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no preview stored for key={key}")]
    NotFound { key: String },
    #[error("invalid preview key `{key}`")]
    InvalidKey { key: String },
    #[error("failed to create preview bucket {bucket}")]
    Provision {
        bucket: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to fetch preview key={key}")]
    Read {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to store preview key={key}")]
    Write {
        key: String,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Durable key/blob store backing the in-memory generator pool.
#[async_trait]
pub trait PreviewStore: Send + Sync {
    /// Open a stored preview for reading.
    async fn get(&self, key: &StorageKey) -> Result<PreviewReader, StoreError>;

    /// Store a preview, replacing any previous blob under the same key.
    async fn put(&self, key: &StorageKey, data: Bytes) -> Result<(), StoreError>;
}
