use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::cache::StorageKey;

use super::{PreviewReader, PreviewStore, StoreError};

/// Process-local preview store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryPreviewStore {
    objects: DashMap<String, Bytes>,
}

impl MemoryPreviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, key: &StorageKey) -> bool {
        self.objects.contains_key(key.as_str())
    }

    /// Raw access to a stored blob.
    pub fn object(&self, key: &StorageKey) -> Option<Bytes> {
        self.objects.get(key.as_str()).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl PreviewStore for MemoryPreviewStore {
    async fn get(&self, key: &StorageKey) -> Result<PreviewReader, StoreError> {
        match self.object(key) {
            Some(bytes) => Ok(Box::pin(Cursor::new(bytes))),
            None => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    async fn put(&self, key: &StorageKey, data: Bytes) -> Result<(), StoreError> {
        self.objects.insert(key.to_string(), data);
        Ok(())
    }
}
