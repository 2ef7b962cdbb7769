//! Filesystem-backed preview bucket.

use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use bytes::Bytes;
use md5::{Digest, Md5};
use tokio::{fs, sync::OnceCell};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::StorageKey;

use super::{PreviewReader, PreviewStore, StoreError};

/// Bucket subdirectory for keys that cannot be used as relative paths.
const DIGEST_DIR: &str = "_digest";

/// Stores previews as files inside `{root}/{bucket}`.
///
/// The bucket directory is created lazily on the first write. Keys made only
/// of plain path segments map to the same relative path; any other key (`..`,
/// absolute segments) is stored as `_digest/{md5(key)}.{ext}` so it never
/// leaves the bucket.
#[derive(Debug)]
pub struct FsPreviewStore {
    root: PathBuf,
    bucket: String,
    provisioned: OnceCell<()>,
}

impl FsPreviewStore {
    pub fn new(root: PathBuf, bucket: impl Into<String>) -> Self {
        Self {
            root,
            bucket: bucket.into(),
            provisioned: OnceCell::new(),
        }
    }

    pub fn bucket_dir(&self) -> PathBuf {
        self.root.join(&self.bucket)
    }

    async fn provision(&self) -> Result<(), StoreError> {
        self.provisioned
            .get_or_try_init(|| async {
                let bucket_dir = self.bucket_dir();
                let provision_err = |source: io::Error| StoreError::Provision {
                    bucket: self.bucket.clone(),
                    source,
                };

                fs::create_dir_all(&self.root).await.map_err(provision_err)?;
                match fs::create_dir(&bucket_dir).await {
                    Ok(()) => info!(
                        target = "infra::storage::fs",
                        op = "fs::provision",
                        result = "created",
                        bucket = %self.bucket,
                        path = %bucket_dir.display(),
                        "Created preview bucket"
                    ),
                    Err(err) if err.kind() == ErrorKind::AlreadyExists && bucket_dir.is_dir() => {
                        info!(
                            target = "infra::storage::fs",
                            op = "fs::provision",
                            result = "already_exists",
                            bucket = %self.bucket,
                            "Preview bucket already exists"
                        )
                    }
                    Err(err) => return Err(provision_err(err)),
                }
                Ok::<(), StoreError>(())
            })
            .await
            .map(|_| ())
    }

    fn resolve(&self, key: &StorageKey) -> Result<PathBuf, StoreError> {
        if key.as_str().is_empty() {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
            });
        }

        let relative = Path::new(key.as_str());
        let plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        if plain {
            return Ok(self.bucket_dir().join(relative));
        }

        let digest = hex::encode(Md5::digest(key.as_str().as_bytes()));
        let file_name = match relative.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!("{digest}.{ext}"),
            None => digest,
        };
        debug!(
            target = "infra::storage::fs",
            op = "fs::resolve",
            result = "digest",
            key = %key,
            file_name = %file_name,
            "Key is not a plain relative path, using its digest"
        );
        Ok(self.bucket_dir().join(DIGEST_DIR).join(file_name))
    }
}

#[async_trait]
impl PreviewStore for FsPreviewStore {
    async fn get(&self, key: &StorageKey) -> Result<PreviewReader, StoreError> {
        let path = self.resolve(key)?;
        info!(
            target = "infra::storage::fs",
            op = "fs::get",
            key = %key,
            bucket = %self.bucket,
            "Fetching preview"
        );
        match fs::File::open(&path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    target = "infra::storage::fs",
                    op = "fs::get",
                    result = "not_found",
                    key = %key,
                    bucket = %self.bucket,
                    "No preview stored"
                );
                Err(StoreError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(source) => Err(StoreError::Read {
                key: key.to_string(),
                source,
            }),
        }
    }

    async fn put(&self, key: &StorageKey, data: Bytes) -> Result<(), StoreError> {
        self.provision().await?;
        let path = self.resolve(key)?;
        let write_err = |source: io::Error| StoreError::Write {
            key: key.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("preview");
        let staging = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        info!(
            target = "infra::storage::fs",
            op = "fs::put",
            key = %key,
            bucket = %self.bucket,
            bytes = data.len(),
            "Storing preview"
        );

        if let Err(err) = fs::write(&staging, &data).await {
            let _ = fs::remove_file(&staging).await;
            return Err(write_err(err));
        }
        if let Err(err) = fs::rename(&staging, &path).await {
            warn!(
                target = "infra::storage::fs",
                op = "fs::put",
                result = "rename_failed",
                key = %key,
                error = %err,
                "Failed to move staged preview into place"
            );
            let _ = fs::remove_file(&staging).await;
            return Err(write_err(err));
        }

        Ok(())
    }
}
