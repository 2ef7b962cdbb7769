//! Cache key derivation.
//!
//! `StorageKey` names the object in the persistent preview store, `PoolKey`
//! deduplicates in-memory work inside the generator pool.

use std::fmt;

use md5::{Digest, Md5};
use url::Url;

use crate::domain::signature::RequestSignature;

/// Object key in the persistent preview store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    /// Derive the object key for a signature.
    ///
    /// With a content identity the key is `{info_hash}/{path}/{name}`, otherwise
    /// `{md5(source without query)}/{name}`, where `name` is
    /// `{width}-{offset}-{length}.{format}`.
    pub fn derive(signature: &RequestSignature) -> Self {
        let name = format!(
            "{}-{}-{}.{}",
            signature.width(),
            signature.offset_secs(),
            signature.length_secs(),
            signature.format()
        );
        let prefix = match signature.identity() {
            Some(identity) => format!("{}/{}", identity.info_hash(), identity.path()),
            None => source_digest(signature.source()),
        };
        Self(format!("{prefix}/{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pool lookup key: every cache-relevant field of the signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey(RequestSignature);

impl From<&RequestSignature> for PoolKey {
    fn from(signature: &RequestSignature) -> Self {
        Self(signature.clone())
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let signature = &self.0;
        write!(
            f,
            "{}|{}|{}|{}|{}",
            signature.source(),
            signature.offset_secs(),
            signature.length_secs(),
            signature.format(),
            signature.width()
        )?;
        if let Some(identity) = signature.identity() {
            write!(f, "|{}|{}", identity.info_hash(), identity.path())?;
        }
        Ok(())
    }
}

fn source_digest(source: &Url) -> String {
    let mut stripped = source.clone();
    stripped.set_query(None);
    stripped.set_fragment(None);
    hex::encode(Md5::digest(stripped.as_str().as_bytes()))
}
