//! Thumbnail cache.
//!
//! Two layers sit in front of the decoder:
//!
//! - **Generator pool**: in-memory, single-flight, one memoized [`Generator`]
//!   per request signature, evicted after a sliding TTL.
//! - **Preview store**: persistent blobs keyed by [`StorageKey`], read through
//!   on a pool miss and written back after a successful generation.
//!
//! ## Configuration
//!
//! ```toml
//! [pool]
//! ttl_seconds = 3600
//! ```

mod config;
mod expiry;
mod generator;
mod keys;
mod lock;
pub mod metrics;
mod pool;

pub use config::PoolConfig;
pub use generator::{GenerateError, GenerateResult, Generator};
pub use keys::{PoolKey, StorageKey};
pub use pool::GeneratorPool;
