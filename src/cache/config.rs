//! Generator pool configuration.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_TTL_SECS: u64 = 60 * 60;

/// Pool behaviour, resolved from the `[pool]` settings section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Sliding lifetime of a cached generator, in seconds.
    pub ttl_seconds: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_TTL_SECS,
        }
    }
}

impl From<&crate::config::PoolSettings> for PoolConfig {
    fn from(settings: &crate::config::PoolSettings) -> Self {
        Self {
            ttl_seconds: settings.ttl.as_secs(),
        }
    }
}

impl PoolConfig {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl_seconds: ttl.as_secs(),
        }
    }

    /// TTL as a duration, clamped to at least one second.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds.max(1))
    }
}
