//! Configuration for the shared cache client.

use serde::{Deserialize, Serialize};

/// Top-level cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Remote (Redis) store settings
    #[serde(default)]
    pub redis: RedisConfig,

    /// Local in-process store settings
    #[serde(default)]
    pub local: LocalCacheConfig,
}

/// Redis configuration for the remote backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (the client gracefully degrades without it)
    /// Default: false (local-only deployments)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// Local store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalCacheConfig {
    /// Item TTL applied when a request does not set an expiration, in seconds
    #[serde(default = "default_local_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Interval between background sweeps of expired entries, in seconds
    #[serde(default = "default_local_sweep_secs")]
    pub sweep_interval_secs: u64,
}

fn default_local_ttl_secs() -> u64 {
    3600
}

fn default_local_sweep_secs() -> u64 {
    3600
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_local_ttl_secs(),
            sweep_interval_secs: default_local_sweep_secs(),
        }
    }
}
