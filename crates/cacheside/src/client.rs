//! Shared cache client.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use deadpool_redis::Pool;

use crate::backend::{Backend, LocalStore};
use crate::config::CacheConfig;
use crate::request::Request;

/// Shared handle over the configured cache stores.
///
/// Constructed once at startup and cloned freely; every request created
/// from it shares the same stores. A missing local store is created on
/// first use with the default policy. A missing Redis pool is never
/// created lazily: remote requests degrade to computing without a cache.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    local: OnceLock<LocalStore>,
    remote: Option<Pool>,
}

impl Client {
    /// Create a client from pre-built stores. Either may be absent.
    pub fn new(local: Option<LocalStore>, remote: Option<Pool>) -> Self {
        let cell = OnceLock::new();
        if let Some(store) = local {
            // a fresh cell cannot already be set
            let _ = cell.set(store);
        }
        Self {
            inner: Arc::new(ClientInner {
                local: cell,
                remote,
            }),
        }
    }

    /// Build a client from configuration.
    ///
    /// When Redis is disabled, or the pool cannot be created or reached,
    /// the client comes up local-only and remote requests fall through to
    /// their computation.
    pub async fn from_config(config: &CacheConfig) -> Self {
        let local = LocalStore::new(
            Duration::from_secs(config.local.default_ttl_secs),
            Duration::from_secs(config.local.sweep_interval_secs),
        );

        if !config.redis.enabled {
            tracing::info!("redis disabled, using local cache only");
            return Self::new(Some(local), None);
        }

        tracing::info!(url = %config.redis.url, "connecting to redis");

        let mut redis_config = deadpool_redis::Config::from_url(&config.redis.url);
        let pool_config = redis_config.pool.get_or_insert_with(Default::default);
        pool_config.max_size = config.redis.pool_size;
        let timeout = Some(Duration::from_millis(config.redis.timeout_ms));
        pool_config.timeouts.wait = timeout;
        pool_config.timeouts.create = timeout;
        pool_config.timeouts.recycle = timeout;

        let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
            Ok(pool) => pool,
            Err(e) => {
                tracing::warn!(error = %e, "failed to create redis pool, using local cache only");
                return Self::new(Some(local), None);
            }
        };

        match pool.get().await {
            Ok(_) => {
                tracing::info!("connected to redis");
                Self::new(Some(local), Some(pool))
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to connect to redis, using local cache only");
                Self::new(Some(local), None)
            }
        }
    }

    /// Start a request against the local backend.
    pub fn local<T>(&self) -> Request<T> {
        Request::new(self.clone(), Backend::Local)
    }

    /// Start a request against the remote backend.
    pub fn remote<T>(&self) -> Request<T> {
        Request::new(self.clone(), Backend::Remote)
    }

    /// The shared local store, created with the default policy on first
    /// use. Exposed for maintenance (invalidation, purging) and tests.
    pub fn local_store(&self) -> &LocalStore {
        self.inner.local.get_or_init(LocalStore::with_defaults)
    }

    pub(crate) fn has_local_store(&self) -> bool {
        self.inner.local.get().is_some()
    }

    pub(crate) fn remote_pool(&self) -> Option<&Pool> {
        self.inner.remote.as_ref()
    }
}
