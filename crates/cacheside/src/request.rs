//! Cache-aside request: fluent builder and execution state machine.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::backend::{self, Backend};
use crate::client::Client;
use crate::codec::{self, Shape};
use crate::error::{CacheError, CacheResult};

/// The computation a request wraps. Arguments are passed through from
/// [`Request::execute`]; the error channel is opaque to the cache layer.
pub type ComputeFn<T> = Box<dyn Fn(&[Value]) -> anyhow::Result<T> + Send + Sync>;

/// One cache-aside operation against a shared [`Client`].
///
/// Configure with the `with_*` methods, then call [`Request::execute`].
/// The backend is fixed at construction ([`Client::local`] /
/// [`Client::remote`]); the key may be reassigned to reuse the request
/// for a different entry.
pub struct Request<T> {
    client: Client,
    backend: Backend,
    key: String,
    ttl: Duration,
    compute: Option<ComputeFn<T>>,
    shape: Option<Shape>,
}

impl<T> Request<T> {
    pub(crate) fn new(client: Client, backend: Backend) -> Self {
        Self {
            client,
            backend,
            key: String::new(),
            ttl: Duration::ZERO,
            compute: None,
            shape: None,
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Set the cache key. Required; an empty key disables caching for the
    /// call but does not fail it.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Set the entry TTL. Zero means no explicit expiration: the local
    /// store applies its default TTL, the remote store stores without
    /// expiry.
    pub fn with_expiration(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the computation whose result is cached. Required.
    pub fn with_computation<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.compute = Some(Box::new(f));
        self
    }

    /// Declare the shape of the result. Required; drives the remote decode
    /// strategy.
    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shape = Some(shape);
        self
    }
}

impl<T> Request<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Run the cache-aside state machine: try the backend, fall back to
    /// the computation, store the computed result.
    ///
    /// Cache trouble of any kind (backend missing or unreachable, miss,
    /// decode or encode failure) is logged and absorbed; the computation
    /// still runs and its result is returned. The only errors surfaced to
    /// the caller are [`CacheError::NotConfigured`], raised before any
    /// cache I/O, and [`CacheError::Execution`] when the computation
    /// itself fails.
    pub async fn execute(&self, args: &[Value]) -> CacheResult<T> {
        let shape = self
            .shape
            .ok_or(CacheError::NotConfigured("target shape is not set"))?;
        let compute = self
            .compute
            .as_ref()
            .ok_or(CacheError::NotConfigured("computation is not set"))?;

        if let Err(e) = self.validate() {
            tracing::warn!(key = %self.key, error = %e, "cache is not in effect");
        }

        match self.try_get(shape).await {
            Ok(value) => {
                tracing::debug!(key = %self.key, backend = ?self.backend, "cache hit");
                return Ok(value);
            }
            Err(CacheError::Miss(_)) => {
                tracing::debug!(key = %self.key, backend = ?self.backend, "cache miss, computing");
            }
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "cache read failed, computing");
            }
        }

        let value = compute(args).map_err(CacheError::Execution)?;

        if let Err(e) = self.store(&value).await {
            tracing::warn!(key = %self.key, error = %e, "failed to store computed result");
        }

        Ok(value)
    }

    /// Check the request against the client's stores. Failures here are
    /// recorded by the caller, not surfaced: the computation must still
    /// run.
    fn validate(&self) -> CacheResult<()> {
        if self.backend == Backend::Local && !self.client.has_local_store() {
            self.client.local_store();
        }
        if self.backend == Backend::Remote && self.client.remote_pool().is_none() {
            return Err(CacheError::BackendUnavailable(
                "redis pool is not initialized".to_string(),
            ));
        }
        if self.key.is_empty() {
            return Err(CacheError::NotConfigured("cache key is not set"));
        }
        Ok(())
    }

    async fn try_get(&self, shape: Shape) -> CacheResult<T> {
        match self.backend {
            Backend::Local => self
                .client
                .local_store()
                .get::<T>(&self.key)
                .ok_or_else(|| CacheError::Miss(self.key.clone())),
            Backend::Remote => {
                let pool = self.client.remote_pool().ok_or_else(|| {
                    CacheError::BackendUnavailable("redis pool is not initialized".to_string())
                })?;
                let payload = backend::remote_get(pool, &self.key).await?;
                codec::decode(shape, &payload)
            }
        }
    }

    async fn store(&self, value: &T) -> CacheResult<()> {
        match self.backend {
            Backend::Local => {
                self.client.local_store().set(&self.key, value.clone(), self.ttl);
                Ok(())
            }
            Backend::Remote => {
                let pool = self.client.remote_pool().ok_or_else(|| {
                    CacheError::BackendUnavailable("redis pool is not initialized".to_string())
                })?;
                let payload = codec::encode(value)?;
                backend::remote_set(pool, &self.key, payload, self.ttl).await
            }
        }
    }
}
