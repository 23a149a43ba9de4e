//! Error types for cache-aside execution

use thiserror::Error;

/// Result type for cache-aside operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur while executing a cache-aside request.
///
/// Only [`CacheError::NotConfigured`] and [`CacheError::Execution`] ever
/// reach the caller of `execute`; every other variant is absorbed by the
/// orchestrator and logged, with execution falling through to the
/// computation.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The request is missing a required piece of configuration
    #[error("request is not configured: {0}")]
    NotConfigured(&'static str),

    /// The remote store is not initialized or cannot be reached
    #[error("cache backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The key is absent from the backend
    #[error("cache key '{0}' not found")]
    Miss(String),

    /// A cached payload could not be decoded into the declared shape
    #[error("failed to decode cached payload: {0}")]
    Decode(#[source] serde_json::Error),

    /// The result could not be encoded for the remote store
    #[error("failed to encode result: {0}")]
    Encode(#[source] serde_json::Error),

    /// The wrapped computation itself failed
    #[error("computation failed: {0}")]
    Execution(#[source] anyhow::Error),
}
