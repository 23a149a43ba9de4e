//! Typed cache-aside execution wrapper.
//!
//! Wraps an arbitrary computation with a cache lookup: a request first
//! tries to serve a previously computed result from its backend and only
//! runs the computation on a miss, storing the result afterwards. Two
//! interchangeable backends are supported through one surface:
//!
//! - **Local**: an in-process typed store. Values are kept as native Rust
//!   values with a per-entry TTL; a hit is a clone, never a decode.
//! - **Remote**: Redis through a connection pool. Values are stored as
//!   self-describing JSON and decoded back per the declared result shape.
//!
//! The cache is strictly an optimization layer. Backend trouble of any
//! kind (pool missing, Redis unreachable, corrupt payload) is logged and
//! absorbed; the computation still runs and its result is returned. Only
//! a misconfigured request or a failing computation surface as errors.
//!
//! ```no_run
//! use std::time::Duration;
//! use cacheside::{Client, Shape};
//!
//! # async fn run() -> cacheside::CacheResult<()> {
//! let client = Client::new(None, None);
//!
//! let answer = client
//!     .local::<u32>()
//!     .with_key("answer")
//!     .with_expiration(Duration::from_secs(60))
//!     .with_shape(Shape::Scalar)
//!     .with_computation(|_| Ok(42))
//!     .execute(&[])
//!     .await?;
//! assert_eq!(answer, 42);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod request;

pub use backend::{Backend, LocalStore};
pub use client::Client;
pub use codec::Shape;
pub use config::{CacheConfig, LocalCacheConfig, RedisConfig};
pub use error::{CacheError, CacheResult};
pub use request::{ComputeFn, Request};
