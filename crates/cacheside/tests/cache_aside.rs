//! Integration tests for the cache-aside execution wrapper.
//!
//! The local backend and the degradation paths are covered without any
//! external service. Tests against a real Redis use testcontainers and
//! are `#[ignore]`d so the default suite needs no Docker daemon.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cacheside::{CacheError, Client, LocalStore, Shape};

/// Make the orchestrator's soft-failure warn/debug logs visible when the
/// suite runs with `RUST_LOG` set. Safe to call from every test; only the
/// first registration wins.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Person {
    name: String,
    age: u32,
}

fn fake_person() -> Person {
    Person {
        name: "fake-name".to_string(),
        age: 25,
    }
}

/// Computation that counts its invocations.
fn counted_person(counter: &Arc<AtomicUsize>) -> impl Fn(&[serde_json::Value]) -> anyhow::Result<Person> + Send + Sync + 'static
{
    let counter = Arc::clone(counter);
    move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(fake_person())
    }
}

fn unreachable_pool() -> deadpool_redis::Pool {
    let mut config = deadpool_redis::Config::from_url("redis://127.0.0.1:1");
    let pool_config = config.pool.get_or_insert_with(Default::default);
    pool_config.max_size = 2;
    let timeout = Some(Duration::from_millis(200));
    pool_config.timeouts.wait = timeout;
    pool_config.timeouts.create = timeout;
    config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .expect("create pool")
}

#[tokio::test]
async fn test_local_miss_then_hit() {
    let client = Client::new(Some(LocalStore::with_defaults()), None);
    let counter = Arc::new(AtomicUsize::new(0));

    let request = client
        .local::<Person>()
        .with_key("k1")
        .with_expiration(Duration::from_secs(60))
        .with_shape(Shape::Mapping)
        .with_computation(counted_person(&counter));

    let first = request.execute(&[]).await.unwrap();
    assert_eq!(first, fake_person());
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    // served from cache, the computation does not run again
    let second = request.execute(&[]).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_local_repeated_executions_stable() {
    let client = Client::new(Some(LocalStore::with_defaults()), None);
    let request = client
        .local::<Vec<u32>>()
        .with_key("seq")
        .with_expiration(Duration::from_secs(60))
        .with_shape(Shape::Sequence)
        .with_computation(|_| Ok(vec![1, 2, 3]));

    for _ in 0..5 {
        assert_eq!(request.execute(&[]).await.unwrap(), vec![1, 2, 3]);
    }
}

#[tokio::test]
async fn test_local_expiration_recomputes() {
    let client = Client::new(Some(LocalStore::with_defaults()), None);
    let counter = Arc::new(AtomicUsize::new(0));

    let request = client
        .local::<Person>()
        .with_key("expiring")
        .with_expiration(Duration::from_millis(30))
        .with_shape(Shape::Mapping)
        .with_computation(counted_person(&counter));

    request.execute(&[]).await.unwrap();
    request.execute(&[]).await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(60)).await;

    request.execute(&[]).await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_missing_computation_is_not_configured() {
    let client = Client::new(None, None);
    let request = client
        .local::<u32>()
        .with_key("k")
        .with_shape(Shape::Scalar);

    let err = request.execute(&[]).await.unwrap_err();
    assert!(matches!(err, CacheError::NotConfigured(_)));
    // no cache I/O happened: the lazy local store was never created
    assert!(client.local_store().is_empty());
}

#[tokio::test]
async fn test_missing_shape_is_not_configured() {
    let client = Client::new(None, None);
    let request = client
        .local::<u32>()
        .with_key("k")
        .with_computation(|_| Ok(1));

    let err = request.execute(&[]).await.unwrap_err();
    assert!(matches!(err, CacheError::NotConfigured(_)));
    assert!(client.local_store().is_empty());
}

#[tokio::test]
async fn test_empty_key_still_computes() {
    init_logging();
    let client = Client::new(None, None);
    let request = client
        .local::<u32>()
        .with_shape(Shape::Scalar)
        .with_computation(|_| Ok(25));

    // a missing key disables caching for the call but does not fail it
    assert_eq!(request.execute(&[]).await.unwrap(), 25);
}

#[tokio::test]
async fn test_computation_error_surfaces() {
    let client = Client::new(None, None);
    let request = client
        .local::<u32>()
        .with_key("k")
        .with_shape(Shape::Scalar)
        .with_computation(|_| Err(anyhow::anyhow!("fake-error")));

    let err = request.execute(&[]).await.unwrap_err();
    assert!(matches!(err, CacheError::Execution(_)));
    assert!(err.to_string().contains("computation failed"));
}

#[tokio::test]
async fn test_remote_pool_missing_degrades_to_compute() {
    init_logging();
    let client = Client::new(None, None);
    let counter = Arc::new(AtomicUsize::new(0));

    let request = client
        .remote::<Person>()
        .with_key("k1")
        .with_expiration(Duration::from_secs(60))
        .with_shape(Shape::Mapping)
        .with_computation(counted_person(&counter));

    // no surfaced error, and nothing can be cached either
    assert_eq!(request.execute(&[]).await.unwrap(), fake_person());
    assert_eq!(request.execute(&[]).await.unwrap(), fake_person());
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_remote_unreachable_degrades_to_compute() {
    init_logging();
    let client = Client::new(None, Some(unreachable_pool()));
    let counter = Arc::new(AtomicUsize::new(0));

    let request = client
        .remote::<Person>()
        .with_key("k1")
        .with_expiration(Duration::from_secs(60))
        .with_shape(Shape::Mapping)
        .with_computation(counted_person(&counter));

    assert_eq!(request.execute(&[]).await.unwrap(), fake_person());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_request_reused_with_reassigned_key() {
    let client = Client::new(Some(LocalStore::with_defaults()), None);
    let counter = Arc::new(AtomicUsize::new(0));

    let request = client
        .local::<Person>()
        .with_key("first")
        .with_expiration(Duration::from_secs(60))
        .with_shape(Shape::Mapping)
        .with_computation(counted_person(&counter));

    request.execute(&[]).await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    // a different key is cold, the same instance recomputes for it
    let request = request.with_key("second");
    request.execute(&[]).await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    request.execute(&[]).await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_args_reach_computation() {
    let client = Client::new(Some(LocalStore::with_defaults()), None);
    let request = client
        .local::<String>()
        .with_key("greeting")
        .with_shape(Shape::Scalar)
        .with_computation(|args| {
            let name = args
                .first()
                .and_then(|v| v.as_str())
                .unwrap_or("world");
            Ok(format!("hello {name}"))
        });

    let value = request
        .execute(&[serde_json::json!("cacheside")])
        .await
        .unwrap();
    assert_eq!(value, "hello cacheside");
}

#[tokio::test]
async fn test_concurrent_requests_share_client() {
    let client = Client::new(Some(LocalStore::with_defaults()), None);
    let counter = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..8 {
        let client = client.clone();
        let counter = Arc::clone(&counter);
        handles.push(tokio::spawn(async move {
            let request = client
                .local::<Person>()
                .with_key(format!("key-{}", i % 2))
                .with_expiration(Duration::from_secs(60))
                .with_shape(Shape::Mapping)
                .with_computation(counted_person(&counter));
            request.execute(&[]).await.unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), fake_person());
    }

    // no single-flight: concurrent cold misses may each compute, but once
    // warm both keys are served from the store
    let warm = counter.load(Ordering::SeqCst);
    let request = client
        .local::<Person>()
        .with_key("key-0")
        .with_shape(Shape::Mapping)
        .with_computation(counted_person(&counter));
    request.execute(&[]).await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), warm);
}

mod live_redis {
    //! Tests against a real Redis via testcontainers, mirroring the
    //! non-ignored suite on the remote path.

    use super::*;
    use testcontainers::runners::AsyncRunner;
    use testcontainers_modules::redis::Redis;

    async fn redis_client() -> (testcontainers::ContainerAsync<Redis>, Client) {
        let container = Redis::default()
            .start()
            .await
            .expect("start redis container");
        let port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("get redis port");
        let pool = deadpool_redis::Config::from_url(format!("redis://127.0.0.1:{port}"))
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .expect("create pool");
        (container, Client::new(None, Some(pool)))
    }

    #[tokio::test]
    #[ignore = "requires a running Docker daemon"]
    async fn test_remote_miss_then_hit() {
        let (_container, client) = redis_client().await;
        let counter = Arc::new(AtomicUsize::new(0));

        let request = client
            .remote::<Person>()
            .with_key("k1")
            .with_expiration(Duration::from_secs(60))
            .with_shape(Shape::Mapping)
            .with_computation(counted_person(&counter));

        assert_eq!(request.execute(&[]).await.unwrap(), fake_person());
        assert_eq!(request.execute(&[]).await.unwrap(), fake_person());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[ignore = "requires a running Docker daemon"]
    async fn test_remote_expiration_recomputes() {
        let (_container, client) = redis_client().await;
        let counter = Arc::new(AtomicUsize::new(0));

        let request = client
            .remote::<Person>()
            .with_key("expiring")
            .with_expiration(Duration::from_millis(80))
            .with_shape(Shape::Mapping)
            .with_computation(counted_person(&counter));

        request.execute(&[]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        request.execute(&[]).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    #[ignore = "requires a running Docker daemon"]
    async fn test_remote_round_trip_shapes() {
        let (_container, client) = redis_client().await;

        let scalar = client
            .remote::<u32>()
            .with_key("scalar")
            .with_shape(Shape::Scalar)
            .with_computation(|_| Ok(25));
        assert_eq!(scalar.execute(&[]).await.unwrap(), 25);
        assert_eq!(scalar.execute(&[]).await.unwrap(), 25);

        let sequence = client
            .remote::<Vec<Person>>()
            .with_key("sequence")
            .with_shape(Shape::Sequence)
            .with_computation(|_| Ok(vec![fake_person(), fake_person()]));
        assert_eq!(sequence.execute(&[]).await.unwrap().len(), 2);
        assert_eq!(sequence.execute(&[]).await.unwrap()[1], fake_person());

        let mapping = client
            .remote::<HashMap<String, Person>>()
            .with_key("mapping")
            .with_shape(Shape::Mapping)
            .with_computation(|_| {
                let mut people = HashMap::new();
                people.insert("person1".to_string(), fake_person());
                Ok(people)
            });
        assert_eq!(mapping.execute(&[]).await.unwrap()["person1"], fake_person());
        assert_eq!(mapping.execute(&[]).await.unwrap()["person1"], fake_person());

        let pointer = client
            .remote::<Box<Person>>()
            .with_key("pointer")
            .with_shape(Shape::Pointer)
            .with_computation(|_| Ok(Box::new(fake_person())));
        assert_eq!(*pointer.execute(&[]).await.unwrap(), fake_person());
        assert_eq!(*pointer.execute(&[]).await.unwrap(), fake_person());
    }

    #[tokio::test]
    #[ignore = "requires a running Docker daemon"]
    async fn test_remote_corrupt_payload_recomputes() {
    init_logging();
        use redis::AsyncCommands;

        let (_container, client) = redis_client().await;
        let counter = Arc::new(AtomicUsize::new(0));

        let request = client
            .remote::<Person>()
            .with_key("corrupt")
            .with_expiration(Duration::from_secs(60))
            .with_shape(Shape::Mapping)
            .with_computation(counted_person(&counter));

        request.execute(&[]).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // overwrite with bytes that cannot decode as a Person
        let pool = deadpool_redis::Config::from_url(format!(
            "redis://127.0.0.1:{}",
            _container.get_host_port_ipv4(6379).await.expect("get port")
        ))
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .expect("create pool");
        let mut conn = pool.get().await.expect("get connection");
        conn.set::<_, _, ()>("corrupt", "[1,2,3]").await.expect("set");

        // decode failure is soft: the computation runs and rewrites
        assert_eq!(request.execute(&[]).await.unwrap(), fake_person());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
