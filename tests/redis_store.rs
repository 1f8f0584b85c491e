//! Integration tests for the Redis store.
//!
//! These tests require a Redis instance running at `redis://127.0.0.1/`.
//! Tests are ignored by default - run with `cargo test --features redis --test redis_store -- --ignored`

#![cfg(feature = "redis")]

use std::sync::Arc;
use std::time::Duration;

use redis::AsyncCommands;

use ratewarden::ratelimit::{Clock, Decision, Limiter, ManualClock, Quota, RateLimiter};
use ratewarden::store::{LimiterStore, RedisStore, RedisStoreConfig, StoreError};

const REDIS_URL: &str = "redis://127.0.0.1/";

/// Check if Redis is available before running tests
async fn redis_available() -> bool {
    RedisStore::connect(REDIS_URL).await.is_ok()
}

fn test_prefix(test_name: &str) -> String {
    format!("test:ratewarden:{}:", test_name)
}

/// Create a test store with a unique prefix
async fn create_test_store(test_name: &str, ttl: Option<Duration>) -> RedisStore {
    let config = RedisStoreConfig {
        key_prefix: test_prefix(test_name),
        ttl,
    };

    RedisStore::connect_with_config(REDIS_URL, config)
        .await
        .expect("Failed to connect to Redis")
}

async fn raw_connection() -> redis::aio::MultiplexedConnection {
    redis::Client::open(REDIS_URL)
        .unwrap()
        .get_multiplexed_async_connection()
        .await
        .unwrap()
}

async fn remove_key(key: &str) {
    let mut conn = raw_connection().await;
    let _: () = conn.del(key).await.unwrap();
}

fn quota(rate: u32, block: Duration) -> Quota {
    Quota::new(rate, block).unwrap()
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_create_find_update_round_trip() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available at redis://127.0.0.1/");
        return;
    }

    let store = create_test_store("round_trip", None).await;
    let clock = ManualClock::starting_now();
    remove_key(&format!("{}client", test_prefix("round_trip"))).await;

    let mut limiter = Limiter::new("client", quota(4, Duration::from_secs(90)), clock.now());
    store.create(&limiter).await.unwrap();
    assert_eq!(store.find("client").await.unwrap(), limiter);

    limiter.access_count = 4;
    limiter.blocked_at = Some(clock.now());
    store.update(&limiter).await.unwrap();
    assert_eq!(store.find("client").await.unwrap(), limiter);
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_missing_identifier_is_not_found() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let store = create_test_store("not_found", None).await;
    remove_key(&format!("{}nobody", test_prefix("not_found"))).await;

    let result = store.find("nobody").await;
    assert!(matches!(result, Err(StoreError::NotFound(id)) if id == "nobody"));
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_key_uses_prefix() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let store = create_test_store("key_prefix", None).await;
    let clock = ManualClock::starting_now();
    let key = format!("{}10.0.0.1", test_prefix("key_prefix"));

    let limiter = Limiter::new("10.0.0.1", quota(3, Duration::from_secs(30)), clock.now());
    store.create(&limiter).await.unwrap();

    let mut conn = raw_connection().await;
    let raw: Option<String> = conn.get(&key).await.unwrap();
    let decoded: Limiter = serde_json::from_str(&raw.expect("key should exist")).unwrap();
    assert_eq!(decoded, limiter);

    remove_key(&key).await;
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_ttl_covers_block_duration() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let store = create_test_store("ttl", Some(Duration::from_secs(60))).await;
    let key = format!("{}client", test_prefix("ttl"));
    remove_key(&key).await;

    let limiter = RateLimiter::with_clock(Arc::new(store), ManualClock::starting_now());
    let q = quota(1, Duration::from_secs(300));

    assert!(limiter.decide("client", q).await.unwrap().is_allowed());
    let decision = limiter.decide("client", q).await.unwrap();
    assert!(matches!(decision, Decision::Deny { .. }));

    // The configured 60s would drop the record mid-cooldown.
    let mut conn = raw_connection().await;
    let ttl: i64 = conn.ttl(&key).await.unwrap();
    assert!(ttl > 60, "ttl {ttl} should cover the 300s block");
    assert!(ttl <= 300);

    remove_key(&key).await;
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_longer_ttl_is_kept() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let store = create_test_store("long_ttl", Some(Duration::from_secs(3600))).await;
    let clock = ManualClock::starting_now();
    let key = format!("{}client", test_prefix("long_ttl"));

    let limiter = Limiter::new("client", quota(5, Duration::from_secs(30)), clock.now());
    store.create(&limiter).await.unwrap();

    let mut conn = raw_connection().await;
    let ttl: i64 = conn.ttl(&key).await.unwrap();
    assert!(ttl > 300 && ttl <= 3600, "unexpected ttl {ttl}");

    remove_key(&key).await;
}
