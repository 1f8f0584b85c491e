//! Redis-backed store.
//!
//! Each limiter is stored as a JSON document under `<key_prefix><identifier>`,
//! so several service instances can share counting state. Redis gives no
//! read-modify-write atomicity across instances here; the per-identifier lock
//! only serializes decisions within one process.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use tracing::{trace, warn};

use super::{LimiterStore, StoreError};
use crate::ratelimit::{Limiter, CREATION_WINDOW};

/// Configuration for the Redis store.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Prefix prepended to every identifier key
    pub key_prefix: String,
    /// Expiry applied to each written key, if any. A record never expires
    /// before its own block duration or the creation window has passed.
    pub ttl: Option<Duration>,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "ratewarden:".to_string(),
            ttl: None,
        }
    }
}

/// Stores limiter records in Redis.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis with default configuration.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(backend)?;
        let connection = ConnectionManager::new(client).await.map_err(backend)?;

        Ok(Self { connection, config })
    }

    fn key(&self, identifier: &str) -> String {
        format!("{}{}", self.config.key_prefix, identifier)
    }

    async fn put(&self, limiter: &Limiter) -> Result<(), StoreError> {
        let key = self.key(&limiter.identifier);
        let payload = serde_json::to_string(limiter)?;
        let mut conn = self.connection.clone();

        let result = match self.config.ttl {
            Some(ttl) => {
                conn.set_ex::<_, _, ()>(&key, payload, expiry_secs(ttl, limiter))
                    .await
            }
            None => conn.set::<_, _, ()>(&key, payload).await,
        };

        result.map_err(|e| {
            warn!(key = %key, error = %e, "Failed to write limiter to Redis");
            backend(e)
        })
    }
}

#[async_trait]
impl LimiterStore for RedisStore {
    async fn create(&self, limiter: &Limiter) -> Result<(), StoreError> {
        self.put(limiter).await
    }

    async fn update(&self, limiter: &Limiter) -> Result<(), StoreError> {
        self.put(limiter).await
    }

    async fn find(&self, identifier: &str) -> Result<Limiter, StoreError> {
        let key = self.key(identifier);
        let mut conn = self.connection.clone();

        let payload: Option<String> = conn.get(&key).await.map_err(|e| {
            warn!(key = %key, error = %e, "Failed to read limiter from Redis");
            backend(e)
        })?;

        match payload {
            Some(payload) => Ok(serde_json::from_str(&payload)?),
            None => {
                trace!(key = %key, "Limiter not found in Redis");
                Err(StoreError::NotFound(identifier.to_string()))
            }
        }
    }
}

fn backend(err: RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// Whole seconds a written record is kept for.
///
/// A key that expired mid-cooldown would read back as `NotFound` and let the
/// identifier start over, so the configured TTL is only a lower bound.
fn expiry_secs(ttl: Duration, limiter: &Limiter) -> u64 {
    let keep = ttl.max(limiter.block_duration).max(CREATION_WINDOW);
    let secs = keep.as_secs() + u64::from(keep.subsec_nanos() > 0);
    secs.max(1)
}
