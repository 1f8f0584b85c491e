//! Persistence contract for limiter records.
//!
//! The rate limiter only needs to create, overwrite and look up a record by
//! identifier, and to tell "not found" apart from every other failure. Any
//! backend that can do that is a valid store.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::ratelimit::Limiter;

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::{RedisStore, RedisStoreConfig};

/// Errors returned by a [`LimiterStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists for the identifier
    #[error("No limiter found for identifier {0}")]
    NotFound(String),

    /// The backend failed to read or write
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A stored record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The decision did not complete in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Trait for limiter persistence backends.
#[async_trait]
pub trait LimiterStore: Send + Sync {
    /// Persist a new record.
    async fn create(&self, limiter: &Limiter) -> Result<(), StoreError>;

    /// Overwrite the record for `limiter.identifier`.
    async fn update(&self, limiter: &Limiter) -> Result<(), StoreError>;

    /// Look up the record for `identifier`, failing with
    /// [`StoreError::NotFound`] when there is none.
    async fn find(&self, identifier: &str) -> Result<Limiter, StoreError>;
}
