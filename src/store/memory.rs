//! In-process store backed by a sharded map.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use super::{LimiterStore, StoreError};
use crate::ratelimit::Limiter;

/// Keeps limiter records in memory, keyed by identifier.
///
/// Records are never evicted; an expired record is simply overwritten the
/// next time its identifier is seen.
#[derive(Debug, Default)]
pub struct MemoryStore {
    limiters: DashMap<String, Limiter>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// Remove all records.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.limiters.clear();
    }
}

#[async_trait]
impl LimiterStore for MemoryStore {
    async fn create(&self, limiter: &Limiter) -> Result<(), StoreError> {
        trace!(identifier = %limiter.identifier, "Storing new limiter");
        self.limiters
            .insert(limiter.identifier.clone(), limiter.clone());
        Ok(())
    }

    async fn update(&self, limiter: &Limiter) -> Result<(), StoreError> {
        self.create(limiter).await
    }

    async fn find(&self, identifier: &str) -> Result<Limiter, StoreError> {
        self.limiters
            .get(identifier)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(identifier.to_string()))
    }
}
