//! Core rate limiter: the admission decision for one request.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::clock::{Clock, SystemClock};
use super::counter::{Limiter, Quota, Transition};
use super::registry::LockRegistry;
use crate::store::{LimiterStore, StoreError};

/// Outcome of an admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Allow {
        /// The identifier's rate
        limit: u32,
        /// Accesses left in the current window
        remaining: u32,
    },
    /// The request must be rejected.
    Deny {
        /// The identifier's rate
        limit: u32,
        /// Time until the cooldown ends
        retry_after: Duration,
    },
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }
}

/// The decision service.
///
/// Every call re-reads the identifier's record from the store, applies one
/// access to it and writes it back, all while holding that identifier's lock.
/// Store failures are returned once, never retried.
pub struct RateLimiter<S: LimiterStore + ?Sized, C: Clock = SystemClock> {
    /// Persistent counting state
    store: Arc<S>,
    /// Time source for record transitions
    clock: C,
    /// Serializes decisions per identifier
    locks: LockRegistry,
}

impl<S: LimiterStore + ?Sized> RateLimiter<S> {
    /// Create a rate limiter over `store` using the system clock.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, SystemClock::new())
    }
}

impl<S: LimiterStore + ?Sized, C: Clock> RateLimiter<S, C> {
    /// Create a rate limiter with an explicit time source.
    pub fn with_clock(store: Arc<S>, clock: C) -> Self {
        Self {
            store,
            clock,
            locks: LockRegistry::new(),
        }
    }

    /// Decide whether a request from `identifier` is admitted under `quota`.
    #[instrument(skip(self, quota), fields(rate = quota.rate()))]
    pub async fn decide(&self, identifier: &str, quota: Quota) -> Result<Decision, StoreError> {
        let lock = self.locks.acquire(identifier).await;

        let decision = match self.store.find(identifier).await {
            Ok(mut limiter) => match limiter.record_access(self.clock.now()) {
                Transition::Allowed => {
                    self.persist(&limiter).await?;
                    debug!(access_count = limiter.access_count, "Access allowed");
                    allowed(&limiter)
                }
                Transition::WindowExpired => {
                    debug!("Limiter expired, starting a fresh window");
                    let limiter = self.fresh(identifier, quota);
                    self.persist(&limiter).await?;
                    allowed(&limiter)
                }
                Transition::Blocked => {
                    self.persist(&limiter).await?;
                    let retry_after = limiter.retry_after(self.clock.now());
                    info!(retry_after = ?retry_after, "Rate limit exceeded");
                    Decision::Deny {
                        limit: limiter.rate,
                        retry_after,
                    }
                }
            },
            Err(StoreError::NotFound(_)) => {
                debug!("No limiter found, creating one");
                let limiter = self.fresh(identifier, quota);
                self.store
                    .create(&limiter)
                    .await
                    .inspect_err(|e| warn!(error = %e, "Failed to create limiter"))?;
                allowed(&limiter)
            }
            Err(e) => {
                warn!(error = %e, "Failed to load limiter");
                return Err(e);
            }
        };

        lock.release();
        Ok(decision)
    }

    /// Like [`decide`](Self::decide), but gives up after `timeout`.
    ///
    /// On timeout the in-flight decision is dropped, which releases the
    /// identifier's lock.
    pub async fn decide_within(
        &self,
        identifier: &str,
        quota: Quota,
        timeout: Duration,
    ) -> Result<Decision, StoreError> {
        match tokio::time::timeout(timeout, self.decide(identifier, quota)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(identifier = %identifier, timeout = ?timeout, "Decision timed out");
                Err(StoreError::Timeout(timeout))
            }
        }
    }

    /// Number of identifiers with a decision currently in flight.
    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn persist(&self, limiter: &Limiter) -> Result<(), StoreError> {
        self.store
            .update(limiter)
            .await
            .inspect_err(|e| warn!(error = %e, "Failed to update limiter"))
    }

    /// A new record with its first access already counted.
    fn fresh(&self, identifier: &str, quota: Quota) -> Limiter {
        let now = self.clock.now();
        let mut limiter = Limiter::new(identifier, quota, now);
        // A fresh record with a positive rate always admits its first access.
        let transition = limiter.record_access(now);
        debug_assert_eq!(transition, Transition::Allowed);
        limiter
    }
}

fn allowed(limiter: &Limiter) -> Decision {
    Decision::Allow {
        limit: limiter.rate,
        remaining: limiter.remaining(),
    }
}
