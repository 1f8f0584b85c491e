//! Per-identifier mutual exclusion.
//!
//! Decisions for the same identifier must not interleave their
//! load-transition-persist sequence, otherwise two requests can both read
//! `access_count = rate - 1` and both be allowed. Decisions for different
//! identifiers share nothing but a shard of the lock table, which is only
//! locked for lookup-or-insert.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Lazily populated table of per-identifier locks.
///
/// Entries are reclaimed when the last holder releases its lock and no other
/// task is waiting for it, so the table only grows with the number of
/// identifiers that currently have a decision in flight.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LockRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `identifier`.
    ///
    /// The returned handle keeps the identifier locked until it is released
    /// or dropped, which also covers a decision future being cancelled.
    pub async fn acquire(&self, identifier: &str) -> IdentifierLock<'_> {
        // Clone the Arc out so the shard guard is gone before we await.
        let lock = self
            .locks
            .entry(identifier.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = Waiter {
            registry: self,
            identifier,
            acquiring: Box::pin(lock.lock_owned()),
            acquired: false,
        }
        .await;
        trace!(identifier = %identifier, "Identifier lock acquired");

        IdentifierLock {
            registry: self,
            identifier: identifier.to_string(),
            _guard: guard,
        }
    }

    /// Number of identifiers that currently have a lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no identifier currently has a lock entry.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// An `acquire` still waiting for the identifier's mutex.
///
/// A waiter that is dropped before it gets the lock reclaims the table entry
/// if nobody else holds or awaits it. Without this, a waiter woken by a
/// release and then cancelled would leave the entry behind.
struct Waiter<'a, F> {
    registry: &'a LockRegistry,
    identifier: &'a str,
    acquiring: Pin<Box<F>>,
    acquired: bool,
}

impl<F> Future for Waiter<'_, F>
where
    F: Future<Output = OwnedMutexGuard<()>>,
{
    type Output = OwnedMutexGuard<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let guard = ready!(this.acquiring.as_mut().poll(cx));
        this.acquired = true;
        Poll::Ready(guard)
    }
}

impl<F> Drop for Waiter<'_, F> {
    fn drop(&mut self) {
        if self.acquired {
            return;
        }
        // `acquiring` still owns its clone of the lock here, so two references
        // means the table and this waiter only.
        let removed = self
            .registry
            .locks
            .remove_if(self.identifier, |_, lock| Arc::strong_count(lock) == 2)
            .is_some();
        trace!(
            identifier = %self.identifier,
            reclaimed = removed,
            "Identifier lock wait abandoned"
        );
    }
}

/// Exclusive access to one identifier, released on drop.
#[derive(Debug)]
pub struct IdentifierLock<'a> {
    registry: &'a LockRegistry,
    identifier: String,
    _guard: OwnedMutexGuard<()>,
}

impl IdentifierLock<'_> {
    /// The identifier this handle guards.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Release the lock.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for IdentifierLock<'_> {
    fn drop(&mut self) {
        // Two references left means the table and our guard: nobody is
        // waiting. Waiters clone under the same shard lock `remove_if` takes,
        // so the count cannot change between the check and the removal.
        let removed = self
            .registry
            .locks
            .remove_if(&self.identifier, |_, lock| Arc::strong_count(lock) == 2)
            .is_some();
        trace!(
            identifier = %self.identifier,
            reclaimed = removed,
            "Identifier lock released"
        );
        // `_guard` drops after this body, unlocking the mutex.
    }
}
