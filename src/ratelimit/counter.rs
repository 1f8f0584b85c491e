//! Per-identifier counting record and its transition rule.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{RatewardenError, Result};

/// How long a record stays valid after `created_at`, regardless of quota.
pub const CREATION_WINDOW: Duration = Duration::from_secs(1);

/// The quota applied to an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    rate: u32,
    block_duration: Duration,
}

impl Quota {
    /// Create a quota of `rate` accesses per creation window, with
    /// `block_duration` of cooldown once the rate is exceeded.
    pub fn new(rate: u32, block_duration: Duration) -> Result<Self> {
        if rate == 0 {
            return Err(RatewardenError::Config(
                "rate must be a positive integer".to_string(),
            ));
        }
        Ok(Self {
            rate,
            block_duration,
        })
    }

    /// Maximum accesses allowed within the creation window.
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// How long the identifier stays blocked after exceeding the rate.
    pub fn block_duration(&self) -> Duration {
        self.block_duration
    }
}

/// Outcome of recording one access against a [`Limiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The access was counted.
    Allowed,
    /// The identifier is over quota and its cooldown is active.
    Blocked,
    /// The record is stale and has to be replaced by a fresh one.
    WindowExpired,
}

/// Persisted counting state for a single identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limiter {
    /// The identifier being limited
    pub identifier: String,
    /// Maximum accesses within the creation window
    pub rate: u32,
    /// Accesses recorded since `created_at`
    pub access_count: u32,
    /// When the identifier exceeded its rate, if it has
    pub blocked_at: Option<DateTime<Utc>>,
    /// Cooldown applied after `blocked_at`
    pub block_duration: Duration,
    /// When this record was instantiated
    pub created_at: DateTime<Utc>,
}

impl Limiter {
    /// Create a fresh record with no recorded accesses.
    pub fn new(identifier: impl Into<String>, quota: Quota, now: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.into(),
            rate: quota.rate(),
            access_count: 0,
            blocked_at: None,
            block_duration: quota.block_duration(),
            created_at: now,
        }
    }

    /// Record one access at `now`.
    ///
    /// Checks run in a fixed order: an existing block (active or lapsed),
    /// then the creation window, then the rate. Only `Allowed` increments
    /// `access_count`, and only the access that first exceeds the rate sets
    /// `blocked_at`; every other outcome leaves the record untouched.
    pub fn record_access(&mut self, now: DateTime<Utc>) -> Transition {
        if let Some(blocked_at) = self.blocked_at {
            if elapsed(blocked_at, now) < self.block_duration {
                trace!(identifier = %self.identifier, "Access blocked, cooldown active");
                return Transition::Blocked;
            }
            trace!(identifier = %self.identifier, "Cooldown elapsed");
            return Transition::WindowExpired;
        }

        if elapsed(self.created_at, now) > CREATION_WINDOW {
            trace!(identifier = %self.identifier, "Creation window elapsed");
            return Transition::WindowExpired;
        }

        if self.access_count + 1 > self.rate {
            self.blocked_at = Some(now);
            trace!(
                identifier = %self.identifier,
                block_duration = ?self.block_duration,
                "Rate exceeded, blocking"
            );
            return Transition::Blocked;
        }

        self.access_count += 1;
        trace!(
            identifier = %self.identifier,
            access_count = self.access_count,
            "Access counted"
        );
        Transition::Allowed
    }

    /// Whether the identifier is inside an active cooldown at `now`.
    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        self.blocked_at
            .map(|blocked_at| elapsed(blocked_at, now) < self.block_duration)
            .unwrap_or(false)
    }

    /// Accesses left before the rate is exceeded.
    pub fn remaining(&self) -> u32 {
        self.rate.saturating_sub(self.access_count)
    }

    /// Time until the active cooldown ends, or zero if not blocked.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Duration {
        match self.blocked_at {
            Some(blocked_at) => self.block_duration.saturating_sub(elapsed(blocked_at, now)),
            None => Duration::ZERO,
        }
    }
}

/// Time elapsed from `since` to `now`, clamped to zero if the clock went backwards.
fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}
