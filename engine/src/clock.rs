//! Wall-clock time source used for field timestamps and pending mutations.
//!
//! Every timestamp recorded by the engine goes through a [`Clock`], which
//! keeps last-write-wins comparisons honest: incoming timestamps are clamped
//! to "now" before they are stored.

use crate::Timestamp;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

/// A source of the current time in milliseconds since the Unix epoch.
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Clamp a timestamp so it is never ahead of `now`.
pub fn clamp(timestamp: Timestamp, now: Timestamp) -> Timestamp {
    timestamp.min(now)
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        // Pre-epoch system time maps to zero.
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// A clock that only moves when told to.
///
/// Used for deterministic replay and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `now`.
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move forward by `delta` milliseconds and return the new time.
    pub fn advance(&self, delta: Timestamp) -> Timestamp {
        self.now.fetch_add(delta, Ordering::SeqCst) + delta
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
