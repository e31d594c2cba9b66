//! Mutable field primitive with last-write-wins semantics.
//!
//! A [`Mutable`] pairs a value with the time it last changed. Fields are
//! never edited in place: every change yields a new field, and a no-op write
//! hands back the existing one.

use crate::clock::{clamp, Clock};
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// A value plus the time it was last changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutable<T> {
    /// Current value (`null` is a valid value for JSON fields)
    pub value: T,
    /// When the value last changed (milliseconds since epoch)
    pub changed_at: Timestamp,
}

impl<T> Mutable<T> {
    /// Create a field stamped with the clock's current time.
    pub fn now(value: T, clock: &dyn Clock) -> Self {
        Self {
            value,
            changed_at: clock.now(),
        }
    }

    /// Create a field with an explicit timestamp.
    ///
    /// The timestamp is taken as-is; callers pass one that is already clamped.
    pub fn at(value: T, changed_at: Timestamp) -> Self {
        Self { value, changed_at }
    }

    /// Pull a future timestamp back to `now`. The value is kept.
    pub fn clamped(mut self, now: Timestamp) -> Self {
        self.changed_at = clamp(self.changed_at, now);
        self
    }

    /// Last-write-wins merge of `incoming` into `self`.
    ///
    /// The incoming timestamp is clamped to `now` first. The incoming field
    /// replaces the stored one unless it is strictly older, so equal
    /// timestamps resolve to the last applied write. Returns whether `self`
    /// was replaced.
    pub fn merge(&mut self, incoming: Mutable<T>, now: Timestamp) -> bool {
        let incoming = incoming.clamped(now);
        if incoming.changed_at < self.changed_at {
            return false;
        }
        *self = incoming;
        true
    }
}

impl<T: PartialEq + Clone> Mutable<T> {
    /// Write `value` into the field.
    ///
    /// Returns the existing field (same reference) when `value` equals the
    /// current value, otherwise a new field stamped with the current time.
    pub fn update(&self, value: T, clock: &dyn Clock) -> Cow<'_, Mutable<T>> {
        if self.value == value {
            Cow::Borrowed(self)
        } else {
            Cow::Owned(Mutable::now(value, clock))
        }
    }
}
