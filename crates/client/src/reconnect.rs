//! Exponential-backoff policy for push-channel reconnection.
//!
//! [`BackoffPolicy::delay`] is a pure function of the attempt counter so the
//! schedule can be tested without any transport. The
//! [`EventChannel`](crate::channel::EventChannel) keys it on its retry
//! counter, which resets to zero whenever the channel reaches Open.

use std::time::Duration;

/// Default delay before the first retry.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Default upper bound on the delay between retries.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay for attempt `0`. Never zero in practice, so the first retry is
    /// not a hot retry.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            cap: DEFAULT_BACKOFF_CAP,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Wait before retry number `attempt`: `min(base * 2^attempt, cap)`.
    ///
    /// Overflow of the multiplication saturates at the cap.
    pub fn delay(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |d| d.min(self.cap))
    }
}
