//! # Fibonacci Backoff
//!
//! Progressive requeue delays for failed reconciles. Grows more slowly than exponential
//! backoff, so a flapping Infoblox grid is retried often at first without being hammered
//! once an outage drags on.
//!
//! Sequence for reconcile errors: 5s, 5s, 10s, 15s, 25s, 40s, ... capped at 300s.

use std::time::Duration;

/// Smallest requeue delay for a failed reconcile, in seconds
pub const MIN_BACKOFF_SECONDS: u64 = 5;
/// Largest requeue delay for a failed reconcile, in seconds
pub const MAX_BACKOFF_SECONDS: u64 = 300;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, starting at `min_seconds` twice and capped
/// at `max_seconds`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_seconds: u64,
    prev_seconds: u64,
    current_seconds: u64,
    max_seconds: u64,
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(MIN_BACKOFF_SECONDS, MAX_BACKOFF_SECONDS)
    }
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with the given bounds in seconds
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Get the next backoff duration in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_seconds;

        let next = self.prev_seconds + self.current_seconds;
        self.prev_seconds = self.current_seconds;
        self.current_seconds = std::cmp::min(next, self.max_seconds);

        result
    }

    /// Get the next backoff duration as a `Duration` and advance the sequence
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_seconds = 0;
        self.current_seconds = self.min_seconds;
    }
}
