//! Exponential backoff between retried remote calls.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry budget with exponentially growing delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            retries: 0,
            initial: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Retries `retries` times, starting at `initial` and doubling up to
    /// thirty-two times `initial`.
    pub fn new(retries: u32, initial: Duration) -> Self {
        Self {
            retries,
            initial,
            max: initial * 32,
        }
    }

    /// Caps every delay at `max`.
    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Delays to wait before each retry, in order.
    pub fn delays(&self) -> Backoff {
        Backoff {
            current: self.initial,
            max: self.max,
            remaining: self.retries,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Iterator over retry delays; doubles each step, capped at the maximum.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
    remaining: u32,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let delay = self.current.min(self.max);
        self.current = (self.current * 2).min(self.max);
        Some(delay)
    }
}
