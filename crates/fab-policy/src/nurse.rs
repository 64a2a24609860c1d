// SPDX-License-Identifier: MIT OR Apache-2.0
//! The nurse: retry decisions for retriable failure classes.
//!
//! Retries are bounded with exponential backoff and apply only to the
//! retriable error classes; everything else goes straight to compensation.

use fab_error::ErrorCode;
use std::time::Duration;

/// Bounded exponential-backoff retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// The default policy: 3 attempts, 100 ms base, 5 s cap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the attempt bound.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Override the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Override the delay cap.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// The attempt bound.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide what to do after attempt number `attempt` (1-based) failed
    /// with `code`.
    #[must_use]
    pub fn decide(&self, code: ErrorCode, attempt: u32) -> RetryDecision {
        if !code.is_retriable() {
            return RetryDecision::GiveUp {
                reason: format!("{code} is not retriable"),
            };
        }
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("{attempt} attempts exhausted"),
            };
        }
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(exp))
            .min(self.max_delay);
        RetryDecision::Retry {
            attempt: attempt + 1,
            delay,
        }
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the delay.
    Retry {
        /// The attempt number to run next (1-based).
        attempt: u32,
        /// How long to wait first.
        delay: Duration,
    },
    /// Stop retrying; compensate and terminate.
    GiveUp {
        /// Why.
        reason: String,
    },
}

impl RetryDecision {
    /// Returns `true` for [`RetryDecision::Retry`].
    #[must_use]
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }
}
