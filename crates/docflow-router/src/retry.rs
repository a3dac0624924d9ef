use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential backoff with an optional full jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Redeliveries after the first attempt.
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, base_secs: u64, max_secs: u64, jitter: bool) -> Self {
        Self {
            max_retries,
            backoff_base: Duration::from_secs(base_secs),
            backoff_max: Duration::from_secs(max_secs),
            jitter,
        }
    }

    /// `attempt` counts failed deliveries so far, starting at 1.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    /// Upper bound of the wait before redelivery `attempt`: `base * 2^(attempt-1)`,
    /// capped at `backoff_max`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.backoff_base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }

    /// Actual wait: [`RetryPolicy::delay_for`], or a uniform draw below it
    /// when jitter is on so retries from a failed batch spread out.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let cap = self.delay_for(attempt);
        if !self.jitter || cap.is_zero() {
            return cap;
        }
        cap.mul_f64(rand::thread_rng().gen_range(0.0..=1.0)).min(cap)
    }
}
