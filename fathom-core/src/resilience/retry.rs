//! Exponential backoff schedule for retried operations.

use std::time::Duration;

use fathom_config::RetryConfig;

/// Pure delay calculator; the resilient wrapper owns the actual loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        RetryPolicy { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    pub fn max_total_delay(&self) -> Duration {
        self.config.max_total_delay()
    }

    /// Delay to sleep after a failed attempt, 0-based: `delay_for(0)` is the
    /// pause before the second try. Doubles per attempt, capped, plus up to
    /// `jitter_ratio` of random spread so a crowd of callers does not
    /// reconverge on a recovering backend in lockstep.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let raw = self.config.backoff_base_ms.saturating_mul(multiplier);
        let capped = raw.min(self.config.backoff_max_ms);
        let jitter = (capped as f64
            * self.config.jitter_ratio.max(0.0)
            * rand::random::<f64>()) as u64;
        Duration::from_millis(capped.saturating_add(jitter))
    }
}
