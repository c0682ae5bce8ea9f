//! Exponential restart backoff with jitter.
//!
//! Attempt `n` waits `min(base * 2^n + jitter, max)`; jitter is below `base`
//! and decorrelates vendors that failed at the same moment.

use std::time::Duration;

use crate::config::SupervisorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(
            Duration::from_secs(config.backoff_base_secs),
            Duration::from_secs(config.backoff_max_secs),
        )
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Delay before restart attempt `attempt` (0-indexed), jittered.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        Duration::from_millis(compute_delay(
            attempt,
            base_ms,
            self.max.as_millis() as u64,
            jitter_ms(base_ms),
        ))
    }
}

/// Deterministic part of the delay, in milliseconds.
pub fn compute_delay(attempt: u32, base_ms: u64, max_ms: u64, jitter_ms: u64) -> u64 {
    let exponential = base_ms.saturating_mul(1u64 << attempt.min(16));
    exponential.saturating_add(jitter_ms).min(max_ms)
}

// Nanosecond component of the clock is enough to spread retries apart.
fn jitter_ms(base_ms: u64) -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 % base_ms.max(1))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_delay_doubles() {
        assert_eq!(compute_delay(0, 10_000, 300_000, 0), 10_000);
        assert_eq!(compute_delay(1, 10_000, 300_000, 0), 20_000);
        assert_eq!(compute_delay(4, 10_000, 300_000, 0), 160_000);
    }

    #[test]
    fn test_compute_delay_capped() {
        assert_eq!(compute_delay(5, 10_000, 300_000, 0), 300_000);
        assert_eq!(compute_delay(60, 10_000, 300_000, 9_999), 300_000);
    }

    #[test]
    fn test_compute_delay_adds_jitter() {
        assert_eq!(compute_delay(0, 10_000, 300_000, 1_234), 11_234);
    }

    #[test]
    fn test_delay_within_bounds() {
        let backoff = Backoff::from_config(&SupervisorConfig::default());
        for attempt in 0..12 {
            let d = backoff.delay(attempt);
            assert!(d >= Duration::from_secs(10).min(backoff.max()));
            assert!(d <= Duration::from_secs(300));
        }
    }

    #[test]
    fn test_max_never_below_base() {
        let b = Backoff::new(Duration::from_secs(30), Duration::from_secs(5));
        assert_eq!(b.max(), Duration::from_secs(30));
    }
}
