//! Reconnect backoff.

use std::time::Duration;

/// Exponential backoff between reconnect attempts.
///
/// Attempt `n` (starting at 1) waits `base * 2^(n-1)`, capped at `max`, with
/// up to `jitter` of that delay added or subtracted.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first reconnect attempt.
    pub base: Duration,

    /// Maximum delay.
    pub max: Duration,

    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let delay = self.base.as_millis() as f64 * 2.0_f64.powi(exponent);
        let delay = delay.min(self.max.as_millis() as f64);

        let jitter_range = delay * self.jitter.clamp(0.0, 1.0);
        let final_delay = (delay + rand_jitter(jitter_range)).max(0.0);

        Duration::from_millis(final_delay as u64)
    }
}

/// Jitter in `[-range, range]` from a clock-seeded LCG.
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;

    if range == 0.0 {
        return 0.0;
    }

    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = (seed.wrapping_mul(6364136223846793005).wrapping_add(1)) as f64;
    let normalized = (random / u64::MAX as f64) * 2.0 - 1.0;
    normalized * range
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_without_jitter() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_secs(30),
            jitter: 0.0,
        };

        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_max() {
        let policy = BackoffPolicy {
            base: Duration::from_secs(1),
            max: Duration::from_secs(5),
            jitter: 0.0,
        };

        assert_eq!(policy.delay(10), Duration::from_secs(5));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_jitter_stays_in_range() {
        let policy = BackoffPolicy::default();

        for attempt in 1..6 {
            let nominal = 100.0 * 2.0_f64.powi(attempt as i32 - 1);
            let delay = policy.delay(attempt).as_millis() as f64;
            assert!(delay >= nominal * 0.75 - 1.0);
            assert!(delay <= nominal * 1.25 + 1.0);
        }
    }
}
