//! Exponential backoff with jitter.

use std::time::Duration;

use crate::config::RetryConfig;

/// Delay schedule between retry attempts.
///
/// The delay for attempt `n` (0-based) is `base * factor^n`, capped at
/// `max`, with optional +/- 50% random jitter to spread synchronized
/// retries apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub factor: f64,
    pub max: Duration,
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(2_000),
            factor: 2.0,
            max: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl Backoff {
    pub fn from_retry(config: RetryConfig) -> Self {
        Self {
            base: config.base_delay,
            ..Self::default()
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let scale = self.factor.powi(attempt as i32);
        let seconds = self.base.as_secs_f64() * scale;
        let capped = seconds.min(self.max.as_secs_f64());
        let mut delay = Duration::from_secs_f64(capped);

        if self.jitter {
            let jitter_ms = (delay.as_millis() as f64 * 0.5) as u64;
            let offset = fastrand::u64(0..=(jitter_ms * 2));
            let total_ms = delay.as_millis() as i64 + (offset as i64 - jitter_ms as i64);
            delay = Duration::from_millis(total_ms.max(0) as u64);
        }

        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(base_ms: u64, max_ms: u64) -> Backoff {
        Backoff {
            base: Duration::from_millis(base_ms),
            factor: 2.0,
            max: Duration::from_millis(max_ms),
            jitter: false,
        }
    }

    #[test]
    fn doubles_per_attempt_until_capped() {
        let backoff = plain(100, 1_000);
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(4), Duration::from_secs(1));
        assert_eq!(backoff.delay(10), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_half_band() {
        let backoff = Backoff {
            jitter: true,
            ..plain(100, 1_000)
        };
        for _ in 0..20 {
            for attempt in 0..5 {
                let expected = (100.0 * 2_f64.powi(attempt)).min(1_000.0);
                let delay_ms = backoff.delay(attempt as u32).as_millis() as f64;
                assert!(delay_ms >= expected * 0.49, "attempt {attempt}: {delay_ms}");
                assert!(delay_ms <= expected * 1.51, "attempt {attempt}: {delay_ms}");
            }
        }
    }

    #[test]
    fn from_retry_uses_configured_base_delay() {
        let backoff = Backoff::from_retry(RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
        });
        assert_eq!(backoff.base, Duration::from_millis(10));
    }
}
