//! Per-stage rate limiting

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::{BrickflowError, Result};

/// Enforces a minimum interval of `1 / rate` between successive completions
/// of [`acquire`](RateLimiter::acquire).
///
/// The timestamp of the last release is recorded *after* the sleep, not
/// before, so scheduler jitter cannot compress the spacing between two
/// emissions below the configured interval.
pub struct RateLimiter {
    min_interval: Duration,
    last_release: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(rate: f64) -> Result<Self> {
        if rate <= 0.0 {
            return Err(BrickflowError::InvalidRate(rate));
        }
        Ok(Self {
            min_interval: Duration::from_secs_f64(1.0 / rate),
            last_release: Mutex::new(None),
        })
    }

    /// Waits if necessary to maintain the desired rate.
    ///
    /// The internal lock is held across the sleep, so concurrent callers are
    /// released one at a time with the guaranteed spacing.
    pub async fn acquire(&self) {
        let mut last = self.last_release.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_positive_rate() {
        assert!(RateLimiter::new(0.0).is_err());
        assert!(RateLimiter::new(-1.0).is_err());
        assert!(RateLimiter::new(10.0).is_ok());
    }

    #[tokio::test]
    async fn test_spacing_lower_bound() {
        // 5 acquisitions at 50/s must take at least (5 - 1) / 50 = 80ms
        let limiter = RateLimiter::new(50.0).unwrap();

        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        let elapsed = start.elapsed();

        assert!(
            elapsed >= Duration::from_millis(80),
            "5 acquisitions finished in {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_first_acquire_is_immediate() {
        let limiter = RateLimiter::new(1.0).unwrap();

        let start = Instant::now();
        limiter.acquire().await;

        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
