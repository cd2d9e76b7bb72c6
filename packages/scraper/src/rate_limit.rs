//! Minimum-interval request throttling.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum interval between consecutive requests.
///
/// A call to [`RateLimiter::wait`] that happens sooner than the interval
/// after the previous one sleeps for the remainder. Limits are per
/// instance; separate instances do not coordinate.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter allowing at most `requests_per_second` requests.
    ///
    /// A non-positive or non-finite rate, or one whose interval does not
    /// fit a [`Duration`], disables throttling.
    #[must_use]
    pub fn new(requests_per_second: f64) -> Self {
        let interval = if requests_per_second > 0.0 {
            Duration::try_from_secs_f64(requests_per_second.recip()).unwrap_or_else(|e| {
                log::warn!("ignoring rate of {requests_per_second} requests per second: {e}");
                Duration::ZERO
            })
        } else {
            Duration::ZERO
        };

        Self {
            interval,
            last_request: Mutex::new(None),
        }
    }

    /// The minimum interval between two requests.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits until the next request may be sent and records it.
    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.interval {
                let remaining = self.interval - elapsed;
                log::trace!("throttling request for {remaining:?}");
                tokio::time::sleep(remaining).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn spaces_out_requests() {
        let limiter = RateLimiter::new(2.0);
        let start = Instant::now();

        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_millis(10));

        limiter.wait().await;
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_sleep_after_idle_period() {
        let limiter = RateLimiter::new(2.0);
        limiter.wait().await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let start = Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[test]
    fn zero_rate_disables_throttling() {
        assert_eq!(RateLimiter::new(0.0).interval(), Duration::ZERO);
        assert_eq!(RateLimiter::new(4.0).interval(), Duration::from_millis(250));
    }

    #[test]
    fn unrepresentable_rates_disable_throttling() {
        for rate in [f64::MIN_POSITIVE, 1e-300, f64::NAN, f64::INFINITY, -1.0] {
            assert_eq!(RateLimiter::new(rate).interval(), Duration::ZERO, "{rate}");
        }
    }
}
