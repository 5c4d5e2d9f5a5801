//! Interval-based request gate

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces granted acquisitions at least `1 / requests_per_second` apart
///
/// There is no burst allowance. Callers queue on a fair mutex, so concurrent
/// workers are served in arrival order and the sleep happens while holding the
/// lock.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_granted: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// A non-positive or non-finite rate disables the gate
    pub fn new(requests_per_second: f64) -> Self {
        let min_interval = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };

        Self {
            min_interval,
            last_granted: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the next request may be issued
    pub async fn acquire(&self) {
        let mut last = self.last_granted.lock().await;

        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }

        *last = Some(Instant::now());
    }
}
