//! Inter-request pacing for page navigation.
//!
//! Sites that defend against automation tend to flag bursts of navigations,
//! so the crawler pauses for a fixed delay before each navigation and again
//! before reading the rendered page.

use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Fixed-delay throttle. A zero delay disables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestThrottle {
    delay: Duration,
}

impl RequestThrottle {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Negative, NaN and infinite values disable throttling.
    pub fn from_secs_f64(secs: f64) -> Self {
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO);
        Self { delay }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_enabled(&self) -> bool {
        !self.delay.is_zero()
    }

    pub async fn wait(&self) {
        if !self.is_enabled() {
            return;
        }
        debug!("Applying rate limit delay: {:?}", self.delay);
        sleep(self.delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_from_secs() {
        assert_eq!(RequestThrottle::from_secs_f64(2.0).delay(), Duration::from_secs(2));
        assert_eq!(RequestThrottle::from_secs_f64(0.25).delay(), Duration::from_millis(250));
        assert!(!RequestThrottle::from_secs_f64(-1.0).is_enabled());
        assert!(!RequestThrottle::from_secs_f64(f64::NAN).is_enabled());
        assert!(!RequestThrottle::disabled().is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_sleeps_for_delay() {
        let throttle = RequestThrottle::new(Duration::from_secs(2));
        let start = Instant::now();
        throttle.wait().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_does_not_sleep() {
        let start = Instant::now();
        RequestThrottle::disabled().wait().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
