// ── Per-key rate limiter ──
//
// Minimum-interval gate keyed by an arbitrary string. Holds no domain
// knowledge: the dispatcher keys it by installation, anything else that
// needs per-key throttling can share the type.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::clock::Clock;
use crate::error::CoreError;

pub struct RateLimiter {
    interval: Duration,
    clock: Arc<dyn Clock>,
    last_execution: DashMap<String, Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            interval,
            clock,
            last_execution: DashMap::new(),
        }
    }

    /// Build from a signed millisecond value, as found in config files.
    /// Negative intervals are rejected.
    pub fn try_from_millis(interval_ms: i64, clock: Arc<dyn Clock>) -> Result<Self, CoreError> {
        let millis = u64::try_from(interval_ms).map_err(|_| CoreError::Config {
            message: format!("rate limit interval must not be negative (got {interval_ms}ms)"),
        })?;
        Ok(Self::new(Duration::from_millis(millis), clock))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// `true` if `key` never executed or its interval has elapsed.
    pub fn can_execute(&self, key: &str) -> bool {
        self.time_until_next_execution(key).is_zero()
    }

    /// Stamp the current time as `key`'s last execution.
    pub fn record_execution(&self, key: &str) {
        self.last_execution.insert(key.to_owned(), self.clock.now());
    }

    /// Remaining wait before `key` may execute; zero if it may now.
    pub fn time_until_next_execution(&self, key: &str) -> Duration {
        let Some(last) = self.last_execution.get(key).map(|entry| *entry) else {
            return Duration::ZERO;
        };
        let elapsed = self.clock.now().saturating_duration_since(last);
        self.interval.saturating_sub(elapsed)
    }

    /// Forget one key, or every key with `None`.
    pub fn clear(&self, key: Option<&str>) {
        match key {
            Some(key) => {
                self.last_execution.remove(key);
            }
            None => self.last_execution.clear(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(ms: u64) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::new(Duration::from_millis(ms), clock.clone());
        (clock, limiter)
    }

    #[test]
    fn unknown_key_can_execute() {
        let (_, limiter) = limiter(1000);
        assert!(limiter.can_execute("inst-1"));
        assert_eq!(limiter.time_until_next_execution("inst-1"), Duration::ZERO);
    }

    #[test]
    fn blocked_right_after_execution_then_released() {
        let (clock, limiter) = limiter(1000);
        limiter.record_execution("inst-1");
        assert!(!limiter.can_execute("inst-1"));
        assert_eq!(
            limiter.time_until_next_execution("inst-1"),
            Duration::from_millis(1000)
        );

        clock.advance(Duration::from_millis(400));
        assert_eq!(
            limiter.time_until_next_execution("inst-1"),
            Duration::from_millis(600)
        );

        clock.advance(Duration::from_millis(600));
        assert!(limiter.can_execute("inst-1"));
    }

    #[test]
    fn keys_are_independent() {
        let (_, limiter) = limiter(1000);
        limiter.record_execution("inst-1");
        assert!(limiter.can_execute("inst-2"));
    }

    #[test]
    fn zero_interval_never_blocks() {
        let (_, limiter) = limiter(0);
        limiter.record_execution("k");
        assert!(limiter.can_execute("k"));
    }

    #[test]
    fn clear_one_and_all() {
        let (_, limiter) = limiter(1000);
        limiter.record_execution("a");
        limiter.record_execution("b");

        limiter.clear(Some("a"));
        assert!(limiter.can_execute("a"));
        assert!(!limiter.can_execute("b"));

        limiter.clear(None);
        assert!(limiter.can_execute("b"));
    }

    #[test]
    fn negative_interval_is_rejected() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        assert!(matches!(
            RateLimiter::try_from_millis(-1, Arc::clone(&clock)),
            Err(CoreError::Config { .. })
        ));
        assert_eq!(
            RateLimiter::try_from_millis(250, clock).unwrap().interval(),
            Duration::from_millis(250)
        );
    }
}
