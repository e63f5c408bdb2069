use std::time::Duration;

use rand::Rng;

/// Exponential backoff policy with bounded jitter.
///
/// The executor uses one policy for throttling and a shorter one for server
/// errors; all other failures fail fast and never reach a policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_attempts: u32,
    /// Initial backoff duration in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds.
    pub max_backoff_ms: u64,
    /// Multiplier applied to backoff after each retry.
    pub backoff_multiplier: f64,
    /// Jitter fraction applied to each computed backoff (0.25 = +/-25%).
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_backoff_ms: u64,
        max_backoff_ms: u64,
        backoff_multiplier: f64,
        jitter: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms,
            max_backoff_ms,
            backoff_multiplier,
            jitter,
        }
    }

    /// Policy for ProvisionedThroughputExceeded: 50ms base, doubling, 5s cap,
    /// up to 10 attempts.
    pub fn throttle() -> Self {
        Self::new(10, 50, 5_000, 2.0, 0.25)
    }

    /// Policy for 5xx responses: same curve, 5 attempts.
    pub fn server_error() -> Self {
        Self::new(5, 50, 5_000, 2.0, 0.25)
    }

    /// Returns a policy with no retries.
    pub fn no_retry() -> Self {
        Self::new(0, 0, 0, 1.0, 0.0)
    }

    /// Backoff before the given retry attempt (0-indexed), without jitter.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let backoff_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(attempt as i32))
        .min(self.max_backoff_ms as f64) as u64;
        Duration::from_millis(backoff_ms)
    }

    /// Jittered backoff before the given retry attempt (0-indexed).
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt).as_millis() as f64;
        if self.jitter <= 0.0 || base == 0.0 {
            return Duration::from_millis(base as u64);
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        Duration::from_millis((base * factor).max(0.0) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::throttle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_preset() {
        let policy = RetryPolicy::throttle();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.initial_backoff_ms, 50);
        assert_eq!(policy.max_backoff_ms, 5_000);
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_server_error_preset() {
        let policy = RetryPolicy::server_error();
        assert_eq!(policy.max_attempts, 5);
    }

    #[test]
    fn test_base_backoff_exponential() {
        let policy = RetryPolicy::throttle();
        assert_eq!(policy.base_backoff(0).as_millis(), 50);
        assert_eq!(policy.base_backoff(1).as_millis(), 100);
        assert_eq!(policy.base_backoff(2).as_millis(), 200);
        assert_eq!(policy.base_backoff(6).as_millis(), 3_200);
        // Capped at 5s
        assert_eq!(policy.base_backoff(7).as_millis(), 5_000);
        assert_eq!(policy.base_backoff(9).as_millis(), 5_000);
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::throttle();
        for attempt in 0..8 {
            let base = policy.base_backoff(attempt).as_millis() as f64;
            for _ in 0..32 {
                let jittered = policy.backoff_duration(attempt).as_millis() as f64;
                assert!(jittered >= base * 0.75 - 1.0);
                assert!(jittered <= base * 1.25 + 1.0);
            }
        }
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts, 0);
        assert_eq!(policy.backoff_duration(0), Duration::from_millis(0));
    }
}
