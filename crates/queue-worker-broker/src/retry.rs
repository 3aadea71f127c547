//! Retry logic with randomized exponential backoff.

use queue_worker_core::Result;
use rand::Rng;
use std::time::Duration;
use tracing::warn;

/// Retry policy for broker writes.
///
/// Attempt `n` (1-indexed) that fails is followed by a wait drawn uniformly
/// from `[0, min(max_delay, multiplier * 2^(n-1))]`. After `max_attempts`
/// failures the last error is returned.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub multiplier: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            multiplier: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, multiplier: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            multiplier,
            max_delay,
        }
    }

    /// Upper bound of the wait after failed attempt `attempt` (1-indexed).
    pub fn delay_ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31); // Prevent overflow
        self.multiplier
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Randomized wait after failed attempt `attempt`.
    pub fn delay_for<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let ceiling = self.delay_ceiling(attempt).as_secs_f64();
        if ceiling <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(rng.gen_range(0.0..=ceiling))
    }

    /// Run `op` until it succeeds or the attempts are exhausted, sleeping
    /// between attempts.
    pub fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        self.run_with_sleep(op, std::thread::sleep)
    }

    pub fn run_with_sleep<T, F, S>(&self, mut op: F, mut sleep: S) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
        S: FnMut(Duration),
    {
        let mut rng = rand::thread_rng();
        let mut attempt = 1;

        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    let delay = self.delay_for(attempt, &mut rng);
                    warn!(attempt, error = %e, "operation failed, retrying in {:.2}s", delay.as_secs_f64());
                    sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_worker_core::QueueError;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.multiplier, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_ceiling_growth() {
        let policy = RetryPolicy::default();
        let ceilings: Vec<u128> = (1..=5).map(|i| policy.delay_ceiling(i).as_millis()).collect();
        // 0.5s, 1s, 2s, 4s, 8s
        assert_eq!(ceilings, vec![500, 1000, 2000, 4000, 8000]);
    }

    #[test]
    fn test_ceiling_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_ceiling(9), Duration::from_secs(60));
        assert_eq!(policy.delay_ceiling(100), Duration::from_secs(60));
    }

    #[test]
    fn test_delay_within_ceiling() {
        let policy = RetryPolicy::default();
        let mut rng = rand::thread_rng();
        for attempt in 1..=12 {
            for _ in 0..50 {
                assert!(policy.delay_for(attempt, &mut rng) <= policy.delay_ceiling(attempt));
            }
        }
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let mut sleeps = Vec::new();

        let result: Result<()> = policy.run_with_sleep(
            |_| {
                calls += 1;
                Err(QueueError::ConnectionLost("down".to_string()))
            },
            |d| sleeps.push(d),
        );

        assert!(matches!(result, Err(QueueError::ConnectionLost(_))));
        assert_eq!(calls, 10);
        assert_eq!(sleeps.len(), 9);
    }

    #[test]
    fn test_recovers_after_transient_failures() {
        let policy = RetryPolicy::default();
        let mut sleeps = 0;

        let result = policy.run_with_sleep(
            |attempt| {
                if attempt < 3 {
                    Err(QueueError::ConnectionLost("flaky".to_string()))
                } else {
                    Ok(attempt)
                }
            },
            |_| sleeps += 1,
        );

        assert_eq!(result.unwrap(), 3);
        assert_eq!(sleeps, 2);
    }
}
