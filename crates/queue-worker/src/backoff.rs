//! Caller-side backoff state for the polling iterator.

use crate::config::PollConfig;
use std::time::Duration;

/// Result of probing the remote queue size after finding no local message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The queue reported zero messages.
    Empty,
    /// Messages remain (possibly in flight elsewhere).
    Remaining(u64),
    /// The size query failed.
    Unavailable,
}

/// Backoff delay plus consecutive-failure counter.
///
/// The delay doubles after every idle round up to the ceiling and drops back
/// to the initial value on delivery. The counter grows on empty or failed
/// observations only, and the budget is spent once it exceeds `max_retries`.
#[derive(Debug, Clone)]
pub struct PollCursor {
    init: Duration,
    max: Duration,
    max_retries: Option<u32>,
    delay: Duration,
    failures: u32,
}

impl PollCursor {
    pub fn new(init: Duration, max: Duration, max_retries: Option<u32>) -> Self {
        let init = init.min(max);
        PollCursor {
            init,
            max,
            max_retries,
            delay: init,
            failures: 0,
        }
    }

    pub fn from_config(config: &PollConfig) -> Self {
        Self::new(
            config.init_waiting_period,
            config.max_waiting_period,
            config.max_num_retries,
        )
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn record_delivery(&mut self) {
        self.delay = self.init;
        self.failures = 0;
    }

    /// Record an observation; returns `false` once the retry budget is spent.
    pub fn observe(&mut self, observation: Observation) -> bool {
        match observation {
            Observation::Empty | Observation::Unavailable => {
                self.failures = self.failures.saturating_add(1);
            }
            Observation::Remaining(_) => {}
        }
        !self.exhausted()
    }

    pub fn exhausted(&self) -> bool {
        matches!(self.max_retries, Some(max) if self.failures > max)
    }

    /// Delay to sleep now; the following one is doubled, capped at the maximum.
    pub fn advance(&mut self) -> Duration {
        let current = self.delay;
        self.delay = self.delay.saturating_mul(2).min(self.max);
        current
    }
}
