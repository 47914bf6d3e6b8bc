//! Exponential retry delays for the connection kernel.
//!
//! Delays follow `initial * multiplier^(n-1)`, capped at `max_delay`. An
//! optional attempt limit bounds how long the kernel keeps trying; without
//! one it waits `max_delay` between attempts indefinitely once the cap is hit.
//!
//! ```text
//! initial = 5s, multiplier = 2.0, max = 60s
//! attempt 1: 5s   attempt 2: 10s   attempt 3: 20s   attempt 4: 40s   attempt 5+: 60s
//! ```

use std::time::Duration;

use thiserror::Error;

/// Raised when the retry budget is spent.
#[derive(Debug, Error)]
pub enum BackoffError {
    #[error("Maximum number of attempts exceeded: {0}")]
    MaxAttemptLimitError(u32),
}

/// Retry delay generator.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    attempt: u32,
    /// `None` means unlimited.
    max_attempts: Option<u32>,
}

impl Backoff {
    /// Creates an unlimited backoff schedule.
    ///
    /// A multiplier below 1.0 is treated as 1.0 (constant delay).
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let max = max.max(initial);
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max,
            multiplier: multiplier.max(1.0),
            attempt: 0,
            max_attempts: None,
        }
    }

    /// Builds a schedule from the `[transport]` reconnect settings.
    ///
    /// `max_attempts == 0` leaves the schedule unlimited.
    pub fn from_policy(initial_secs: u64, max_secs: u64, multiplier: f64, max_attempts: u32) -> Self {
        let mut backoff = Self::new(
            Duration::from_secs(initial_secs),
            Duration::from_secs(max_secs),
            multiplier,
        );
        if max_attempts > 0 {
            backoff.max_attempts = Some(max_attempts);
        }
        backoff
    }

    /// Caps the number of retries. `0` fails on the first call to [`next_sleep`](Self::next_sleep).
    pub fn set_max_attempts(&mut self, max: u32) {
        self.max_attempts = Some(max);
    }

    /// Starts the schedule over; called after a successful CONNACK.
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    /// Returns the delay to wait before the next attempt and advances the schedule.
    pub fn next_sleep(&mut self) -> Result<Duration, BackoffError> {
        if let Some(limit) = self.max_attempts {
            if self.attempt >= limit {
                return Err(BackoffError::MaxAttemptLimitError(limit));
            }
        }
        self.attempt += 1;

        let sleep = self.current_delay;
        let grown = self.current_delay.as_secs_f64() * self.multiplier;
        self.current_delay = Duration::from_secs_f64(grown).min(self.max_delay);
        Ok(sleep)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }
}

impl Default for Backoff {
    /// 1s initial delay, 60s cap, 10% growth, unlimited attempts.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 1.1)
    }
}
