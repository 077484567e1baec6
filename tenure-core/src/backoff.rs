//! Exponential retry schedule for repeated lock acquisition attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Computes wait intervals between lock attempts, bounded by an attempt count.
///
/// One instance drives one acquisition flow at a time; `start` begins a
/// fresh cycle.
pub trait Backoff {
    /// Reset the attempt counter to zero.
    fn start(&mut self);

    /// Interval to wait before the next attempt, or `None` once the
    /// configured number of retries is used up.
    fn next(&mut self) -> Option<Duration>;

    /// Retries handed out since the last `start`.
    fn attempts(&self) -> u32;

    fn max_attempts(&self) -> u32;
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackoffError {
    #[error("initial interval must be greater than zero")]
    ZeroInterval,
    #[error("multiplier must be a positive finite number, got {0}")]
    InvalidMultiplier(f64),
}

/// `initial_interval * multiplier^n` for the n-th retry.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    current_attempt: u32,
    max_attempts: u32,
    initial_interval: Duration,
    multiplier: f64,
}

impl ExponentialBackoff {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_MULTIPLIER: f64 = 1.5;

    pub fn new(
        max_attempts: u32,
        initial_interval: Duration,
        multiplier: f64,
    ) -> Result<Self, BackoffError> {
        if initial_interval.is_zero() {
            return Err(BackoffError::ZeroInterval);
        }
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(BackoffError::InvalidMultiplier(multiplier));
        }
        Ok(Self {
            current_attempt: 0,
            max_attempts,
            initial_interval,
            multiplier,
        })
    }

    /// A schedule with no retries: the first failed attempt is final.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    pub fn initial_interval(&self) -> Duration {
        self.initial_interval
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Sum of every interval the schedule hands out, saturating at
    /// `Duration::MAX`. Walks each retry, so bound `max_attempts` first.
    pub fn total_wait(&self) -> Duration {
        let mut total = Duration::ZERO;
        for attempt in 0..self.max_attempts {
            total = total.saturating_add(self.interval_for(attempt));
            if total == Duration::MAX {
                break;
            }
        }
        total
    }

    fn interval_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        Duration::try_from_secs_f64(self.initial_interval.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for ExponentialBackoff {
    /// Three retries starting at one second, growing by 1.5x.
    fn default() -> Self {
        Self {
            current_attempt: 0,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            initial_interval: Self::DEFAULT_INITIAL_INTERVAL,
            multiplier: Self::DEFAULT_MULTIPLIER,
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn start(&mut self) {
        self.current_attempt = 0;
    }

    fn next(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.max_attempts {
            return None;
        }
        let interval = self.interval_for(self.current_attempt);
        self.current_attempt += 1;
        Some(interval)
    }

    fn attempts(&self) -> u32 {
        self.current_attempt
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Serializable form of an [`ExponentialBackoff`], as accepted on the
/// command line and in HTTP requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub max_attempts: u32,
    pub initial_interval_ms: u64,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: ExponentialBackoff::DEFAULT_MAX_ATTEMPTS,
            initial_interval_ms: ExponentialBackoff::DEFAULT_INITIAL_INTERVAL.as_millis() as u64,
            multiplier: ExponentialBackoff::DEFAULT_MULTIPLIER,
        }
    }
}

impl TryFrom<&BackoffConfig> for ExponentialBackoff {
    type Error = BackoffError;

    fn try_from(config: &BackoffConfig) -> Result<Self, Self::Error> {
        ExponentialBackoff::new(
            config.max_attempts,
            Duration::from_millis(config.initial_interval_ms),
            config.multiplier,
        )
    }
}
