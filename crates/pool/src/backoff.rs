//! Exponential backoff for retry pacing.
//!
//! Every acquire request owns a [`Backoff`], so each request retries on its
//! own series. The pool keeps one more for replenishment.

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// BackoffConfig
// ---------------------------------------------------------------------------

/// Parameters of an exponential backoff series.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BackoffConfig {
    /// Delay returned by the first call to [`Backoff::next`] (default: 100ms).
    pub initial: Duration,
    /// Multiplier per attempt (default: 2.0).
    pub factor: f64,
    /// Upper bound for any single delay (default: 1s).
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_secs(1),
        }
    }
}

impl BackoffConfig {
    /// Delay for a zero-based attempt number.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_secs = self.initial.as_secs_f64() * self.factor.powi(exponent);
        let capped = delay_secs.min(self.max.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max)
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Stateful exponential delay generator.
///
/// `next()` yields `min(max, initial * factor^attempts)` and then counts the
/// attempt. It never looks at the clock.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
}

impl Backoff {
    /// Start a fresh series.
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Next delay in the series.
    pub fn next(&mut self) -> Duration {
        let delay = self.config.delay_for(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Number of delays handed out so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Restart the series from `initial`.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
