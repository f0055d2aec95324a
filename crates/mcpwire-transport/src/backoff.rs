//! Reconnection and retry delays.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with optional jitter.
///
/// Used by the WebSocket reconnect loop and the retry middleware.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth per attempt.
    pub multiplier: f64,
    /// Fractional jitter in `0.0..=1.0`; `0.25` spreads delays by ±25%.
    /// Only set through [`with_jitter`](Self::with_jitter).
    jitter: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl ExponentialBackoff {
    /// Create a backoff without jitter.
    #[must_use]
    pub const fn new(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter: 0.0,
        }
    }

    /// Set the jitter fraction, clamped to `0.0..=1.0`. NaN disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_nan() { 0.0 } else { jitter.clamp(0.0, 1.0) };
        self
    }

    /// The jitter fraction.
    #[must_use]
    pub const fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Deterministic delay for a zero-based attempt, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        grow(self.initial_delay, self.max_delay, self.multiplier, attempt)
    }

    /// [`delay_for_attempt`](Self::delay_for_attempt) spread by the jitter
    /// fraction, still capped at `max_delay`.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        base.mul_f64(factor).min(self.max_delay)
    }
}

/// Timing for SSE stream reconnection on the HTTP transport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectionOptions {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth per attempt.
    pub growth_factor: f64,
    /// Consecutive failures tolerated before giving up. Zero means unlimited.
    pub max_retries: u32,
}

impl Default for ReconnectionOptions {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            growth_factor: 1.5,
            max_retries: 2,
        }
    }
}

impl ReconnectionOptions {
    /// Set the initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the retry budget. Zero means unlimited.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// `min(max_delay, initial_delay * growth_factor^attempt)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        grow(self.initial_delay, self.max_delay, self.growth_factor, attempt)
    }

    /// Whether `attempt` consecutive failures use up the budget.
    #[must_use]
    pub const fn is_exhausted(&self, attempt: u32) -> bool {
        self.max_retries != 0 && attempt >= self.max_retries
    }
}

fn grow(initial: Duration, max: Duration, factor: f64, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = initial.as_secs_f64() * factor.powi(exponent);
    if !secs.is_finite() || secs >= max.as_secs_f64() {
        return max;
    }
    Duration::from_secs_f64(secs.max(0.0))
}
