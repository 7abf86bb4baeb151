//! Reconnect backoff policy
//!
//! Pure exponential backoff with jitter: `base = min(initial * 2^attempt, max)`,
//! then `delay = base * (1 + uniform(-jitter, +jitter))`, floored at zero.
//! Jitter spreads reconnect attempts so that a broadcast-wide disconnect does
//! not turn into a synchronized retry storm across every viewer.

use rand::Rng;
use std::time::Duration;

use crate::config::ChannelConfig;

/// Cap on the exponent so `2^attempt` cannot overflow; with a 1s initial
/// delay this is already far beyond any realistic `max`.
const MAX_EXPONENT: u32 = 20;

/// Jittered exponential backoff scheduler.
///
/// `next` increments the attempt count by exactly one per call; `reset`
/// restores the initial delay regardless of how many attempts came before.
/// No I/O and no failure modes.
#[derive(Debug, Clone)]
pub struct BackoffScheduler {
    attempt: u32,
    initial: Duration,
    max: Duration,
    jitter_pct: f64,
}

impl BackoffScheduler {
    #[must_use]
    pub const fn new(initial: Duration, max: Duration, jitter_pct: f64) -> Self {
        Self {
            attempt: 0,
            initial,
            max,
            jitter_pct,
        }
    }

    #[must_use]
    pub const fn from_config(config: &ChannelConfig) -> Self {
        Self::new(
            config.initial_backoff(),
            config.max_backoff(),
            config.jitter_pct,
        )
    }

    /// Next delay to wait before reconnecting. Advances the attempt count.
    pub fn next(&mut self) -> Duration {
        let base = self.base_delay();
        self.attempt = self.attempt.saturating_add(1);
        self.jittered(base)
    }

    /// Restore the initial delay; called on every successful open.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of consecutive failures since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Capped exponential base for the current attempt, before jitter.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        let initial_ms = self.initial.as_millis() as u64;
        let factor = 1u64 << self.attempt.min(MAX_EXPONENT);
        let base_ms = initial_ms
            .saturating_mul(factor)
            .min(self.max.as_millis() as u64);
        Duration::from_millis(base_ms)
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.jitter_pct <= 0.0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(-self.jitter_pct..=self.jitter_pct);
        let delay_ms = (base.as_millis() as f64 * (1.0 + jitter)).max(0.0);
        Duration::from_millis(delay_ms as u64)
    }
}
