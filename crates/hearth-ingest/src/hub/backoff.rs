//! Jittered exponential backoff for reconnection attempts.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff state: base delay, doubling per attempt, capped
/// maximum, plus up to 10% random jitter so a fleet of clients does not
/// reconnect in lockstep.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// The delay to wait before the next attempt. Advances the attempt
    /// counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self
            .base
            .saturating_mul(1u32.checked_shl(self.attempt).unwrap_or(u32::MAX))
            .min(self.max);
        self.attempt = self.attempt.saturating_add(1);

        let jitter_ms = exp.as_millis() as u64 / 10;
        if jitter_ms == 0 {
            return exp;
        }
        exp + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    /// Reset after a successful connection so the next failure starts from
    /// the base delay again.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
