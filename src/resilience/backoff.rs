//! Exponential backoff with jitter.
//!
//! Paces polling loops (waiting for an organ to become healthy). Never used to
//! re-dispatch a failed call.

use std::time::Duration;

use rand::Rng;

/// Doubling delay sequence capped at `max`, with up to 10% jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    /// Delay before the next poll.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(16));
        self.attempt = self.attempt.saturating_add(1);

        let capped = self.base.saturating_mul(factor).min(self.max);
        let jitter_ms = (capped.as_millis() / 10) as u64;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..jitter_ms)
        } else {
            0
        };
        capped + Duration::from_millis(jitter)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
