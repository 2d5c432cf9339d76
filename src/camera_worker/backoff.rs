//! Exponential backoff for failed poll cycles

use std::time::Duration;

/// First delay after a failure
pub const BACKOFF_SEED: Duration = Duration::from_secs(1);
/// Upper bound on the delay
pub const BACKOFF_CAP: Duration = Duration::from_secs(15);

/// Doubling delay, clamped to a cap, reset on success
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    seed: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(seed: Duration, cap: Duration) -> Self {
        Self {
            seed,
            cap,
            current: seed,
        }
    }

    /// Delay to sleep now; the following call returns double, up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.cap);
        delay
    }

    /// Back to the seed delay. Returns whether the delay had grown.
    pub fn reset(&mut self) -> bool {
        let grown = self.current != self.seed;
        self.current = self.seed;
        grown
    }

    /// Delay the next failure will sleep
    pub fn current(&self) -> Duration {
        self.current
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BACKOFF_SEED, BACKOFF_CAP)
    }
}
