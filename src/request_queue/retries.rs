use std::time::Duration;

/// A retry delay strategy driven by exponential back-off.
///
/// Starts at a base delay, doubles on every consecutive failure, and never
/// exceeds the configured maximum. [`Backoff::reset`] returns the strategy to
/// its base delay once a request finally gets through.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    base: Duration,
    max_delay: Duration,
}

impl Backoff {
    pub const fn new(base: Duration, max_delay: Duration) -> Self {
        Self {
            current: base,
            base,
            max_delay,
        }
    }

    /// Returns the next delay and advances the strategy.
    pub fn advance(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max_delay);
        delay
    }

    /// Returns the strategy to its base delay.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}
