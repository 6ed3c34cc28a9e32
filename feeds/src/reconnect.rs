//! Reconnect backoff schedule
//!
//! The wait ramps linearly with the attempt number and flattens at a
//! ceiling; there is no terminal state, a connector retries forever.

use std::time::Duration;

/// Ceiling for the reconnect wait.
pub const MAX_WAIT: Duration = Duration::from_secs(30);

/// Linear-ramp backoff: attempt `n` waits `min(n, 30)` seconds.
#[derive(Debug, Default)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    /// Fresh counter, first delay will be one second.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an attempt and return how long to wait before it.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_secs(u64::from(self.attempt)).min(MAX_WAIT)
    }

    /// Attempts made since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Back to zero after a successful reconnect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramps_linearly_then_flattens() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
        for _ in 3..40 {
            let delay = backoff.next_delay();
            assert!(delay <= MAX_WAIT);
        }
        assert_eq!(backoff.next_delay(), MAX_WAIT);
    }

    #[test]
    fn reset_restarts_the_ramp() {
        let mut backoff = Backoff::new();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
