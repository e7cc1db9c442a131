//! How the controller waits between reconnection attempts after a
//! connection dies, pluggable so callers can opt out of retrying or tune
//! the backoff curve.

use std::time::Duration;

/// Decides how long to wait before the *n*th reconnection attempt (1-based)
/// since the connection was last healthy.
pub trait ReconnectionPolicy: Send {
    /// Returns `None` to give up and surface the failure to the caller, or
    /// `Some(delay)` to retry after waiting `delay`.
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;

    /// Called once a connection becomes healthy again, so attempt-scoped
    /// state (if any) can reset.
    fn reset(&mut self) {}
}

/// Never reconnects: the first failure is final.
#[derive(Default)]
pub struct NoReconnect;

impl ReconnectionPolicy for NoReconnect {
    fn next_delay(&mut self, _attempt: u32) -> Option<Duration> {
        None
    }
}

/// Retries forever with the same fixed delay.
pub struct FixedReconnect {
    pub delay: Duration,
}

impl ReconnectionPolicy for FixedReconnect {
    fn next_delay(&mut self, _attempt: u32) -> Option<Duration> {
        Some(self.delay)
    }
}

/// Doubles the delay on each attempt, starting at `initial` and never
/// exceeding `max`; retries forever (the default policy).
pub struct ExponentialReconnect {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ExponentialReconnect {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(30),
        }
    }
}

impl ReconnectionPolicy for ExponentialReconnect {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let delay = self.initial.saturating_mul(factor.min(u32::MAX as u64) as u32);
        Some(delay.min(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_reconnect_never_retries() {
        assert_eq!(NoReconnect.next_delay(1), None);
    }

    #[test]
    fn fixed_reconnect_always_same_delay() {
        let mut policy = FixedReconnect { delay: Duration::from_secs(1) };
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(10), Some(Duration::from_secs(1)));
    }

    #[test]
    fn exponential_reconnect_doubles_then_caps() {
        let mut policy = ExponentialReconnect::default();
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(250)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(1000)));
        assert_eq!(policy.next_delay(20), Some(Duration::from_secs(30)));
    }
}
