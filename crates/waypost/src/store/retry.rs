//! Retry policy for store calls
//!
//! Exponential backoff with jitter, unbounded: a retrying call keeps going
//! until it succeeds, hits a permanent error, or its task is cancelled.

use std::time::Duration;

use backoff::ExponentialBackoff;

/// Backoff for transient store failures: 50ms initial, 10s cap, no
/// elapsed-time bound.
pub(crate) fn policy() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(50),
        max_interval: Duration::from_secs(10),
        max_elapsed_time: None,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_bounds() {
        let policy = policy();
        assert_eq!(policy.initial_interval, Duration::from_millis(50));
        assert_eq!(policy.max_interval, Duration::from_secs(10));
        assert!(policy.max_elapsed_time.is_none());
    }
}
