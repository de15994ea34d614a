//! # Bounded Retry
//!
//! Purpose: Re-run a single store operation a fixed number of times with a
//! fixed pause between attempts.
//!
//! The executor performs no logging; callers that want to observe failed
//! attempts pass an observer closure.

use std::thread;
use std::time::Duration;

use crate::error::{CacheError, CacheResult};

/// Retry parameters for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Builds a policy from the public `(retry_times, sleep_seconds)` pair.
    pub fn new(max_attempts: u32, sleep_seconds: u64) -> CacheResult<Self> {
        Self::with_delay(max_attempts, Duration::from_secs(sleep_seconds))
    }

    /// Builds a policy with an arbitrary inter-attempt delay.
    ///
    /// `max_attempts == 0` is rejected; a zero delay means busy retry.
    pub fn with_delay(max_attempts: u32, delay: Duration) -> CacheResult<Self> {
        if max_attempts == 0 {
            return Err(CacheError::config("retry attempts must be at least 1"));
        }
        Ok(RetryPolicy {
            max_attempts,
            delay,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Runs `operation` under `policy`, returning the first success or the last
/// failure.
pub fn run_with_retry<T, F>(policy: RetryPolicy, operation: F) -> CacheResult<T>
where
    F: FnMut() -> CacheResult<T>,
{
    run_with_retry_observed(policy, operation, |_, _| {})
}

/// Like [`run_with_retry`], calling `observer(attempt, &error)` after every
/// failed attempt. Attempts are numbered from 1.
///
/// Non-retryable errors end the loop immediately.
pub fn run_with_retry_observed<T, F, O>(
    policy: RetryPolicy,
    mut operation: F,
    mut observer: O,
) -> CacheResult<T>
where
    F: FnMut() -> CacheResult<T>,
    O: FnMut(u32, &CacheError),
{
    let mut attempt = 1;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) => {
                observer(attempt, &err);
                if attempt >= policy.max_attempts || !err.is_retryable() {
                    return Err(err);
                }
            }
        }
        if !policy.delay.is_zero() {
            thread::sleep(policy.delay);
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::time::Instant;

    fn transient() -> CacheError {
        CacheError::io("127.0.0.1:1", io::Error::from(io::ErrorKind::ConnectionReset))
    }

    #[test]
    fn rejects_zero_attempts() {
        let err = RetryPolicy::new(0, 1).unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));
    }

    #[test]
    fn always_failing_operation_runs_exactly_k_times() {
        let policy = RetryPolicy::with_delay(4, Duration::from_millis(10)).unwrap();
        let mut calls = 0;
        let started = Instant::now();
        let result: CacheResult<()> = run_with_retry(policy, || {
            calls += 1;
            Err(transient())
        });

        assert!(matches!(result, Err(CacheError::Io { .. })));
        assert_eq!(calls, 4);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn returns_success_at_attempt_j() {
        let policy = RetryPolicy::new(5, 0).unwrap();
        let mut calls = 0;
        let value = run_with_retry(policy, || {
            calls += 1;
            if calls < 3 {
                Err(transient())
            } else {
                Ok("done")
            }
        })
        .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls, 3);
    }

    #[test]
    fn store_rejections_are_not_retried() {
        let policy = RetryPolicy::new(5, 0).unwrap();
        let mut calls = 0;
        let result: CacheResult<()> = run_with_retry(policy, || {
            calls += 1;
            Err(CacheError::StoreCommand {
                message: "WRONGTYPE".into(),
            })
        });

        assert!(matches!(result, Err(CacheError::StoreCommand { .. })));
        assert_eq!(calls, 1);
    }

    #[test]
    fn observer_sees_every_failed_attempt() {
        let policy = RetryPolicy::new(3, 0).unwrap();
        let mut seen = Vec::new();
        let _: CacheResult<()> =
            run_with_retry_observed(policy, || Err(transient()), |attempt, _| seen.push(attempt));
        assert_eq!(seen, vec![1, 2, 3]);
    }
}
