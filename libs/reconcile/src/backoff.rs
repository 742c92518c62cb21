//! Backoff policy for remote control-plane calls.
//!
//! The policy is a plain value: a pure function of the attempt number and
//! the observed error. It keeps no per-call state, so one instance can be
//! shared by every call in a run.

use std::time::Duration;

use rand::Rng;

/// HTTP 429.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// HTTP 500.
pub const INTERNAL_SERVER_ERROR: u16 = 500;

/// HTTP 503.
pub const SERVICE_UNAVAILABLE: u16 = 503;

/// Default ceiling on attempts for a single remote call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Errors that may carry a classifiable service status.
///
/// Transport failures, decode failures and anything else that did not come
/// back from the service as a status return `None` and are never retried.
pub trait ServiceStatus {
    /// HTTP-like status code reported by the service, if any.
    fn http_status(&self) -> Option<u16>;
}

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether the call may be attempted again.
    pub retry: bool,

    /// How long to wait before the next attempt.
    pub delay: Duration,
}

impl RetryDecision {
    /// Do not retry.
    pub const STOP: Self = Self {
        retry: false,
        delay: Duration::ZERO,
    };
}

/// Exponential backoff with additive uniform jitter.
///
/// The delay for attempt `n` (0 for the first retry) is `base * 2^n` plus a
/// uniform draw from `[0, jitter)`. The delay itself is not capped;
/// `max_attempts` bounds the total wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay unit doubled on every attempt.
    pub base: Duration,

    /// Exclusive upper bound of the random jitter.
    pub jitter: Duration,

    /// Maximum attempts per call, the first attempt included.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            jitter: Duration::from_secs(2),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    /// Policy with the default timing and a different attempt ceiling.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Whether a status is a transient service fault.
    pub fn is_retryable_status(status: u16) -> bool {
        matches!(
            status,
            TOO_MANY_REQUESTS | INTERNAL_SERVER_ERROR | SERVICE_UNAVAILABLE
        )
    }

    /// Calculate the delay before retrying after attempt `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponential = 2u32
            .checked_pow(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .unwrap_or(Duration::MAX);

        exponential.saturating_add(self.jitter_sample())
    }

    /// Decide whether to retry after `error` was observed on `attempt`.
    ///
    /// The attempt ceiling is not applied here; the executor owns it.
    pub fn decide<E>(&self, attempt: u32, error: &E) -> RetryDecision
    where
        E: ServiceStatus + ?Sized,
    {
        match error.http_status() {
            Some(status) if Self::is_retryable_status(status) => RetryDecision {
                retry: true,
                delay: self.delay(attempt),
            },
            _ => RetryDecision::STOP,
        }
    }

    fn jitter_sample(&self) -> Duration {
        let bound = u64::try_from(self.jitter.as_nanos()).unwrap_or(u64::MAX);
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::rng().random_range(0..bound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    struct Status(Option<u16>);

    impl ServiceStatus for Status {
        fn http_status(&self) -> Option<u16> {
            self.0
        }
    }

    #[rstest]
    #[case(429, true)]
    #[case(500, true)]
    #[case(503, true)]
    #[case(400, false)]
    #[case(401, false)]
    #[case(404, false)]
    #[case(409, false)]
    #[case(502, false)]
    #[case(504, false)]
    fn test_status_classification(#[case] status: u16, #[case] retryable: bool) {
        let policy = BackoffPolicy::default();
        let decision = policy.decide(0, &Status(Some(status)));
        assert_eq!(decision.retry, retryable);
        if !retryable {
            assert_eq!(decision, RetryDecision::STOP);
        }
    }

    #[test]
    fn test_unclassified_error_is_not_retried() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.decide(3, &Status(None)), RetryDecision::STOP);
    }

    #[test]
    fn test_default_policy() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base, Duration::from_secs(1));
        assert_eq!(policy.jitter, Duration::from_secs(2));
        assert_eq!(policy.max_attempts, 10);
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let policy = BackoffPolicy {
            jitter: Duration::ZERO,
            ..BackoffPolicy::default()
        };
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(200), Duration::MAX);
    }

    #[test]
    fn test_with_max_attempts_floor() {
        assert_eq!(BackoffPolicy::with_max_attempts(0).max_attempts, 1);
        assert_eq!(BackoffPolicy::with_max_attempts(4).max_attempts, 4);
    }

    proptest! {
        #[test]
        fn prop_delay_within_jitter_window(attempt in 0u32..24) {
            let policy = BackoffPolicy::default();
            let floor = Duration::from_secs(1u64 << attempt);
            let delay = policy.decide(attempt, &Status(Some(TOO_MANY_REQUESTS))).delay;
            prop_assert!(delay >= floor);
            prop_assert!(delay < floor + Duration::from_secs(2));
        }
    }
}
