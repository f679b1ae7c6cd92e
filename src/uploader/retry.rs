//! Retry policy for chunk transfers

use crate::uploader::error::UploadError;
use rand::Rng;
use std::time::Duration;

/// Maximum transfer attempts per chunk
pub const MAX_ATTEMPTS: u32 = 5;

const BASE_DELAY_MS: u64 = 1_000;
const MAX_DELAY_MS: u64 = 30_000;

/// Outcome of a retry decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Try again after the given delay
    Retry(Duration),
    /// The error is permanent for this chunk
    GiveUp,
}

/// Pure retry policy: (attempt, error) -> decision.
///
/// Attempt numbering is zero-based: `decide(0, ..)` is consulted after the
/// first failed attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide whether a failed attempt should be retried
    pub fn decide(&self, attempt: u32, error: &UploadError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::GiveUp;
        }
        if attempt + 1 >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(backoff_delay(attempt))
    }
}

/// Exponential backoff with up to 10% jitter, capped at 30 s:
/// `min(30_000, 1_000 * 2^attempt * (1 + rand[0, 0.1)))` milliseconds
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(16));
    let jitter = 1.0 + rand::thread_rng().gen_range(0.0..0.1);
    let delay_ms = ((exp as f64 * jitter) as u64).min(MAX_DELAY_MS);
    Duration::from_millis(delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> UploadError {
        UploadError::http(503, "unavailable")
    }

    #[test]
    fn fatal_errors_give_up_immediately() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(0, &UploadError::http(400, "bad request")),
            RetryDecision::GiveUp
        );
        assert_eq!(
            policy.decide(0, &UploadError::Validation("empty".to_string())),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn transient_errors_retry_until_attempts_exhausted() {
        let policy = RetryPolicy::default();
        for attempt in 0..MAX_ATTEMPTS - 1 {
            assert!(matches!(
                policy.decide(attempt, &transient()),
                RetryDecision::Retry(_)
            ));
        }
        assert_eq!(
            policy.decide(MAX_ATTEMPTS - 1, &transient()),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn incomplete_results_are_retried() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.decide(1, &UploadError::Incomplete { next_byte: 524_288 }),
            RetryDecision::Retry(_)
        ));
    }

    #[test]
    fn delays_stay_within_the_jitter_envelope() {
        for attempt in 0..6u32 {
            let lower = 1_000u64 * (1 << attempt);
            for _ in 0..50 {
                let ms = backoff_delay(attempt).as_millis() as u64;
                let upper = ((lower as f64) * 1.1).min(30_000.0) as u64;
                assert!(ms >= lower.min(30_000), "attempt {attempt}: {ms}ms too low");
                assert!(ms <= upper, "attempt {attempt}: {ms}ms too high");
            }
        }
    }

    #[test]
    fn delay_caps_at_thirty_seconds() {
        for _ in 0..20 {
            assert!(backoff_delay(10).as_millis() <= 30_000);
        }
    }
}
