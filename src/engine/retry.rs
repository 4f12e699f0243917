//! Retry policy: bounded exponential backoff.
//!
//! Pure decision logic. The driver owns the actual sleeping, so backoff never
//! blocks another case's progress.

use std::time::Duration;

use crate::engine::task::FailureKind;

/// Retry policy attached to one task invocation.
///
/// Delay before attempt `n + 1` is `min(max_delay, initial_delay *
/// backoff^(n-1))`. `max_attempts = 0` means unlimited attempts.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Backoff multiplier, clamped to >= 1.0.
    pub backoff: f64,
    /// Total attempt budget; 0 = unlimited.
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration, backoff: f64, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff: backoff.max(1.0),
            max_attempts,
        }
    }

    /// The long-lived policy used by most pipeline steps: 1s initial, 10s
    /// cap, doubling, 10 attempts.
    pub fn standard() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10), 2.0, 10)
    }

    /// Fast-fail policy bounding a primary provider before fallback.
    pub fn fast_fail(max_attempts: u32) -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10), 2.0, max_attempts)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Decision after a failed attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryAction {
    /// Sleep for the delay, then attempt again.
    Retry(Duration),
    /// Stop; the invocation is exhausted.
    GiveUp,
}

/// Decides what to do after attempt `attempt_number` (1-based) failed with
/// `kind`. Non-retryable kinds always give up; otherwise the attempt budget
/// and backoff curve apply.
pub fn next_action(policy: &RetryPolicy, attempt_number: u32, kind: FailureKind) -> RetryAction {
    if !kind.retryable() {
        return RetryAction::GiveUp;
    }
    if policy.max_attempts > 0 && attempt_number >= policy.max_attempts {
        return RetryAction::GiveUp;
    }
    let exp = policy.backoff.powi(attempt_number.saturating_sub(1) as i32);
    let delay = policy.initial_delay.as_secs_f64() * exp;
    let capped = delay.min(policy.max_delay.as_secs_f64());
    RetryAction::Retry(Duration::from_secs_f64(capped))
}
