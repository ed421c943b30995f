//! Retry policy for the resilient fetch client
//!
//! The policy is pure: given the attempt number and the outcome of that
//! attempt it decides whether to stop, retry after a delay, or give up.
//! The client owns the loop and the sleeping.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::config::defaults;
use crate::domain::FetchOutcome;

/// Retry policy settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    /// Base delay (milliseconds)
    pub base_delay_ms: u64,
    /// Number of doublings after which the delay stops growing
    pub backoff_cap: u32,
    /// Upper bound of the random jitter added to each delay (milliseconds)
    pub jitter_range_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::search()
    }
}

/// What to do after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Succeed,
    Retry { backoff: Duration },
    GiveUp,
}

impl RetryPolicy {
    /// Budget for primary (search) fetches
    #[must_use]
    pub const fn search() -> Self {
        Self {
            max_attempts: defaults::SEARCH_MAX_ATTEMPTS,
            base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            backoff_cap: defaults::BACKOFF_CAP,
            jitter_range_ms: defaults::RETRY_JITTER_MS,
        }
    }

    /// Smaller budget for detail fetches
    #[must_use]
    pub const fn detail() -> Self {
        Self {
            max_attempts: defaults::DETAIL_MAX_ATTEMPTS,
            ..Self::search()
        }
    }

    /// Same policy without any waiting, for tests and dry runs
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            backoff_cap: 0,
            jitter_range_ms: 0,
        }
    }

    /// Deterministic part of the delay after `attempt` (1-based):
    /// `base * 2^min(attempt, cap)`
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let doublings = attempt.min(self.backoff_cap).min(32);
        Duration::from_millis(self.base_delay_ms.saturating_mul(1_u64 << doublings))
    }

    fn jitter(&self) -> Duration {
        if self.jitter_range_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(fastrand::u64(0..=self.jitter_range_ms))
    }

    /// Full delay after `attempt`, jitter included
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay(attempt) + self.jitter()
    }

    /// Decision after `attempt` (1-based) produced `outcome`
    #[must_use]
    pub fn decide(&self, attempt: u32, outcome: &FetchOutcome) -> RetryDecision {
        match outcome {
            FetchOutcome::Success { .. } => RetryDecision::Succeed,
            FetchOutcome::FatalFailure { .. } => RetryDecision::GiveUp,
            FetchOutcome::TransientFailure { .. } if attempt >= self.max_attempts => RetryDecision::GiveUp,
            FetchOutcome::TransientFailure { .. } => RetryDecision::Retry {
                backoff: self.delay_for(attempt),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransientReason;

    fn transient() -> FetchOutcome {
        FetchOutcome::TransientFailure {
            reason: TransientReason::Blocked { status: 403 },
        }
    }

    #[test]
    fn test_base_delay_strictly_increases_until_cap() {
        let policy = RetryPolicy::search();
        let delays: Vec<Duration> = (1..=8).map(|a| policy.base_delay(a)).collect();
        for pair in delays[..5].windows(2) {
            assert!(pair[0] < pair[1], "{pair:?}");
        }
        assert_eq!(delays[4], delays[5]);
        assert_eq!(delays[5], delays[7]);
        assert_eq!(delays[4], Duration::from_millis(2000 * 32));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::detail();
        for attempt in 1..=3 {
            let delay = policy.delay_for(attempt);
            let base = policy.base_delay(attempt);
            assert!(delay >= base);
            assert!(delay <= base + Duration::from_millis(policy.jitter_range_ms));
        }
    }

    #[test]
    fn test_decide_state_machine() {
        let policy = RetryPolicy::immediate(3);
        let ok = FetchOutcome::Success {
            status: 200,
            body: String::new(),
        };
        assert_eq!(policy.decide(1, &ok), RetryDecision::Succeed);
        assert_eq!(
            policy.decide(1, &transient()),
            RetryDecision::Retry {
                backoff: Duration::ZERO
            }
        );
        assert_eq!(policy.decide(3, &transient()), RetryDecision::GiveUp);
        let fatal = FetchOutcome::FatalFailure {
            reason: "cancelled".into(),
            attempts: 1,
        };
        assert_eq!(policy.decide(1, &fatal), RetryDecision::GiveUp);
    }

    #[test]
    fn test_huge_attempt_numbers_do_not_overflow() {
        let policy = RetryPolicy {
            backoff_cap: 200,
            base_delay_ms: u64::MAX / 2,
            ..RetryPolicy::search()
        };
        assert_eq!(policy.base_delay(100), Duration::from_millis(u64::MAX));
    }
}
