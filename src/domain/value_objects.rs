//! # Domain Value Objects
//!
//! Immutable value types shared by the collection pipeline.
//! Value objects are defined by their attributes rather than identity.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Identifier of one source run, used to correlate log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Creates a new unique run ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inclusive millisecond range from which randomized pauses are drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    #[must_use]
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// No pause at all
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0, 0)
    }

    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.min_ms <= self.max_ms
    }

    /// Draws a uniformly random pause from the range
    #[must_use]
    pub fn sample(&self) -> Duration {
        if self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(fastrand::u64(self.min_ms..=self.max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn test_delay_range_sample_within_bounds() {
        let range = DelayRange::new(500, 1500);
        for _ in 0..200 {
            let d = range.sample();
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_inverted_range_is_invalid_and_degenerate() {
        let range = DelayRange::new(10, 5);
        assert!(!range.is_valid());
        assert_eq!(range.sample(), Duration::from_millis(10));
        assert_eq!(DelayRange::zero().sample(), Duration::ZERO);
    }
}
