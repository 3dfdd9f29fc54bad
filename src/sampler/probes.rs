//! Collaborators queried by the sampler, and the retry policy around them.
//!
//! The ledger RPC client and the per-node disk probe live outside this crate;
//! the sampler only sees these traits.

use std::collections::HashMap;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use super::clock::{CancellationToken, Clock};
use crate::error::GrowthError;

/// Chain state as reported by the master node
pub trait ChainQuery {
    /// Height of the newest block
    fn block_height(&mut self) -> Result<u64, GrowthError>;

    /// Serialized size of the block at `height`, in bytes
    fn block_size(&mut self, height: u64) -> Result<u64, GrowthError>;

    /// Published item count per stream, as listed by `node`
    fn stream_item_counts(&mut self, node: usize) -> Result<HashMap<String, u64>, GrowthError>;
}

/// Disk usage of a node's chain directory
pub trait DiskProbe {
    /// Total size of the chain directory in KB
    fn total_usage_kb(&mut self, node: usize) -> Result<f64, GrowthError>;

    /// Raw recursive listing (`size<TAB>path` per line)
    fn recursive_usage_listing(&mut self, node: usize) -> Result<String, GrowthError>;
}

/// What the sampler does once retries for a query are exhausted
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// End the sampling session with the error
    #[default]
    Abort,
    /// Skip the tick, count a gap and keep sampling
    RecordGap,
}

/// Exponential backoff for transient `ExternalQueryFailure`s
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Backoff before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        Duration::from_nanos((self.initial_backoff.as_nanos() as f64 * factor).round() as u64)
    }

    /// Run `query`, retrying external failures with backoff.
    ///
    /// Cancellation is checked before every attempt. Errors other than
    /// `ExternalQueryFailure` are returned at once.
    pub fn run<T, C, F>(
        &self,
        clock: &C,
        cancel: &CancellationToken,
        what: &str,
        mut query: F,
    ) -> Result<T, GrowthError>
    where
        C: Clock,
        F: FnMut() -> Result<T, GrowthError>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(GrowthError::Cancelled);
            }

            match query() {
                Err(GrowthError::ExternalQueryFailure(msg)) if attempt < attempts => {
                    let wait = self.backoff(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what, attempt, attempts, msg, wait
                    );
                    clock.sleep(wait);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::clock::ManualClock;

    #[test]
    fn test_backoff_grows() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn test_retry_recovers() {
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        let mut calls = 0;

        let result = RetryPolicy::default().run(&clock, &cancel, "height", || {
            calls += 1;
            if calls < 3 {
                Err(GrowthError::ExternalQueryFailure("timeout".to_string()))
            } else {
                Ok(42u64)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
        assert_eq!(clock.total_slept(), Duration::from_millis(600));
    }

    #[test]
    fn test_retry_exhausted() {
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        let mut calls = 0;

        let result: Result<u64, _> = RetryPolicy::default().run(&clock, &cancel, "height", || {
            calls += 1;
            Err(GrowthError::ExternalQueryFailure("down".to_string()))
        });

        assert!(matches!(result, Err(GrowthError::ExternalQueryFailure(_))));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_other_errors_not_retried() {
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        let mut calls = 0;

        let result: Result<u64, _> = RetryPolicy::default().run(&clock, &cancel, "listing", || {
            calls += 1;
            Err(GrowthError::ParseError("garbage".to_string()))
        });

        assert!(matches!(result, Err(GrowthError::ParseError(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_cancelled_before_call() {
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<u64, _> = RetryPolicy::none().run(&clock, &cancel, "height", || Ok(1));
        assert!(matches!(result, Err(GrowthError::Cancelled)));
    }
}
