//! Reconnection bookkeeping.
//!
//! Pure attempt counter; the coordinator loop owns the actual timers.  Every
//! failure while the user still wants playback yields a decision: retry after
//! the configured delay, or give up.  The counter resets on a confirmed
//! recovery and after exhaustion, so a later manual restart gets a fresh
//! budget.

use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    Exhausted,
}

#[derive(Debug)]
pub struct ReconnectionSupervisor {
    attempts: u32,
    max_attempts: u32,
    delay: Duration,
}

impl ReconnectionSupervisor {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Register a failed (re)start.
    pub fn on_failure(&mut self) -> RetryDecision {
        if self.attempts >= self.max_attempts {
            info!(
                "supervisor: giving up after {} attempts",
                self.attempts
            );
            self.reset();
            return RetryDecision::Exhausted;
        }
        self.attempts += 1;
        info!(
            "supervisor: scheduling retry {}/{} in {:?}",
            self.attempts, self.max_attempts, self.delay
        );
        RetryDecision::Retry {
            attempt: self.attempts,
            delay: self.delay,
        }
    }

    /// Playback confirmed healthy; the budget is restored in full.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> ReconnectionSupervisor {
        ReconnectionSupervisor::new(3, Duration::from_millis(2000))
    }

    #[test]
    fn retries_are_bounded() {
        let mut sup = supervisor();
        for expected in 1..=3 {
            match sup.on_failure() {
                RetryDecision::Retry { attempt, delay } => {
                    assert_eq!(attempt, expected);
                    assert_eq!(delay, Duration::from_millis(2000));
                }
                RetryDecision::Exhausted => panic!("exhausted too early"),
            }
        }
        assert_eq!(sup.on_failure(), RetryDecision::Exhausted);
    }

    #[test]
    fn exhaustion_restores_the_budget() {
        let mut sup = supervisor();
        for _ in 0..3 {
            sup.on_failure();
        }
        assert_eq!(sup.on_failure(), RetryDecision::Exhausted);
        // A manual restart afterwards retries again from attempt 1.
        assert!(matches!(
            sup.on_failure(),
            RetryDecision::Retry { attempt: 1, .. }
        ));
    }

    #[test]
    fn success_resets_the_counter() {
        let mut sup = supervisor();
        sup.on_failure();
        sup.on_failure();
        sup.reset();
        assert_eq!(sup.attempts(), 0);
        assert!(matches!(
            sup.on_failure(),
            RetryDecision::Retry { attempt: 1, .. }
        ));
    }
}
