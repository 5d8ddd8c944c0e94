//! Shared retry/backoff policy.
//!
//! One [`RetryPolicy`] decides both *whether* a failed attempt is retried
//! and *how long* to wait before the next one:
//!
//! - Transient errors (see [`StoreError::is_transient`]) are retried while
//!   the attempt budget lasts; conflicts and permanent errors never are.
//! - Delay for attempt `n` (1-based) is `base * 2^(n-1)`, shifted by a
//!   uniform jitter of up to `±jitter * delay`, then clamped to `[0, cap]`.
//!
//! With the defaults (`base = 1s`, `cap = 60s`, `max_retries = 3`) an
//! operation makes at most 4 attempts and waits roughly 1s, 2s, 4s between
//! them.

use std::time::Duration;

use rand::Rng;

use crate::error::StoreError;

/// Exponential backoff with jitter and a bounded attempt budget.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
    /// Jitter as a fraction of the computed delay, in `[0.0, 1.0]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_retries,
            base,
            cap,
            ..Self::default()
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Policy that never waits; handy for tests and dry runs.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base: Duration::ZERO,
            cap: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Total attempts an operation may make.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether to retry after `attempt_number` (1-based) failed with `error`.
    pub fn should_retry(&self, attempt_number: u32, error: &StoreError) -> bool {
        error.is_transient() && attempt_number < self.max_attempts()
    }

    /// Delay to sleep after attempt `attempt_number` (1-based) failed.
    pub fn delay_for(&self, attempt_number: u32) -> Duration {
        let sample = if self.jitter > 0.0 {
            rand::rng().random_range(-1.0..=1.0)
        } else {
            0.0
        };
        self.delay_with_sample(attempt_number, sample)
    }

    /// Deterministic core of [`delay_for`](Self::delay_for): `sample` in
    /// `[-1.0, 1.0]` selects where inside the jitter window the delay lands.
    pub fn delay_with_sample(&self, attempt_number: u32, sample: f64) -> Duration {
        let nominal = 1u32
            .checked_shl(attempt_number.saturating_sub(1))
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap));

        let spread = nominal.as_secs_f64() * self.jitter * sample.clamp(-1.0, 1.0);
        let jittered = (nominal.as_secs_f64() + spread).max(0.0);
        Duration::from_secs_f64(jittered).min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(60)).with_jitter(0.0)
    }

    #[test]
    fn delays_double_per_attempt() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5))
            .with_jitter(0.0);
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for(30), Duration::from_secs(5));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_window() {
        let policy = RetryPolicy::new(3, Duration::from_millis(400), Duration::from_secs(60))
            .with_jitter(0.25);
        assert_eq!(policy.delay_with_sample(1, -1.0), Duration::from_millis(300));
        assert_eq!(policy.delay_with_sample(1, 1.0), Duration::from_millis(500));
        for _ in 0..100 {
            let d = policy.delay_for(2);
            assert!(d >= Duration::from_millis(600) && d <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let policy = RetryPolicy::new(3, Duration::from_secs(4), Duration::from_secs(4))
            .with_jitter(1.0);
        assert_eq!(policy.delay_with_sample(1, 1.0), Duration::from_secs(4));
        assert_eq!(policy.delay_with_sample(1, -1.0), Duration::ZERO);
    }

    #[test]
    fn retries_transient_errors_within_budget() {
        let policy = no_jitter();
        let err = StoreError::Http {
            status: 503,
            body: "unavailable".into(),
        };
        assert!(policy.should_retry(1, &err));
        assert!(policy.should_retry(3, &err));
        assert!(!policy.should_retry(4, &err));
    }

    #[test]
    fn never_retries_permanent_errors_or_conflicts() {
        let policy = no_jitter();
        let forbidden = StoreError::Http {
            status: 403,
            body: "forbidden".into(),
        };
        let conflict = StoreError::Conflict {
            document_id: "P1".into(),
            expected: 5,
            found: Some(6),
        };
        assert!(!policy.should_retry(1, &forbidden));
        assert!(!policy.should_retry(1, &conflict));
    }

    #[test]
    fn zero_retries_means_single_attempt() {
        let policy = RetryPolicy::immediate(0);
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.should_retry(1, &StoreError::Timeout("t".into())));
        assert_eq!(policy.delay_for(1), Duration::ZERO);
    }
}
