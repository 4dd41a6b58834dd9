//! Backoff strategies deciding when a failed job may be attempted again.
//!
//! The queue uses [`Exponential`] backoff: the first retry waits the base delay and every further
//! failure doubles the wait. There is no jitter, so given the same clock the retry time is always
//! the same.
//!
//! # Example
//!
//! ```
//! # use queuectl::backoff::{Exponential, Strategy, DEFAULT_BACKOFF};
//! # use chrono::TimeDelta;
//! assert_eq!(DEFAULT_BACKOFF.backoff(1), TimeDelta::seconds(5));
//! assert_eq!(DEFAULT_BACKOFF.backoff(2), TimeDelta::seconds(10));
//! assert_eq!(DEFAULT_BACKOFF.backoff(3), TimeDelta::seconds(20));
//! assert_eq!(DEFAULT_BACKOFF.backoff(4), TimeDelta::seconds(40));
//! ```
use chrono::TimeDelta;

/// Exponential backoff with a five second base.
pub const DEFAULT_BACKOFF: Exponential = Exponential::new(TimeDelta::seconds(5));

/// Delays are clamped to this so that adding them to a timestamp cannot overflow.
const LONGEST_DELAY: TimeDelta = TimeDelta::days(36_500);

/// Type that can be used to implement a backoff strategy.
pub trait Strategy {
    /// Given the number of failed attempts so far returns the [`TimeDelta`] to wait before the
    /// job should be retried.
    fn backoff(&self, attempt: u32) -> TimeDelta;
}

/// Exponential backoff strategy.
///
/// Returns `base * 2^(attempt - 1)`, saturating at roughly a century.
///
/// # Example
///
/// ```
/// # use queuectl::backoff::{Exponential, Strategy};
/// # use chrono::TimeDelta;
/// let strategy = Exponential::new(TimeDelta::seconds(2));
///
/// assert_eq!(strategy.backoff(1), TimeDelta::seconds(2));
/// assert_eq!(strategy.backoff(2), TimeDelta::seconds(4));
/// assert_eq!(strategy.backoff(3), TimeDelta::seconds(8));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exponential {
    base: TimeDelta,
}

impl Exponential {
    pub const fn new(base: TimeDelta) -> Self {
        Self { base }
    }
}

impl Default for Exponential {
    fn default() -> Self {
        DEFAULT_BACKOFF
    }
}

impl Strategy for Exponential {
    fn backoff(&self, attempt: u32) -> TimeDelta {
        2_i64
            .checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| self.base.num_milliseconds().checked_mul(factor))
            .map(TimeDelta::milliseconds)
            .unwrap_or(LONGEST_DELAY)
            .min(LONGEST_DELAY)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_backoff_doubles_from_five_seconds() {
        let delays: Vec<_> = (1..=6).map(|attempt| DEFAULT_BACKOFF.backoff(attempt)).collect();

        assert_eq!(
            delays,
            [5, 10, 20, 40, 80, 160].map(TimeDelta::seconds).to_vec()
        );
    }

    #[test]
    fn backoff_is_strictly_increasing() {
        for attempt in 1..30 {
            assert!(DEFAULT_BACKOFF.backoff(attempt) < DEFAULT_BACKOFF.backoff(attempt + 1));
        }
    }

    #[test]
    fn backoff_saturates_for_huge_attempts() {
        assert_eq!(DEFAULT_BACKOFF.backoff(u32::MAX), LONGEST_DELAY);
        assert_eq!(DEFAULT_BACKOFF.backoff(200), LONGEST_DELAY);
    }

    #[test]
    fn attempt_zero_is_treated_as_first_attempt() {
        assert_eq!(DEFAULT_BACKOFF.backoff(0), TimeDelta::seconds(5));
    }

    #[test]
    fn sub_second_bases_are_honoured() {
        let strategy = Exponential::new(TimeDelta::milliseconds(250));

        assert_eq!(strategy.backoff(1), TimeDelta::milliseconds(250));
        assert_eq!(strategy.backoff(3), TimeDelta::seconds(1));
    }
}
