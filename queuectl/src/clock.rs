//! Sources of the current time.
//!
//! Everything that decides on eligibility or computes retry times asks a [`Clock`] rather than
//! reading the system time directly, so tests can pin and advance time with a [`FixedClock`].
use std::sync::{Arc, Mutex};

use chrono::TimeDelta;

use crate::timestamp::Timestamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time.
///
/// ```
/// # use queuectl::clock::{Clock, FixedClock};
/// # use chrono::TimeDelta;
/// let clock = FixedClock::new("2024-01-01T00:00:00.000000Z".parse().unwrap());
/// let handle = clock.clone();
///
/// handle.advance(TimeDelta::seconds(5));
///
/// assert_eq!(clock.now().to_canonical(), "2024-01-01T00:00:05.000000Z");
/// ```
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<Mutex<Timestamp>>,
}

impl FixedClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = *now + delta;
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        Self::new(Timestamp::now())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
