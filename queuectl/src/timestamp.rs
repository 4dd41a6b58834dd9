//! A UTC timestamp with a canonical, sortable text form.
//!
//! Every timestamp the queue persists is written with [`Timestamp::to_canonical`]. The format is
//! fixed width, zero padded and always in UTC, so comparing two canonical strings byte by byte
//! gives the same answer as comparing the instants they represent. Stores rely on this to order
//! and filter jobs with plain text comparisons.
//!
//! # Example
//!
//! ```
//! # use queuectl::timestamp::Timestamp;
//! # use chrono::TimeDelta;
//! let earlier: Timestamp = "2024-03-01T09:15:00.000000Z".parse().unwrap();
//! let later = earlier + TimeDelta::seconds(5);
//!
//! assert_eq!(later.to_canonical(), "2024-03-01T09:15:05.000000Z");
//! assert!(earlier.to_canonical() < later.to_canonical());
//! ```
use std::{
    fmt::Display,
    ops::{Add, Sub},
    str::FromStr,
};

use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// A point in time, truncated to microsecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid timestamp `{value}`, expected format YYYY-MM-DDTHH:MM:SS.ffffffZ")]
pub struct TimestampError {
    value: String,
}

impl Timestamp {
    /// The current wall clock time.
    pub fn now() -> Self {
        Utc::now().into()
    }

    /// Renders the timestamp in the canonical storage format.
    pub fn to_canonical(&self) -> String {
        self.0.format(CANONICAL_FORMAT).to_string()
    }

    /// Parses a timestamp previously produced by [`Timestamp::to_canonical`].
    pub fn parse_canonical(value: &str) -> Result<Self, TimestampError> {
        NaiveDateTime::parse_from_str(value, CANONICAL_FORMAT)
            .map(|naive| Self(naive.and_utc()))
            .map_err(|_| TimestampError {
                value: value.to_owned(),
            })
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.trunc_subsecs(6))
    }
}

impl Add<TimeDelta> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: TimeDelta) -> Self::Output {
        (self.0 + rhs).into()
    }
}

impl Sub<TimeDelta> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: TimeDelta) -> Self::Output {
        (self.0 - rhs).into()
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_canonical())
    }
}

impl FromStr for Timestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_canonical(s)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_canonical())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::parse_canonical(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn canonical_format_is_fixed_width() {
        let timestamp: Timestamp = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap().into();

        assert_eq!(timestamp.to_canonical(), "2024-01-02T03:04:05.000000Z");
    }

    #[test]
    fn parse_inverts_to_canonical() {
        let timestamp = Timestamp::now();

        let parsed = Timestamp::parse_canonical(&timestamp.to_canonical()).unwrap();

        assert_eq!(parsed, timestamp);
    }

    #[test]
    fn text_order_matches_time_order() {
        let base: Timestamp = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap().into();
        let deltas = [
            TimeDelta::microseconds(1),
            TimeDelta::milliseconds(999),
            TimeDelta::seconds(1),
            TimeDelta::days(40),
            TimeDelta::days(3650),
        ];

        for delta in deltas {
            let later = base + delta;
            assert!(base < later);
            assert!(base.to_canonical() < later.to_canonical(), "{delta}");
        }
    }

    #[test]
    fn rejects_other_formats() {
        assert!(Timestamp::parse_canonical("2024-01-02 03:04:05").is_err());
        assert!(Timestamp::parse_canonical("2024-01-02T03:04:05+01:00").is_err());
        assert!(Timestamp::parse_canonical("").is_err());
    }

    #[test]
    fn serde_uses_canonical_text() {
        let timestamp: Timestamp = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap().into();

        let json = serde_json::to_string(&timestamp).unwrap();

        assert_eq!(json, "\"2024-06-01T00:00:00.000000Z\"");
        assert_eq!(serde_json::from_str::<Timestamp>(&json).unwrap(), timestamp);
    }
}
