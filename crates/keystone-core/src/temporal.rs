//! # Temporal Types — UTC Millisecond Timestamps
//!
//! `Timestamp` is the only time type that enters a canonical audit payload.
//! It is UTC, truncated to milliseconds, and renders as
//! `YYYY-MM-DDTHH:MM:SS.mmmZ`.
//!
//! ## Invariant
//!
//! PostgreSQL `timestamptz` stores microseconds. A value truncated to
//! milliseconds before it is first hashed survives the storage round-trip
//! unchanged, so a hash recomputed from a stored row reproduces the hash
//! computed at append time.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;

/// A UTC-only timestamp, truncated to millisecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        DateTime::<Utc>::deserialize(deserializer).map(Self::from_utc)
    }
}

impl Timestamp {
    /// Current UTC time, truncated to milliseconds.
    pub fn now() -> Self {
        Self::from_utc(Utc::now())
    }

    /// Wrap a `DateTime<Utc>`, discarding sub-millisecond precision.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt.trunc_subsecs(3))
    }

    /// Parse an RFC 3339 string. Any offset is accepted and converted to UTC.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| ValidationError::InvalidTimestamp(format!("{s:?}: {e}")))?;
        Ok(Self::from_utc(dt.with_timezone(&Utc)))
    }

    /// Access the inner `DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// The later of `self` and one millisecond past `floor`.
    ///
    /// Used when appending to a chain whose head was written by a clock that
    /// is ahead of ours; keeps `(created_at, id)` ordering equal to append order.
    pub fn not_before(self, floor: Timestamp) -> Self {
        let min = Self(floor.0 + Duration::milliseconds(1));
        if self.0 > floor.0 {
            self
        } else {
            min
        }
    }

    /// Render as RFC 3339 with exactly three fractional digits and a `Z` suffix.
    pub fn to_rfc3339_millis(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_utc(dt)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_rfc3339_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn from_utc_truncates_to_millis() {
        let dt = Utc
            .with_ymd_and_hms(2024, 1, 1, 12, 30, 45)
            .unwrap()
            .with_nanosecond(123_456_789)
            .unwrap();
        let ts = Timestamp::from_utc(dt);
        assert_eq!(ts.as_datetime().nanosecond(), 123_000_000);
        assert_eq!(ts.to_rfc3339_millis(), "2024-01-01T12:30:45.123Z");
    }

    #[test]
    fn whole_seconds_render_three_zero_digits() {
        let ts = Timestamp::from_utc(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(ts.to_string(), "2024-02-01T00:00:00.000Z");
    }

    #[test]
    fn parse_converts_offsets_to_utc() {
        let ts = Timestamp::parse("2024-01-01T05:00:00.250+05:00").unwrap();
        assert_eq!(ts.to_rfc3339_millis(), "2024-01-01T00:00:00.250Z");
    }

    #[test]
    fn deserialize_truncates_to_millis() {
        let ts: Timestamp = serde_json::from_str("\"2024-01-01T00:00:00.123456Z\"").unwrap();
        assert_eq!(ts, Timestamp::parse("2024-01-01T00:00:00.123Z").unwrap());
        assert_eq!(ts.as_datetime().nanosecond(), 123_000_000);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Timestamp::parse("yesterday").is_err());
    }

    #[test]
    fn not_before_clamps_forward() {
        let head = Timestamp::parse("2024-01-01T00:00:00.500Z").unwrap();
        let earlier = Timestamp::parse("2024-01-01T00:00:00.100Z").unwrap();
        assert_eq!(
            earlier.not_before(head).to_rfc3339_millis(),
            "2024-01-01T00:00:00.501Z"
        );
        let later = Timestamp::parse("2024-01-01T00:00:01.000Z").unwrap();
        assert_eq!(later.not_before(head), later);
    }
}
