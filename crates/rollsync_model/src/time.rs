//! Wall-clock time helpers.
//!
//! All persisted timestamps are ISO-8601 UTC with millisecond precision
//! (`2024-06-01T10:15:30.250Z`), and every clock in the workspace truncates
//! to milliseconds so that a timestamp survives a JSON round trip unchanged.

use crate::error::{ModelError, ModelResult};
use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use parking_lot::Mutex;
use std::fmt;

/// Source of wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time, truncated to milliseconds.
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        truncate_millis(Utc::now())
    }
}

/// A manually driven clock for tests and deterministic replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(truncate_millis(start)),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = truncate_millis(*now + by);
    }

    /// Jumps the clock to an arbitrary instant (may go backwards).
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = truncate_millis(to);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Truncates a timestamp to millisecond precision.
#[must_use]
pub fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(3)
}

/// Formats a timestamp as `YYYY-MM-DDTHH:MM:SS.sssZ`.
#[must_use]
pub fn format_iso8601(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses an RFC 3339 / ISO-8601 timestamp into UTC.
pub fn parse_iso8601(value: &str) -> ModelResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| ModelError::InvalidTimestamp {
            value: value.to_string(),
            message: e.to_string(),
        })
}

/// Serde adapter for `DateTime<Utc>` fields.
pub mod iso8601 {
    use super::{format_iso8601, parse_iso8601};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes as an ISO-8601 string.
    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_iso8601(ts))
    }

    /// Deserializes from an ISO-8601 string.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse_iso8601(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `Option<DateTime<Utc>>` fields.
pub mod iso8601_opt {
    use super::{format_iso8601, parse_iso8601};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes as an ISO-8601 string or `null`.
    pub fn serialize<S: Serializer>(ts: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => s.serialize_str(&format_iso8601(ts)),
            None => s.serialize_none(),
        }
    }

    /// Deserializes from an ISO-8601 string, `null`, or an empty string.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => parse_iso8601(value)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn format_uses_millis_and_z() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 10, 15, 30).unwrap()
            + Duration::milliseconds(250);
        assert_eq!(format_iso8601(&ts), "2024-06-01T10:15:30.250Z");
    }

    #[test]
    fn parse_accepts_offsets() {
        let ts = parse_iso8601("2024-06-01T15:45:30.000+05:30").unwrap();
        assert_eq!(format_iso8601(&ts), "2024-06-01T10:15:30.000Z");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_iso8601("yesterday").is_err());
    }

    #[test]
    fn manual_clock_moves() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::seconds(5));
        assert_eq!(clock.now(), start + Duration::seconds(5));
        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn system_clock_is_millisecond_precise() {
        let now = SystemClock.now();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
