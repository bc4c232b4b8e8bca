//! Serde helpers for backend timestamps.
//!
//! The backend emits ISO-8601 without an offset (`2025-01-04T10:22:31.123456`);
//! those are read as UTC. Offset-bearing RFC 3339 strings are accepted too.
//! Timestamps are always written back as RFC 3339.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};

pub type Timestamp = DateTime<Utc>;

pub fn parse(input: &str) -> Option<Timestamp> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    input
        .parse::<NaiveDateTime>()
        .ok()
        .map(|naive| naive.and_utc())
}

/// Milliseconds from `start` to `end`, clamped at zero.
pub fn elapsed_ms(start: Timestamp, end: Timestamp) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}

pub fn serialize<S: Serializer>(value: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

pub mod option {
    use super::Timestamp;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Timestamp>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_some(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Timestamp>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => super::parse(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}"))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn naive_backend_timestamps_are_utc() {
        let ts = parse("2025-01-04T10:22:31.250000").expect("naive timestamp");
        assert_eq!(
            ts,
            Utc.with_ymd_and_hms(2025, 1, 4, 10, 22, 31).unwrap()
                + chrono::Duration::milliseconds(250)
        );
        assert_eq!(
            parse("2025-01-04T10:22:31").expect("no fraction"),
            Utc.with_ymd_and_hms(2025, 1, 4, 10, 22, 31).unwrap()
        );
    }

    #[test]
    fn offsets_are_normalized() {
        let ts = parse("2025-01-04T12:22:31+02:00").expect("rfc3339");
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 1, 4, 10, 22, 31).unwrap());
        assert!(parse("yesterday").is_none());
    }

    #[test]
    fn elapsed_never_goes_negative() {
        let start = Utc.with_ymd_and_hms(2025, 1, 4, 10, 0, 0).unwrap();
        let end = start + chrono::Duration::milliseconds(120);
        assert_eq!(elapsed_ms(start, end), 120);
        assert_eq!(elapsed_ms(end, start), 0);
    }
}
