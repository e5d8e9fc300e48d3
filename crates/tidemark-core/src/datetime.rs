use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

/// An instant in milliseconds since the Unix epoch.
///
/// This is the integer form used by the creation/modification index tables;
/// the wire/storage form of dates inside documents is always an RFC 3339
/// string (see [`format_rfc3339`]).
#[derive(
    Encode,
    Decode,
    Serialize,
    Deserialize,
    Debug,
    Copy,
    Clone,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(u64::MAX);

    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for Timestamp {
    fn from(millis: u64) -> Self {
        Self(millis)
    }
}

/// Format a timestamp as an RFC 3339 UTC string with second precision,
/// e.g. `2012-07-05T12:00:00Z`.
pub fn format_rfc3339(ts: Timestamp) -> String {
    let secs = i64::try_from(ts.as_millis() / 1000).unwrap_or(i64::MAX);
    let dt = OffsetDateTime::from_unix_timestamp(secs)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    dt.format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

/// Parse a permissive ISO-ish datetime string.
///
/// Accepts full RFC 3339 (with or without fractional seconds or an
/// explicit offset), a bare `YYYY-MM-DDTHH:MM:SS` and a bare date, all
/// interpreted as UTC. Returns `None` for anything else; callers fall
/// back to "now" per the date contract.
pub fn parse_datetime(s: &str) -> Option<Timestamp> {
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(from_offset(dt));
    }

    const BARE: &[time::format_description::BorrowedFormatItem<'static>] =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    if let Ok(dt) = PrimitiveDateTime::parse(s, BARE) {
        return Some(from_offset(dt.assume_utc()));
    }

    const DATE_ONLY: &[time::format_description::BorrowedFormatItem<'static>] =
        format_description!("[year]-[month]-[day]");
    if let Ok(date) = Date::parse(s, DATE_ONLY) {
        return Some(from_offset(date.midnight().assume_utc()));
    }

    None
}

fn from_offset(dt: OffsetDateTime) -> Timestamp {
    let millis = dt.unix_timestamp_nanos() / 1_000_000;
    Timestamp::from_millis(u64::try_from(millis).unwrap_or(0))
}

/// Normalize a document's datetime value to the canonical RFC 3339 UTC
/// string. Unparseable or non-string values resolve to `now` (the
/// permissive-parser fallback of the date contract).
pub fn normalize_datetime(value: &Value) -> String {
    let ts = match value {
        Value::String(s) => parse_datetime(s).unwrap_or_else(Timestamp::now),
        _ => Timestamp::now(),
    };
    format_rfc3339(ts)
}
