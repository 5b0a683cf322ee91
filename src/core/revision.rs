use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use time::{
    OffsetDateTime, PrimitiveDateTime, format_description::well_known::Rfc3339,
    macros::format_description,
};

use crate::types::EpochMs;

/// Value that cannot be interpreted as a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("value is not a valid revision timestamp")]
pub struct InvalidRevision;

/// Revision marker of the legacy state row, normalized to epoch milliseconds.
///
/// Serializes as RFC 3339 UTC with exactly three fractional digits so the same
/// revision renders identically whether the store keeps it as a timestamp or
/// as a bigint epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(EpochMs);

impl Revision {
    /// Wraps epoch milliseconds.
    pub const fn from_epoch_ms(ms: EpochMs) -> Self {
        Self(ms)
    }

    /// Epoch milliseconds.
    pub const fn epoch_ms(self) -> EpochMs {
        self.0
    }

    /// Smallest revision strictly after `self`.
    pub const fn successor(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Renders `2026-10-17T08:15:30.123Z`.
    pub fn to_iso(self) -> String {
        let format = format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
        );
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.0) * 1_000_000)
            .ok()
            .and_then(|dt| dt.format(&format).ok())
            .unwrap_or_else(|| self.0.to_string())
    }

    /// Parses an RFC 3339 timestamp, `SQLite`'s `YYYY-MM-DD HH:MM:SS[.SSS]`
    /// (taken as UTC) or an integer epoch-ms string.
    ///
    /// Sub-millisecond precision is truncated.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if let Ok(ms) = text.parse::<i64>() {
            return Some(Self(ms));
        }
        // SQLite clock text: datetime('now'), CURRENT_TIMESTAMP, strftime('%f').
        let sqlite = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        let sqlite_fraction =
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]");
        let dt = OffsetDateTime::parse(text, &Rfc3339)
            .ok()
            .or_else(|| {
                PrimitiveDateTime::parse(text, &sqlite_fraction)
                    .or_else(|_| PrimitiveDateTime::parse(text, &sqlite))
                    .ok()
                    .map(PrimitiveDateTime::assume_utc)
            })?;
        let ms = dt.unix_timestamp_nanos().div_euclid(1_000_000);
        i64::try_from(ms).ok().map(Self)
    }

    /// Normalizes a JSON revision value.
    ///
    /// `Ok(None)` for `null`.
    pub fn from_json(value: &Value) -> Result<Option<Self>, InvalidRevision> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) => Self::parse(s).map(Some).ok_or(InvalidRevision),
            Value::Number(n) => {
                if let Some(ms) = n.as_i64() {
                    Ok(Some(Self(ms)))
                } else {
                    // Fractional epoch values are accepted and truncated to ms.
                    n.as_f64()
                        .filter(|f| f.is_finite() && f.abs() < 9.0e15)
                        .map(|f| Some(Self(f.trunc() as i64)))
                        .ok_or(InvalidRevision)
                }
            }
            _ => Err(InvalidRevision),
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso())
    }
}

impl Serialize for Revision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso())
    }
}

impl<'de> Deserialize<'de> for Revision {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match Revision::from_json(&value) {
            Ok(Some(rev)) => Ok(rev),
            _ => Err(serde::de::Error::custom("invalid revision")),
        }
    }
}

/// Tolerant equality between an expected and a current revision.
///
/// Both sides are already millisecond-normalized, so bigint and timestamp
/// stores compare equal for the same instant. `None` matches only `None`.
pub fn is_record_state_revision_match(expected: Option<Revision>, current: Option<Revision>) -> bool {
    expected == current
}

/// Current wall clock in epoch milliseconds.
pub fn now_ms() -> EpochMs {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(nanos).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn iso_round_trip_keeps_milliseconds() {
        let rev = Revision::from_epoch_ms(1_760_688_930_123);
        let iso = rev.to_iso();
        assert_eq!(iso, "2025-10-17T08:15:30.123Z");
        assert_eq!(Revision::parse(&iso), Some(rev));
    }

    #[test]
    fn parse_truncates_sub_millisecond_precision() {
        let micro = Revision::parse("2025-10-17T08:15:30.123456+00:00").expect("parse");
        assert_eq!(micro.epoch_ms(), 1_760_688_930_123);
        let offset = Revision::parse("2025-10-17T10:15:30.123+02:00").expect("parse");
        assert_eq!(offset, micro);
    }

    #[test]
    fn sqlite_datetime_text_is_read_as_utc() {
        let whole = Revision::parse("2025-10-17 08:15:30").expect("parse");
        assert_eq!(whole.epoch_ms(), 1_760_688_930_000);
        let fraction = Revision::parse("2025-10-17 08:15:30.123").expect("parse");
        assert_eq!(fraction.epoch_ms(), 1_760_688_930_123);
        assert_eq!(Revision::parse("2025-10-17"), None);
    }

    #[test]
    fn json_forms_normalize() {
        assert_eq!(Revision::from_json(&json!(null)), Ok(None));
        assert_eq!(Revision::from_json(&json!(42)), Ok(Some(Revision::from_epoch_ms(42))));
        assert_eq!(Revision::from_json(&json!("42")), Ok(Some(Revision::from_epoch_ms(42))));
        assert!(Revision::from_json(&json!("yesterday")).is_err());
        assert!(Revision::from_json(&json!({"at": 1})).is_err());
        assert!(Revision::from_json(&json!(true)).is_err());
    }

    #[test]
    fn match_requires_both_sides_equal() {
        let a = Some(Revision::from_epoch_ms(5));
        assert!(is_record_state_revision_match(a, a));
        assert!(is_record_state_revision_match(None, None));
        assert!(!is_record_state_revision_match(None, a));
        assert!(!is_record_state_revision_match(a, None));
    }
}
