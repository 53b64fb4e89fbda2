//! Time normalization and hour-bucket derivation.
//!
//! Every timestamp is first interpreted as a UTC instant (naive values are
//! assumed to already be UTC), then shifted by one fixed configured offset,
//! and truncated to a `(date, hour)` bucket. The same offset is applied to
//! every timestamp source in a run, including the outcomes table, so all
//! aggregates share one "local hour" partition.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::frame::{Frame, Value};

use super::{PipelineError, PipelineResult};

/// Name of the derived calendar-date column (`YYYY-MM-DD` text).
pub const DATE_COL: &str = "date";
/// Name of the derived hour-of-day column (integer 0–23).
pub const HOUR_COL: &str = "hour";

/// A fixed offset from UTC, e.g. `+05:30`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct UtcOffset {
    minutes: i32,
}

impl UtcOffset {
    /// Offset of `hours` and `minutes`; the sign of `hours` applies to the
    /// whole offset (`new(-8, 0)` is `-08:00`, `new(5, 30)` is `+05:30`).
    pub fn new(hours: i32, minutes: i32) -> UtcOffset {
        let sign = if hours < 0 { -1 } else { 1 };
        UtcOffset {
            minutes: sign * (hours.abs() * 60 + minutes.abs()),
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.minutes))
    }
}

impl std::str::FromStr for UtcOffset {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || PipelineError::BadOffset(s.to_string());
        let (sign, rest) = match s.as_bytes().first() {
            Some(b'+') => (1, &s[1..]),
            Some(b'-') => (-1, &s[1..]),
            _ => return Err(bad()),
        };
        let (h, m) = rest.split_once(':').ok_or_else(bad)?;
        // digits only past the sign, so "+-05:30" cannot sneak through parse()
        let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        if !digits(h) || !digits(m) {
            return Err(bad());
        }
        let hours: i32 = h.parse().map_err(|_| bad())?;
        let minutes: i32 = m.parse().map_err(|_| bad())?;
        if hours > 14 || minutes > 59 {
            return Err(bad());
        }
        Ok(UtcOffset {
            minutes: sign * (hours * 60 + minutes),
        })
    }
}

impl TryFrom<String> for UtcOffset {
    type Error = PipelineError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl std::fmt::Display for UtcOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.minutes < 0 { '-' } else { '+' };
        let abs = self.minutes.abs();
        write!(f, "{sign}{:02}:{:02}", abs / 60, abs % 60)
    }
}

/// What to do with values that cannot be parsed as timestamps.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampPolicy {
    /// Give the row null `date`/`hour` cells. Grouping skips rows with null
    /// key parts, so the row is excluded from every aggregate — the same
    /// observable behavior as a NaT group key being dropped.
    #[default]
    Null,
    /// Abort the run on the first unparseable value.
    Fail,
}

/// Parse one cell as a UTC instant.
///
/// Accepts RFC 3339 (offset or `Z`), naive `YYYY-MM-DD[T ]HH:MM:SS[.fff]`
/// (assumed UTC), and integer epoch seconds or milliseconds (values at or
/// above 10^11 are read as milliseconds).
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Str(s) => parse_timestamp_str(s.trim()),
        Value::Int(n) => {
            // unsigned_abs: i64::MIN must degrade to out-of-range, not overflow
            let ms = if n.unsigned_abs() >= 100_000_000_000 { *n } else { n * 1000 };
            Utc.timestamp_millis_opt(ms).single()
        }
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Derive `date` and `hour` columns from `ts_column` shifted by `offset`.
///
/// The input frame must not already carry `date`/`hour` columns; each source
/// is bucketed exactly once per run.
pub fn with_hour_buckets(
    frame: &Frame,
    ts_column: &str,
    offset: UtcOffset,
    policy: TimestampPolicy,
) -> PipelineResult<Frame> {
    let col = frame.column_index(ts_column)?;
    let shift = offset.as_duration();

    let mut dates = Vec::with_capacity(frame.n_rows());
    let mut hours = Vec::with_capacity(frame.n_rows());
    let mut unparsed = 0usize;

    for (row_no, row) in frame.rows().enumerate() {
        match parse_timestamp(&row[col]) {
            Some(instant) => {
                let local = (instant + shift).naive_utc();
                dates.push(Value::Str(local.format("%Y-%m-%d").to_string()));
                hours.push(Value::Int(i64::from(local.hour())));
            }
            None => {
                if policy == TimestampPolicy::Fail {
                    return Err(PipelineError::MalformedTimestamp {
                        row: row_no,
                        value: row[col].to_string(),
                    });
                }
                unparsed += 1;
                dates.push(Value::Null);
                hours.push(Value::Null);
            }
        }
    }

    if unparsed > 0 {
        debug!(
            unparsed,
            total = frame.n_rows(),
            column = ts_column,
            "timestamps excluded from bucketing"
        );
    }

    Ok(frame.with_columns(vec![
        (DATE_COL.to_string(), dates),
        (HOUR_COL.to_string(), hours),
    ])?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ts_frame(values: &[Value]) -> Frame {
        let mut f = Frame::new(["event_time"]).unwrap();
        for v in values {
            f.push_row(vec![v.clone()]).unwrap();
        }
        f
    }

    #[test]
    fn offset_parse_and_display() {
        let off: UtcOffset = "+05:30".parse().unwrap();
        assert_eq!(off, UtcOffset::new(5, 30));
        assert_eq!(off.to_string(), "+05:30");
        let neg: UtcOffset = "-08:00".parse().unwrap();
        assert_eq!(neg.as_duration(), Duration::minutes(-480));
    }

    #[test]
    fn offset_rejects_garbage() {
        for bad in ["", "5:30", "+5", "+05:99", "+25:00", "+aa:bb", "+-05:30", "--08:00", "+:30"] {
            assert!(bad.parse::<UtcOffset>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn ist_offset_crosses_hour_and_date() {
        // 2024-01-01T22:45Z + 05:30 = 2024-01-02 04:15 local
        let f = ts_frame(&[Value::Str("2024-01-01T22:45:00Z".into())]);
        let out =
            with_hour_buckets(&f, "event_time", UtcOffset::new(5, 30), TimestampPolicy::Fail)
                .unwrap();
        assert_eq!(out.get(0, DATE_COL).unwrap(), &Value::Str("2024-01-02".into()));
        assert_eq!(out.get(0, HOUR_COL).unwrap(), &Value::Int(4));
    }

    #[test]
    fn naive_timestamps_are_read_as_utc() {
        let f = ts_frame(&[
            Value::Str("2024-01-01 10:15:00".into()),
            Value::Str("2024-01-01T10:15:00Z".into()),
        ]);
        let out =
            with_hour_buckets(&f, "event_time", UtcOffset::new(5, 30), TimestampPolicy::Fail)
                .unwrap();
        assert_eq!(out.get(0, HOUR_COL).unwrap(), out.get(1, HOUR_COL).unwrap());
        assert_eq!(out.get(0, DATE_COL).unwrap(), out.get(1, DATE_COL).unwrap());
    }

    #[test]
    fn epoch_seconds_and_millis() {
        // 2025-06-15 14:00:00 UTC
        let secs = Value::Int(1_749_996_000);
        let millis = Value::Int(1_749_996_000_000);
        assert_eq!(parse_timestamp(&secs), parse_timestamp(&millis));
        assert!(parse_timestamp(&secs).is_some());
    }

    #[test]
    fn extreme_epoch_values_are_unparseable_not_fatal() {
        for n in [i64::MIN, i64::MAX] {
            assert_eq!(parse_timestamp(&Value::Int(n)), None, "accepted {n}");
        }
    }

    #[test]
    fn bucketing_is_deterministic() {
        let f = ts_frame(&[Value::Str("2024-03-09T23:59:59+02:00".into())]);
        let a = with_hour_buckets(&f, "event_time", UtcOffset::new(5, 30), TimestampPolicy::Fail)
            .unwrap();
        let b = with_hour_buckets(&f, "event_time", UtcOffset::new(5, 30), TimestampPolicy::Fail)
            .unwrap();
        assert_eq!(a.get(0, DATE_COL).unwrap(), b.get(0, DATE_COL).unwrap());
        assert_eq!(a.get(0, HOUR_COL).unwrap(), b.get(0, HOUR_COL).unwrap());
    }

    #[test]
    fn null_policy_yields_null_bucket() {
        let f = ts_frame(&[Value::Str("not a time".into()), Value::Null]);
        let out =
            with_hour_buckets(&f, "event_time", UtcOffset::new(0, 0), TimestampPolicy::Null)
                .unwrap();
        assert_eq!(out.n_rows(), 2);
        assert_eq!(out.get(0, DATE_COL).unwrap(), &Value::Null);
        assert_eq!(out.get(1, HOUR_COL).unwrap(), &Value::Null);
    }

    #[test]
    fn fail_policy_aborts_with_row_context() {
        let f = ts_frame(&[
            Value::Str("2024-01-01T00:00:00Z".into()),
            Value::Str("garbage".into()),
        ]);
        let err =
            with_hour_buckets(&f, "event_time", UtcOffset::new(0, 0), TimestampPolicy::Fail)
                .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedTimestamp { row: 1, .. }));
    }
}
