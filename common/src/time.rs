use std::time::Duration;

use chrono::{DateTime, Utc};

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Rounds `t` down to a multiple of `step`, shifted by `offset_secs` so that alignment follows
/// the caller's UTC offset. Backends cache range queries per step, so start and end are always
/// aligned the same way.
pub fn align_time(t: DateTime<Utc>, step: Duration, offset_secs: i64) -> DateTime<Utc> {
    let step_nanos = step.as_nanos() as i128;
    if step_nanos == 0 {
        return t;
    }
    let offset_nanos = i128::from(offset_secs) * NANOS_PER_SEC;
    let t_nanos = i128::from(t.timestamp()) * NANOS_PER_SEC + i128::from(t.timestamp_subsec_nanos());
    let aligned = (t_nanos + offset_nanos).div_euclid(step_nanos) * step_nanos - offset_nanos;
    from_unix_nanos(aligned).unwrap_or(t)
}

fn from_unix_nanos(nanos: i128) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(nanos.div_euclid(NANOS_PER_SEC)).ok()?;
    let subsec = nanos.rem_euclid(NANOS_PER_SEC) as u32;
    DateTime::from_timestamp(secs, subsec)
}

/// Converts a floating point unix timestamp in seconds (as used on the Prometheus wire
/// format) to a timestamp with millisecond precision.
pub fn time_from_float(secs: f64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64).unwrap_or_default()
}

/// Parses a nanosecond epoch string such as `1645030246277587968`.
pub fn time_from_nanos_str(s: &str) -> Option<DateTime<Utc>> {
    if s.len() < 19 || (s.len() == 19 && s.starts_with('1')) {
        if let Ok(ns) = s.parse::<i64>() {
            return Some(DateTime::from_timestamp_nanos(ns));
        }
    }
    if s.len() <= 10 || !s.is_char_boundary(10) {
        return None;
    }
    let secs: i64 = s[..10].parse().ok()?;
    let nanos: u32 = s[10..].parse().ok()?;
    DateTime::from_timestamp(secs, nanos)
}

/// Unix epoch seconds with fractional sub-second precision.
pub fn epoch_seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp() as f64 + f64::from(t.timestamp_subsec_nanos()) / 1e9
}

/// Fixed point rendering of [`epoch_seconds`], e.g. `1664816825.005`. Never uses exponent
/// notation.
pub fn format_epoch_seconds(t: DateTime<Utc>) -> String {
    epoch_seconds(t).to_string()
}
