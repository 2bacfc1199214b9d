use std::fmt;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use snafu::{ensure, OptionExt, Snafu};

const NAMES: [&str; 6] = ["y", "d", "h", "m", "s", "ms"];
const SIZES_MS: [u128; 6] = [86_400_000 * 365, 86_400_000, 3_600_000, 60_000, 1_000, 1];

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;
const NANOS_PER_DAY: u128 = 86_400 * NANOS_PER_SEC;

pub type DurationResult<T> = Result<T, DurationError>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum DurationError {
    #[snafu(display("invalid duration \"{input}\""))]
    InvalidDuration { input: String },

    #[snafu(display("unknown unit \"{unit}\" in duration \"{input}\""))]
    UnknownUnit { unit: String, input: String },

    #[snafu(display("negative duration \"{input}\" is not supported"))]
    NegativeDuration { input: String },
}

/// Parses an interval string as entered on a query or datasource, e.g. `15s`, `1m30s`,
/// `<5m>`, `2d` or a bare number of seconds such as `30`.
pub fn parse_interval(interval: &str) -> DurationResult<Duration> {
    let formatted = interval.replacen('<', "", 1).replacen('>', "", 1);
    if !formatted.is_empty() && formatted.bytes().all(|b| b.is_ascii_digit()) {
        return parse_duration(&format!("{formatted}s"));
    }
    parse_duration(&formatted)
}

/// Parses a duration expressed either as a single calendar unit (`3d`, `1w`, `2M`, `1y`)
/// or as a sequence of decimal numbers with time units (`1h15m`, `1.5s`, `300ms`).
///
/// Months are treated as 30 days and years as 365 days.
pub fn parse_duration(input: &str) -> DurationResult<Duration> {
    if let Some(d) = parse_calendar_duration(input) {
        return Ok(d);
    }

    let mut s = input;
    if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }
    ensure!(!s.starts_with('-'), NegativeDurationSnafu { input });
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    ensure!(!s.is_empty(), InvalidDurationSnafu { input });

    let mut total: u128 = 0;
    while !s.is_empty() {
        let number_len = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let number = &s[..number_len];
        ensure!(
            !number.is_empty() && number != "." && number.matches('.').count() <= 1,
            InvalidDurationSnafu { input }
        );
        s = &s[number_len..];

        let unit_len = s
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(s.len());
        let unit = &s[..unit_len];
        s = &s[unit_len..];

        let scale = unit_scale(unit).context(UnknownUnitSnafu { unit, input })?;
        total += scale_number(number, scale).context(InvalidDurationSnafu { input })?;
    }

    let secs = u64::try_from(total / NANOS_PER_SEC).ok();
    let secs = secs.context(InvalidDurationSnafu { input })?;
    Ok(Duration::new(secs, (total % NANOS_PER_SEC) as u32))
}

fn parse_calendar_duration(input: &str) -> Option<Duration> {
    let unit = input.chars().last()?;
    let count = &input[..input.len() - unit.len_utf8()];
    if count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let days = match unit {
        'd' => 1,
        'w' => 7,
        'M' => 30,
        'y' => 365,
        _ => return None,
    };
    let count: u64 = count.parse().ok()?;
    Some(Duration::from_secs(count.checked_mul(days * 86_400)?))
}

fn unit_scale(unit: &str) -> Option<u128> {
    let scale = match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => NANOS_PER_MICRO,
        "ms" => NANOS_PER_MILLI,
        "s" => NANOS_PER_SEC,
        "m" => 60 * NANOS_PER_SEC,
        "h" => 3_600 * NANOS_PER_SEC,
        "d" => NANOS_PER_DAY,
        "w" => 7 * NANOS_PER_DAY,
        _ => return None,
    };
    Some(scale)
}

fn scale_number(number: &str, scale: u128) -> Option<u128> {
    let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut total = whole.checked_mul(scale)?;
    let mut divisor = 1_u128;
    for digit in frac.bytes() {
        divisor *= 10;
        if divisor > scale {
            break;
        }
        total += u128::from(digit - b'0') * scale / divisor;
    }
    Some(total)
}

/// Writes `d` in the most compact whole unit, e.g. `2m`, `1h`, `500ms`. Anything below a
/// millisecond is written as `1ms`.
pub fn fmt_interval(f: &mut Formatter<'_>, d: Duration) -> fmt::Result {
    let ms = d.as_millis();
    for (size, name) in SIZES_MS.iter().zip(NAMES.iter()) {
        if ms >= *size {
            return write!(f, "{}{}", ms / size, name);
        }
    }
    write!(f, "1ms")
}

pub fn format_interval(d: Duration) -> String {
    Interval(d).to_string()
}

/// Writes `d` the way Go's `time.Duration.String()` does, e.g. `2m0s`, `1h30m0s`, `1.5s`,
/// `250ms`. Backends and saved dashboards rely on this exact spelling.
pub fn fmt_go_duration(f: &mut Formatter<'_>, d: Duration) -> fmt::Result {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return write!(f, "0s");
    }
    if nanos < NANOS_PER_SEC {
        let (scale, unit) = if nanos < NANOS_PER_MICRO {
            (1, "ns")
        } else if nanos < NANOS_PER_MILLI {
            (NANOS_PER_MICRO, "µs")
        } else {
            (NANOS_PER_MILLI, "ms")
        };
        fmt_fraction(f, nanos, scale)?;
        return write!(f, "{unit}");
    }

    let total_secs = d.as_secs();
    let hours = total_secs / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    if hours > 0 {
        write!(f, "{hours}h")?;
    }
    if hours > 0 || minutes > 0 {
        write!(f, "{minutes}m")?;
    }
    let secs = u128::from(total_secs % 60) * NANOS_PER_SEC + u128::from(d.subsec_nanos());
    fmt_fraction(f, secs, NANOS_PER_SEC)?;
    write!(f, "s")
}

pub fn format_go_duration(d: Duration) -> String {
    GoDuration(d).to_string()
}

fn fmt_fraction(f: &mut Formatter<'_>, value: u128, scale: u128) -> fmt::Result {
    let whole = value / scale;
    let frac = value % scale;
    if frac == 0 {
        return write!(f, "{whole}");
    }
    let width = scale.to_string().len() - 1;
    let digits = format!("{frac:0width$}");
    write!(f, "{whole}.{}", digits.trim_end_matches('0'))
}

/// Display adapter for [`fmt_interval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval(pub Duration);

impl Display for Interval {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt_interval(f, self.0)
    }
}

/// Display adapter for [`fmt_go_duration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoDuration(pub Duration);

impl Display for GoDuration {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt_go_duration(f, self.0)
    }
}
