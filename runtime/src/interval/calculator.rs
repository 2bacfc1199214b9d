use std::time::Duration;

/// Number of points a panel is assumed to render when the caller gives no hint.
pub const DEFAULT_RESOLUTION: i64 = 1500;
/// Upper bound on the points a single range query may return.
pub const SAFE_RESOLUTION: i64 = 11000;

const SEC: u64 = 1_000;
const MIN: u64 = 60 * SEC;
const HOUR: u64 = 60 * MIN;
const DAY: u64 = 24 * HOUR;

/// (inclusive upper bound, rounded value), both in milliseconds.
static ROUNDING_TABLE: [(u64, u64); 29] = [
    (10, 1),
    (15, 10),
    (35, 20),
    (75, 50),
    (150, 100),
    (350, 200),
    (750, 500),
    (1_500, SEC),
    (3_500, 2 * SEC),
    (7_500, 5 * SEC),
    (12_500, 10 * SEC),
    (17_500, 15 * SEC),
    (25_000, 20 * SEC),
    (45_000, 30 * SEC),
    (90_000, MIN),
    (210_000, 2 * MIN),
    (450_000, 5 * MIN),
    (750_000, 10 * MIN),
    (1_050_000, 15 * MIN),
    (1_500_000, 20 * MIN),
    (2_700_000, 30 * MIN),
    (5_400_000, HOUR),
    (9_000_000, 2 * HOUR),
    (16_200_000, 3 * HOUR),
    (32_400_000, 6 * HOUR),
    (86_400_000, 12 * HOUR),
    (172_800_000, DAY),
    (604_800_000, DAY),
    (1_814_400_000, 7 * DAY),
];

/// Rounds an interval to a human friendly value, e.g. `115s` becomes `2m`.
pub fn round_interval(interval: Duration) -> Duration {
    let nanos = interval.as_nanos();
    for (bound, rounded) in ROUNDING_TABLE.iter() {
        if nanos <= u128::from(*bound) * 1_000_000 {
            return Duration::from_millis(*rounded);
        }
    }
    if nanos < u128::from(3_628_800 * SEC) * 1_000_000 {
        Duration::from_millis(30 * DAY)
    } else {
        Duration::from_millis(365 * DAY)
    }
}

/// Interval giving roughly `max_data_points` points over `span`, never below `min_interval`.
pub fn calculate(span: Duration, min_interval: Duration, max_data_points: i64) -> Duration {
    let resolution = if max_data_points > 0 {
        max_data_points
    } else {
        DEFAULT_RESOLUTION
    };
    let calculated = span / clamp_resolution(resolution);
    if calculated < min_interval {
        return min_interval;
    }
    round_interval(calculated)
}

/// Smallest interval that keeps a query over `span` below `safe_resolution` points.
pub fn calculate_safe(span: Duration, safe_resolution: i64) -> Duration {
    round_interval(span / clamp_resolution(safe_resolution))
}

fn clamp_resolution(resolution: i64) -> u32 {
    u32::try_from(resolution.max(1)).unwrap_or(u32::MAX)
}
