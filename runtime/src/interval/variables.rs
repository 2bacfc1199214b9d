use std::time::Duration;

use promsource_common::duration::{format_go_duration, format_interval, parse_interval};

pub const VAR_INTERVAL: &str = "$__interval";
pub const VAR_INTERVAL_MS: &str = "$__interval_ms";
pub const VAR_RANGE: &str = "$__range";
pub const VAR_RANGE_S: &str = "$__range_s";
pub const VAR_RANGE_MS: &str = "$__range_ms";
pub const VAR_RATE_INTERVAL: &str = "$__rate_interval";
pub const VAR_RATE_INTERVAL_MS: &str = "$__rate_interval_ms";

pub const VAR_INTERVAL_ALT: &str = "${__interval}";
pub const VAR_INTERVAL_MS_ALT: &str = "${__interval_ms}";
pub const VAR_RANGE_ALT: &str = "${__range}";
pub const VAR_RANGE_S_ALT: &str = "${__range_s}";
pub const VAR_RANGE_MS_ALT: &str = "${__range_ms}";
pub const VAR_RATE_INTERVAL_ALT: &str = "${__rate_interval}";
pub const VAR_RATE_INTERVAL_MS_ALT: &str = "${__rate_interval_ms}";

const DEFAULT_RATE_SCRAPE_INTERVAL: Duration = Duration::from_secs(15);

pub fn is_variable_interval(interval: &str) -> bool {
    matches!(
        interval,
        VAR_INTERVAL
            | VAR_INTERVAL_ALT
            | VAR_INTERVAL_MS
            | VAR_INTERVAL_MS_ALT
            | VAR_RATE_INTERVAL
            | VAR_RATE_INTERVAL_ALT
            | VAR_RATE_INTERVAL_MS
            | VAR_RATE_INTERVAL_MS_ALT
    )
}

pub fn is_rate_interval_variable(interval: &str) -> bool {
    interval == VAR_RATE_INTERVAL || interval == VAR_RATE_INTERVAL_ALT
}

fn is_interval_variable(interval: &str) -> bool {
    interval == VAR_INTERVAL || interval == VAR_INTERVAL_ALT
}

/// Window wide enough to always contain at least four scrapes, or the interval plus one
/// scrape if that is larger. An empty or unparsable scrape interval counts as 15s.
pub fn calculate_rate_interval(interval: Duration, scrape_interval: &str) -> Duration {
    let scrape = if scrape_interval.is_empty() {
        DEFAULT_RATE_SCRAPE_INTERVAL
    } else {
        parse_interval(scrape_interval).unwrap_or(DEFAULT_RATE_SCRAPE_INTERVAL)
    };
    (interval + scrape).max(scrape * 4)
}

/// Replaces the interval and range template variables in `expr`.
///
/// `query_interval` is the interval suggested by the caller, `requested_min_step` the raw
/// `interval` of the panel query and `time_range` the span of the request.
pub fn interpolate_variables(
    expr: &str,
    query_interval: Duration,
    calculated_step: Duration,
    requested_min_step: &str,
    scrape_interval: &str,
    time_range: Duration,
) -> String {
    let range_ms = time_range.as_millis();
    let range_s = (range_ms as f64 / 1000.0).round() as u128;

    let rate_interval = if is_rate_interval_variable(requested_min_step) {
        calculated_step
    } else {
        let min_step = if is_interval_variable(requested_min_step) {
            format_go_duration(calculated_step)
        } else if requested_min_step.is_empty() {
            scrape_interval.to_string()
        } else {
            requested_min_step.to_string()
        };
        calculate_rate_interval(query_interval, &min_step)
    };

    let step_ms = calculated_step.as_millis().to_string();
    let step = format_interval(calculated_step);
    let range_ms = range_ms.to_string();
    let range_s_text = range_s.to_string();
    let range = format!("{range_s}s");
    let rate_ms = rate_interval.as_millis().to_string();
    let rate = format_go_duration(rate_interval);

    // Suffixed variables go first, they share a prefix with the bare ones.
    let replacements: [(&str, &str); 14] = [
        (VAR_INTERVAL_MS, &step_ms),
        (VAR_INTERVAL, &step),
        (VAR_RANGE_MS, &range_ms),
        (VAR_RANGE_S, &range_s_text),
        (VAR_RANGE, &range),
        (VAR_RATE_INTERVAL_MS, &rate_ms),
        (VAR_RATE_INTERVAL, &rate),
        (VAR_INTERVAL_MS_ALT, &step_ms),
        (VAR_INTERVAL_ALT, &step),
        (VAR_RANGE_MS_ALT, &range_ms),
        (VAR_RANGE_S_ALT, &range_s_text),
        (VAR_RANGE_ALT, &range),
        (VAR_RATE_INTERVAL_MS_ALT, &rate_ms),
        (VAR_RATE_INTERVAL_ALT, &rate),
    ];

    let mut result = expr.to_string();
    for (variable, value) in replacements {
        if result.contains(variable) {
            result = result.replace(variable, value);
        }
    }
    result
}
