use std::time::Duration;

use promsource_common::duration::parse_interval;

use crate::interval::calculator::{calculate, calculate_safe, SAFE_RESOLUTION};
use crate::interval::variables::{
    calculate_rate_interval, interpolate_variables, is_rate_interval_variable,
    is_variable_interval,
};
use crate::runtime_error::{RuntimeError, RuntimeResult};
use crate::types::{DataQuery, Query, QueryModel};

const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(15);

/// Decodes the panel payload of `query` and resolves its step and template variables.
///
/// Queries coming from alert evaluation never fetch exemplars.
pub fn parse_query(
    query: &DataQuery,
    scrape_interval: &str,
    from_alert: bool,
) -> RuntimeResult<Query> {
    let mut model: QueryModel = serde_json::from_slice(&query.json)
        .map_err(|e| RuntimeError::MalformedQuery(e.to_string()))?;

    let step = calculate_step(&model, scrape_interval, query)?;
    let span = query.time_range.span();
    let expr = interpolate_variables(
        &model.expr,
        query.interval,
        step,
        &model.interval,
        scrape_interval,
        span,
    );

    // Saved queries from before the range/instant switches existed.
    if !model.instant && !model.range {
        model.range = true;
    }
    if from_alert {
        model.exemplar = false;
    }

    Ok(Query {
        expr,
        step,
        legend_format: model.legend_format,
        start: query.time_range.from,
        end: query.time_range.to,
        ref_id: query.ref_id.clone(),
        instant: model.instant,
        range: model.range,
        exemplar: model.exemplar,
        utc_offset_sec: model.utc_offset_sec,
        format: model.format,
    })
}

/// Effective step of a query: the larger of the panel interval and the safe interval,
/// either widened to a rate window or multiplied by the interval factor.
pub fn calculate_step(
    model: &QueryModel,
    scrape_interval: &str,
    query: &DataQuery,
) -> RuntimeResult<Duration> {
    let requested = if is_variable_interval(&model.interval) {
        ""
    } else {
        model.interval.as_str()
    };
    let min_interval = min_interval(
        scrape_interval,
        requested,
        model.interval_ms,
        DEFAULT_MIN_INTERVAL,
    )?;

    let span = query.time_range.span();
    let calculated = calculate(span, min_interval, query.max_data_points);
    let safe = calculate_safe(span, SAFE_RESOLUTION);
    let adjusted = calculated.max(safe);

    if is_rate_interval_variable(&model.interval) {
        return Ok(calculate_rate_interval(adjusted, scrape_interval));
    }
    let factor = if model.interval_factor > 0.0 {
        model.interval_factor
    } else {
        1.0
    };
    Ok(adjusted.mul_f64(factor))
}

/// Lower bound for the step: the query interval, then `interval_ms`, then the datasource
/// scrape interval and finally `default`.
pub fn min_interval(
    scrape_interval: &str,
    query_interval: &str,
    interval_ms: f64,
    default: Duration,
) -> RuntimeResult<Duration> {
    let query_interval = if query_interval == "0s" {
        ""
    } else {
        query_interval
    };
    if query_interval.is_empty() && interval_ms > 0.0 {
        return Ok(Duration::from_millis(interval_ms as u64));
    }
    let interval = if query_interval.is_empty() {
        scrape_interval
    } else {
        query_interval
    };
    if interval.is_empty() {
        return Ok(default);
    }
    Ok(parse_interval(interval)?)
}
