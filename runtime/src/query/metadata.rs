use std::sync::LazyLock;

use itertools::Itertools;
use regex::{Captures, Regex};

use promsource_common::duration::GoDuration;
use promsource_common::label::{Labels, METRIC_NAME_LABEL};

use crate::types::{Field, FieldValues, Frame, Query, VALUE_FIELD_NAME};

pub const LEGEND_FORMAT_AUTO: &str = "__auto";

const EMPTY_LEGEND: &str = "{}";

static LEGEND_FORMAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(.+?)\s*\}\}").unwrap());

pub fn executed_query_string(query: &Query) -> String {
    format!("Expr: {}\nStep: {}", query.expr, GoDuration(query.step))
}

/// Attaches display names, the step interval and the executed query string to the frames
/// of one fetch. Frames without any field get a placeholder so the query string has a
/// place to live.
pub fn add_metadata(frames: &mut Vec<Frame>, query: &Query, wide: bool, placeholder: bool) {
    if frames.is_empty() && placeholder {
        frames.push(Frame::default());
    }
    let step_ms = query.step.as_secs_f64() * 1000.0;

    for (i, frame) in frames.iter_mut().enumerate() {
        frame.ref_id.clone_from(&query.ref_id);
        if i == 0 {
            frame.meta.executed_query_string = Some(executed_query_string(query));
        }
        if frame.is_exemplar() {
            continue;
        }

        let time_field = frame.fields.iter_mut().find(|f| f.values.is_time());
        if let Some(time_field) = time_field {
            time_field.config_mut().interval_ms = Some(step_ms);
        }

        if wide {
            for field in frame.fields.iter_mut().filter(|f| is_value_field(f)) {
                let name = get_name(query, field);
                if !name.is_empty() {
                    field.config_mut().display_name_from_ds = Some(name);
                }
            }
            continue;
        }

        let Some(value_field) = frame.fields.get_mut(1) else {
            continue;
        };
        if !is_value_field(value_field) {
            continue;
        }
        let name = get_name(query, value_field);
        if !name.is_empty() {
            value_field.config_mut().display_name_from_ds = Some(name.clone());
        }
        frame.name = name;
    }
}

fn is_value_field(field: &Field) -> bool {
    matches!(
        field.values,
        FieldValues::Float(_) | FieldValues::NullableFloat(_)
    )
}

/// Display name of a series: the legend template with `{{label}}` tokens substituted, or
/// the metric name with its labels. An empty name leaves naming to the consumer.
pub fn get_name(query: &Query, field: &Field) -> String {
    let labels = &field.labels;
    let legend = if query.legend_format == LEGEND_FORMAT_AUTO {
        if !labels.is_empty() || field.name != VALUE_FIELD_NAME {
            return String::new();
        }
        metric_name_from_labels(field)
    } else if !query.legend_format.is_empty() {
        format_legend(&query.legend_format, field)
    } else {
        metric_name_from_labels(field)
    };

    if legend == EMPTY_LEGEND {
        return query.expr.clone();
    }
    legend
}

/// Substitutes every `{{name}}` token of `template`. Missing labels become empty.
pub fn format_legend(template: &str, field: &Field) -> String {
    LEGEND_FORMAT_RE
        .replace_all(template, |caps: &Captures| {
            label_value(field, &caps[1]).unwrap_or_default().to_string()
        })
        .into_owned()
}

fn label_value<'a>(field: &'a Field, name: &str) -> Option<&'a str> {
    if name == METRIC_NAME_LABEL && field.name != VALUE_FIELD_NAME {
        return Some(field.name.as_str());
    }
    field.labels.get(name).map(String::as_str)
}

/// `name{k="v", ...}` with the label pairs in name order. The metric name comes from the
/// field name unless that is the generic value column.
pub fn metric_name_from_labels(field: &Field) -> String {
    let mut labels = field.labels.clone();
    let name = labels
        .remove(METRIC_NAME_LABEL)
        .or_else(|| (field.name != VALUE_FIELD_NAME).then(|| field.name.clone()))
        .unwrap_or_default();
    if labels.is_empty() && !name.is_empty() {
        return name;
    }
    format!("{name}{{{}}}", format_label_pairs(&labels))
}

fn format_label_pairs(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .join(", ")
}
