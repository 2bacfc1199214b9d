use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use promsource_common::label::Labels;

pub const TIME_FIELD_NAME: &str = "Time";
pub const VALUE_FIELD_NAME: &str = "Value";
pub const RESULT_TYPE_KEY: &str = "resultType";

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValues {
    Time(Vec<DateTime<Utc>>),
    Float(Vec<f64>),
    NullableFloat(Vec<Option<f64>>),
    String(Vec<String>),
}

impl FieldValues {
    pub fn len(&self) -> usize {
        match self {
            FieldValues::Time(v) => v.len(),
            FieldValues::Float(v) => v.len(),
            FieldValues::NullableFloat(v) => v.len(),
            FieldValues::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_time(&self) -> bool {
        matches!(self, FieldValues::Time(_))
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FieldConfig {
    /// Expected spacing of the values in milliseconds.
    pub interval_ms: Option<f64>,
    pub display_name_from_ds: Option<String>,
}

/// A named, typed column of a [Frame].
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub labels: Labels,
    pub config: Option<FieldConfig>,
    pub values: FieldValues,
}

impl Field {
    pub fn new<S: Into<String>>(name: S, values: FieldValues) -> Self {
        Self {
            name: name.into(),
            labels: Labels::new(),
            config: None,
            values,
        }
    }

    pub fn time(values: Vec<DateTime<Utc>>) -> Self {
        Self::new(TIME_FIELD_NAME, FieldValues::Time(values))
    }

    pub fn float<S: Into<String>>(name: S, values: Vec<f64>) -> Self {
        Self::new(name, FieldValues::Float(values))
    }

    pub fn string<S: Into<String>>(name: S, values: Vec<String>) -> Self {
        Self::new(name, FieldValues::String(values))
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn config_mut(&mut self) -> &mut FieldConfig {
        self.config.get_or_insert_with(FieldConfig::default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
pub enum FrameType {
    #[strum(serialize = "timeseries-multi")]
    TimeSeriesMulti,
    #[strum(serialize = "timeseries-wide")]
    TimeSeriesWide,
    #[strum(serialize = "log-lines")]
    LogLines,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum NoticeSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub severity: NoticeSeverity,
    pub text: String,
}

impl Notice {
    pub fn new<S: Into<String>>(severity: NoticeSeverity, text: S) -> Self {
        Self {
            severity,
            text: text.into(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameMeta {
    pub frame_type: Option<FrameType>,
    pub executed_query_string: Option<String>,
    pub custom: Map<String, Value>,
    pub notices: Vec<Notice>,
}

/// A columnar table. All fields of a frame have the same length.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Frame {
    pub name: String,
    pub ref_id: String,
    pub fields: Vec<Field>,
    pub meta: FrameMeta,
}

impl Frame {
    pub fn new<S: Into<String>>(name: S, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
            ..Default::default()
        }
    }

    pub fn with_result_type(mut self, result_type: &str) -> Self {
        self.set_custom(RESULT_TYPE_KEY, Value::String(result_type.to_string()));
        self
    }

    pub fn with_type(mut self, frame_type: FrameType) -> Self {
        self.meta.frame_type = Some(frame_type);
        self
    }

    pub fn set_custom(&mut self, key: &str, value: Value) {
        self.meta.custom.insert(key.to_string(), value);
    }

    pub fn result_type(&self) -> Option<&str> {
        self.meta.custom.get(RESULT_TYPE_KEY).and_then(Value::as_str)
    }

    pub fn is_exemplar(&self) -> bool {
        self.result_type() == Some("exemplar")
    }

    pub fn add_notice(&mut self, notice: Notice) {
        self.meta.notices.push(notice);
    }

    /// Number of rows, taken from the first field.
    pub fn rows(&self) -> usize {
        self.fields.first().map_or(0, Field::len)
    }

    pub fn is_rectangular(&self) -> bool {
        let rows = self.rows();
        self.fields.iter().all(|f| f.len() == rows)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}
