use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use serde_with::{serde_as, DefaultOnNull};

use promsource_common::time::align_time;

use crate::runtime_error::RuntimeResult;
use crate::types::Frame;

/// Requested result layout of a query.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum QueryFormat {
    #[default]
    TimeSeries,
    Table,
    Heatmap,
}

impl QueryFormat {
    fn from_name(name: &str) -> Self {
        match name {
            "table" => QueryFormat::Table,
            "heatmap" => QueryFormat::Heatmap,
            _ => QueryFormat::TimeSeries,
        }
    }

    fn from_number(n: i64) -> Self {
        match n {
            2 => QueryFormat::Table,
            3 => QueryFormat::Heatmap,
            _ => QueryFormat::TimeSeries,
        }
    }
}

impl<'de> Deserialize<'de> for QueryFormat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FormatVisitor;

        impl<'de> Visitor<'de> for FormatVisitor {
            type Value = QueryFormat;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a query format name or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<QueryFormat, E> {
                Ok(QueryFormat::from_name(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<QueryFormat, E> {
                Ok(QueryFormat::from_number(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<QueryFormat, E> {
                Ok(QueryFormat::from_number(i64::try_from(v).unwrap_or_default()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<QueryFormat, E> {
                Ok(QueryFormat::from_number(v as i64))
            }

            fn visit_bool<E: de::Error>(self, _: bool) -> Result<QueryFormat, E> {
                Ok(QueryFormat::TimeSeries)
            }

            fn visit_unit<E: de::Error>(self) -> Result<QueryFormat, E> {
                Ok(QueryFormat::TimeSeries)
            }
        }

        deserializer.deserialize_any(FormatVisitor)
    }
}

/// The query payload as stored on a dashboard panel. Older payloads may carry `null` for any
/// field, which reads as the field's default.
#[serde_as]
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryModel {
    #[serde_as(as = "DefaultOnNull")]
    pub expr: String,
    #[serde_as(as = "DefaultOnNull")]
    pub legend_format: String,
    #[serde_as(as = "DefaultOnNull")]
    pub interval: String,
    #[serde(alias = "intervalMS")]
    #[serde_as(as = "DefaultOnNull")]
    pub interval_ms: f64,
    #[serde_as(as = "DefaultOnNull")]
    pub interval_factor: f64,
    #[serde_as(as = "DefaultOnNull")]
    pub utc_offset_sec: i64,
    #[serde_as(as = "DefaultOnNull")]
    pub range: bool,
    #[serde_as(as = "DefaultOnNull")]
    pub instant: bool,
    #[serde_as(as = "DefaultOnNull")]
    pub exemplar: bool,
    pub format: QueryFormat,
    /// Older payloads carry the datasource name as a bare string.
    pub datasource: Option<serde_json::Value>,
}

/// Absolute time window requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl RequestTimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn span(&self) -> Duration {
        (self.to - self.from).to_std().unwrap_or_default()
    }
}

/// A single query of an incoming request, before the panel payload is decoded.
#[derive(Debug, Clone)]
pub struct DataQuery {
    pub ref_id: String,
    /// Raw JSON of the panel query.
    pub json: Vec<u8>,
    pub time_range: RequestTimeRange,
    /// Interval suggested by the caller for the panel width.
    pub interval: Duration,
    pub max_data_points: i64,
}

/// Start, end and step of a range query after step alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: Duration,
}

/// A fully resolved query, ready to be sent to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub expr: String,
    pub step: Duration,
    pub legend_format: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub ref_id: String,
    pub instant: bool,
    pub range: bool,
    pub exemplar: bool,
    pub utc_offset_sec: i64,
    pub format: QueryFormat,
}

impl Query {
    /// Start and end aligned to the step so that backends can reuse cached results.
    pub fn time_range(&self) -> TimeRange {
        TimeRange {
            start: align_time(self.start, self.step, self.utc_offset_sec),
            end: align_time(self.end, self.step, self.utc_offset_sec),
            step: self.step,
        }
    }
}

/// A batch of queries sharing the same caller identity.
#[derive(Debug, Clone, Default)]
pub struct QueryDataRequest {
    /// Credential bearing headers forwarded to the backend.
    pub headers: HashMap<String, String>,
    pub from_alert: bool,
    pub queries: Vec<DataQuery>,
}

/// Per query results of a batch, keyed by reference id.
#[derive(Debug, Default)]
pub struct QueryDataResponse {
    pub responses: BTreeMap<String, RuntimeResult<Vec<Frame>>>,
}

impl QueryDataResponse {
    pub fn get(&self, ref_id: &str) -> Option<&RuntimeResult<Vec<Frame>>> {
        self.responses.get(ref_id)
    }
}
