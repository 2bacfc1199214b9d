use std::fmt;

use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserializer;
use serde_json::value::RawValue;
use serde_json::Value;
use tracing::{debug, trace};

use crate::decoder::array::ArrayDataVisitor;
use crate::decoder::series::{ScalarVisitor, SeriesKind, SeriesListVisitor, StringVisitor};
use crate::decoder::streams::StreamsVisitor;
use crate::runtime_error::{RuntimeError, RuntimeResult};
use crate::types::Frame;

/// Everything read from the top level of a response body.
#[derive(Debug)]
pub(crate) struct DecodedResponse {
    pub status: Option<String>,
    pub data: RuntimeResult<Vec<Frame>>,
    pub error: Option<String>,
    pub error_type: Option<String>,
    pub warnings: Vec<String>,
    pub infos: Vec<String>,
}

impl Default for DecodedResponse {
    fn default() -> Self {
        Self {
            status: None,
            data: Ok(vec![]),
            error: None,
            error_type: None,
            warnings: vec![],
            infos: vec![],
        }
    }
}

pub(crate) struct ResponseSeed;

impl<'de> DeserializeSeed<'de> for ResponseSeed {
    type Value = DecodedResponse;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for ResponseSeed {
    type Value = DecodedResponse;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a response object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<DecodedResponse, A::Error> {
        let mut response = DecodedResponse::default();
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "status" => response.status = map.next_value()?,
                "data" => response.data = map.next_value_seed(DataSeed)?,
                "error" => response.error = map.next_value()?,
                "errorType" => response.error_type = map.next_value()?,
                "warnings" => {
                    response.warnings = map.next_value::<Option<Vec<String>>>()?.unwrap_or_default()
                }
                "infos" => {
                    response.infos = map.next_value::<Option<Vec<String>>>()?.unwrap_or_default()
                }
                _ => {
                    debug!(key = %key, "skipping unknown response field");
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(response)
    }
}

/// `data` is either an object carrying `resultType` and `result`, or a bare array.
struct DataSeed;

impl<'de> DeserializeSeed<'de> for DataSeed {
    type Value = RuntimeResult<Vec<Frame>>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for DataSeed {
    type Value = RuntimeResult<Vec<Frame>>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object or an array")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(Ok(vec![]))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<Self::Value, A::Error> {
        ArrayDataVisitor.visit_seq(seq).map(Ok)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut result_type: Option<String> = None;
        // `result` seen before `resultType`, kept verbatim until the type is known.
        let mut pending: Option<Box<RawValue>> = None;
        let mut outcome: RuntimeResult<Vec<Frame>> = Ok(vec![]);
        let mut stats: Option<Value> = None;

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "resultType" => {
                    let t: String = map.next_value()?;
                    if let Some(raw) = pending.take() {
                        trace!(result_type = %t, "decoding buffered result");
                        let mut de = serde_json::Deserializer::from_str(raw.get());
                        outcome = ResultSeed { result_type: &t }
                            .deserialize(&mut de)
                            .map_err(<A::Error as de::Error>::custom)?;
                    }
                    result_type = Some(t);
                }
                "result" => match result_type.as_deref() {
                    Some(t) => outcome = map.next_value_seed(ResultSeed { result_type: t })?,
                    None => pending = Some(map.next_value()?),
                },
                "stats" => stats = Some(map.next_value()?),
                _ => {
                    trace!(key = %key, "skipping data field");
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        if let (Ok(frames), Some(stats)) = (outcome.as_mut(), stats) {
            if let Some(first) = frames.first_mut() {
                first.set_custom("stats", stats);
            }
        }
        Ok(outcome)
    }
}

struct ResultSeed<'a> {
    result_type: &'a str,
}

impl<'de, 'a> DeserializeSeed<'de> for ResultSeed<'a> {
    type Value = RuntimeResult<Vec<Frame>>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        let frames = match self.result_type {
            "matrix" => deserializer.deserialize_seq(SeriesListVisitor(SeriesKind::Matrix))?,
            "vector" => deserializer.deserialize_seq(SeriesListVisitor(SeriesKind::Vector))?,
            "streams" => deserializer.deserialize_seq(StreamsVisitor)?,
            "scalar" => deserializer.deserialize_seq(ScalarVisitor)?,
            "string" => deserializer.deserialize_seq(StringVisitor)?,
            other => {
                deserializer.deserialize_ignored_any(IgnoredAny)?;
                return Ok(Err(RuntimeError::UnknownResultType(other.to_string())));
            }
        };
        Ok(Ok(frames))
    }
}
