use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, IgnoredAny, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};

use promsource_common::time::time_from_float;

/// Parses a sample value as sent by the backend. Floats travel as strings so that `NaN`
/// and the infinities survive JSON.
pub fn parse_sample_value(s: &str) -> Result<f64, std::num::ParseFloatError> {
    match s {
        "NaN" => Ok(f64::NAN),
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        _ => s.parse(),
    }
}

/// A `[<unix seconds>, "<value>"]` pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SamplePair {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl<'de> Deserialize<'de> for SamplePair {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PairVisitor;

        impl<'de> Visitor<'de> for PairVisitor {
            type Value = SamplePair;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a [timestamp, value] pair")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<SamplePair, A::Error> {
                let ts: f64 = seq
                    .next_element()?
                    .ok_or_else(|| <A::Error as de::Error>::invalid_length(0, &self))?;
                let raw: String = seq
                    .next_element()?
                    .ok_or_else(|| <A::Error as de::Error>::invalid_length(1, &self))?;
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                let value = parse_sample_value(&raw).map_err(|_| {
                    <A::Error as de::Error>::custom(format!("invalid sample value {raw:?}"))
                })?;
                Ok(SamplePair {
                    timestamp: time_from_float(ts),
                    value,
                })
            }
        }

        deserializer.deserialize_seq(PairVisitor)
    }
}

/// A `[<unix seconds>, "<text>"]` pair of a `string` result.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StringPair {
    pub timestamp: DateTime<Utc>,
    pub value: String,
}

impl<'de> Deserialize<'de> for StringPair {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (ts, value) = <(f64, String)>::deserialize(deserializer)?;
        Ok(StringPair {
            timestamp: time_from_float(ts),
            value,
        })
    }
}
