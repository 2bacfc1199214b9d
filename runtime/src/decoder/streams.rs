use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};

use promsource_common::label::Labels;
use promsource_common::time::time_from_nanos_str;

use crate::types::{Field, FieldValues, Frame, FrameType, TIME_FIELD_NAME};

pub const LABELS_FIELD_NAME: &str = "__labels";
pub const LINE_FIELD_NAME: &str = "Line";
pub const TS_FIELD_NAME: &str = "TS";

#[derive(Default)]
struct StreamsBuilder {
    labels: Vec<String>,
    times: Vec<DateTime<Utc>>,
    lines: Vec<String>,
    ts: Vec<String>,
}

impl StreamsBuilder {
    fn into_frame(self) -> Frame {
        Frame::new(
            "",
            vec![
                Field::string(LABELS_FIELD_NAME, self.labels),
                Field::new(TIME_FIELD_NAME, FieldValues::Time(self.times)),
                Field::string(LINE_FIELD_NAME, self.lines),
                Field::string(TS_FIELD_NAME, self.ts),
            ],
        )
        .with_type(FrameType::LogLines)
        .with_result_type("streams")
    }
}

/// Labels attached to a single line by the categorize-labels encoding.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CategorizedLabels {
    structured_metadata: Labels,
    parsed: Labels,
}

/// `["<unix nanos>", "<line>", {categorized labels}?]`
struct StreamValue {
    ts: String,
    line: String,
    extra: Option<CategorizedLabels>,
}

impl<'de> Deserialize<'de> for StreamValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = StreamValue;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a [timestamp, line] entry")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<StreamValue, A::Error> {
                let ts: String = seq
                    .next_element()?
                    .ok_or_else(|| <A::Error as de::Error>::invalid_length(0, &self))?;
                let line: String = seq
                    .next_element()?
                    .ok_or_else(|| <A::Error as de::Error>::invalid_length(1, &self))?;
                let extra = seq.next_element()?;
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                Ok(StreamValue { ts, line, extra })
            }
        }

        deserializer.deserialize_seq(ValueVisitor)
    }
}

/// Visits the `result` array of a streams response. All streams end up in one frame.
pub(crate) struct StreamsVisitor;

impl<'de> Visitor<'de> for StreamsVisitor {
    type Value = Vec<Frame>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of streams")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<Frame>, A::Error> {
        let mut builder = StreamsBuilder::default();
        while seq
            .next_element_seed(StreamSeed {
                builder: &mut builder,
            })?
            .is_some()
        {}
        Ok(vec![builder.into_frame()])
    }
}

struct StreamSeed<'a> {
    builder: &'a mut StreamsBuilder,
}

impl<'de, 'a> DeserializeSeed<'de> for StreamSeed<'a> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, 'a> Visitor<'de> for StreamSeed<'a> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a stream object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        let mut labels = Labels::new();
        let mut values: Vec<StreamValue> = vec![];
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "stream" => labels = map.next_value()?,
                "values" => values = map.next_value()?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        let stream_json =
            serde_json::to_string(&labels).map_err(<A::Error as de::Error>::custom)?;
        for value in values {
            let t = time_from_nanos_str(&value.ts).ok_or_else(|| {
                <A::Error as de::Error>::custom(format!("invalid timestamp {:?}", value.ts))
            })?;
            let row_labels = match value.extra {
                Some(extra) if !extra.structured_metadata.is_empty() || !extra.parsed.is_empty() => {
                    let mut merged = labels.clone();
                    merged.extend(extra.structured_metadata);
                    merged.extend(extra.parsed);
                    serde_json::to_string(&merged).map_err(<A::Error as de::Error>::custom)?
                }
                _ => stream_json.clone(),
            };
            self.builder.labels.push(row_labels);
            self.builder.times.push(t);
            self.builder.lines.push(value.line);
            self.builder.ts.push(value.ts);
        }
        Ok(())
    }
}
