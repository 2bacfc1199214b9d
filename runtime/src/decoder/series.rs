use std::fmt;

use serde::de::{DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserializer;

use promsource_common::label::{Labels, METRIC_NAME_LABEL};

use crate::decoder::values::{SamplePair, StringPair};
use crate::types::{Field, Frame, FrameType, VALUE_FIELD_NAME};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SeriesKind {
    Matrix,
    Vector,
}

impl SeriesKind {
    fn result_type(&self) -> &'static str {
        match self {
            SeriesKind::Matrix => "matrix",
            SeriesKind::Vector => "vector",
        }
    }
}

/// Builds the frame of one series. `__name__` becomes the value column name.
pub(crate) fn series_frame(mut labels: Labels, points: Vec<SamplePair>, result_type: &str) -> Frame {
    let name = labels
        .remove(METRIC_NAME_LABEL)
        .unwrap_or_else(|| VALUE_FIELD_NAME.to_string());
    let (times, values) = points.into_iter().map(|p| (p.timestamp, p.value)).unzip();
    Frame::new(
        "",
        vec![Field::time(times), Field::float(name, values).with_labels(labels)],
    )
    .with_type(FrameType::TimeSeriesMulti)
    .with_result_type(result_type)
}

/// Visits the `result` array of a matrix or vector, one frame per series.
pub(crate) struct SeriesListVisitor(pub SeriesKind);

impl<'de> Visitor<'de> for SeriesListVisitor {
    type Value = Vec<Frame>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of series")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<Frame>, A::Error> {
        let mut frames = Vec::with_capacity(seq.size_hint().unwrap_or(4));
        while let Some(frame) = seq.next_element_seed(SeriesSeed(self.0))? {
            frames.extend(frame);
        }
        Ok(frames)
    }
}

struct SeriesSeed(SeriesKind);

impl<'de> DeserializeSeed<'de> for SeriesSeed {
    type Value = Option<Frame>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for SeriesSeed {
    type Value = Option<Frame>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a series object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Option<Frame>, A::Error> {
        let mut labels = Labels::new();
        let mut points: Vec<SamplePair> = vec![];
        let mut has_histograms = false;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "metric" => labels = map.next_value()?,
                "values" => points = map.next_value()?,
                "value" => points = vec![map.next_value()?],
                "histogram" | "histograms" => {
                    map.next_value::<IgnoredAny>()?;
                    has_histograms = true;
                }
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        // Native histograms are not decoded.
        if points.is_empty() && has_histograms {
            return Ok(None);
        }
        Ok(Some(series_frame(labels, points, self.0.result_type())))
    }
}

pub(crate) struct ScalarVisitor;

impl<'de> Visitor<'de> for ScalarVisitor {
    type Value = Vec<Frame>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a scalar sample")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<Vec<Frame>, A::Error> {
        let pair: SamplePair =
            serde::Deserialize::deserialize(serde::de::value::SeqAccessDeserializer::new(seq))?;
        Ok(vec![series_frame(Labels::new(), vec![pair], "scalar")])
    }
}

pub(crate) struct StringVisitor;

impl<'de> Visitor<'de> for StringVisitor {
    type Value = Vec<Frame>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a string sample")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<Vec<Frame>, A::Error> {
        let pair: StringPair =
            serde::Deserialize::deserialize(serde::de::value::SeqAccessDeserializer::new(seq))?;
        let frame = Frame::new(
            "",
            vec![
                Field::time(vec![pair.timestamp]),
                Field::string(VALUE_FIELD_NAME, vec![pair.value]),
            ],
        )
        .with_result_type("string");
        Ok(vec![frame])
    }
}
