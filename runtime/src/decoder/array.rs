use std::fmt;

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::de::{self, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use promsource_common::label::{Label, Labels};
use promsource_common::time::time_from_float;

use crate::decoder::values::parse_sample_value;
use crate::types::{Field, Frame, Notice, NoticeSeverity, VALUE_FIELD_NAME};

/// String columns that are filled row by row, in the order their names are first seen.
/// Cells missing from a row are left empty.
#[derive(Default)]
struct ColumnSet {
    index: AHashMap<String, usize>,
    columns: Vec<(String, Vec<String>)>,
    rows: usize,
}

impl ColumnSet {
    fn push_row(&mut self, pairs: Vec<Label>) {
        for Label { name, value } in pairs {
            let idx = match self.index.get(&name) {
                Some(idx) => *idx,
                None => {
                    let idx = self.columns.len();
                    self.index.insert(name.clone(), idx);
                    self.columns.push((name, vec![String::new(); self.rows]));
                    idx
                }
            };
            let column = &mut self.columns[idx].1;
            if column.len() == self.rows {
                column.push(value);
            }
        }
        self.rows += 1;
        for (_, column) in self.columns.iter_mut() {
            column.resize(self.rows, String::new());
        }
    }

    fn is_empty(&self) -> bool {
        self.rows == 0
    }

    fn into_fields(self) -> Vec<Field> {
        self.columns
            .into_iter()
            .map(|(name, values)| Field::string(name, values))
            .collect()
    }
}

/// Label name/value pairs in document order.
struct LabelPairs(Vec<Label>);

impl<'de> Deserialize<'de> for LabelPairs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PairsVisitor;

        impl<'de> Visitor<'de> for PairsVisitor {
            type Value = LabelPairs;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a label object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<LabelPairs, A::Error> {
                let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(8));
                while let Some((k, v)) = map.next_entry::<String, String>()? {
                    pairs.push(Label::new(k, v));
                }
                Ok(LabelPairs(pairs))
            }
        }

        deserializer.deserialize_map(PairsVisitor)
    }
}

#[derive(Default)]
struct ExemplarRow {
    timestamp: Option<DateTime<Utc>>,
    value: f64,
    labels: Vec<Label>,
    unknown_keys: Vec<String>,
}

impl<'de> Deserialize<'de> for ExemplarRow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = ExemplarRow;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an exemplar object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<ExemplarRow, A::Error> {
                let mut row = ExemplarRow::default();
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "value" => {
                            let raw: String = map.next_value()?;
                            row.value = parse_sample_value(&raw).map_err(|_| {
                                <A::Error as de::Error>::custom(format!(
                                    "invalid exemplar value {raw:?}"
                                ))
                            })?;
                        }
                        "timestamp" => row.timestamp = Some(time_from_float(map.next_value()?)),
                        "labels" => row.labels = map.next_value::<LabelPairs>()?.0,
                        _ => {
                            map.next_value::<IgnoredAny>()?;
                            row.unknown_keys.push(key);
                        }
                    }
                }
                Ok(row)
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}

/// One object element of array data: either an exemplar block or a flat label listing.
enum ObjectElement {
    Exemplars(Frame),
    LabelPairs(Vec<Label>),
}

enum ArrayElement {
    Text(String),
    Object(ObjectElement),
}

impl<'de> Deserialize<'de> for ArrayElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ElementVisitor)
    }
}

struct ElementVisitor;

impl ElementVisitor {
    fn other<E>(value: Value) -> Result<ArrayElement, E> {
        Ok(ArrayElement::Text(value.to_string()))
    }
}

impl<'de> Visitor<'de> for ElementVisitor {
    type Value = ArrayElement;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a string or an object")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<ArrayElement, E> {
        Ok(ArrayElement::Text(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<ArrayElement, E> {
        Ok(ArrayElement::Text(v))
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<ArrayElement, E> {
        Self::other(Value::from(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<ArrayElement, E> {
        Self::other(Value::from(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<ArrayElement, E> {
        Self::other(Value::from(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<ArrayElement, E> {
        Self::other(Value::from(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<ArrayElement, E> {
        Self::other(Value::Null)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<ArrayElement, A::Error> {
        let value = Value::deserialize(de::value::SeqAccessDeserializer::new(seq))?;
        Self::other(value)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<ArrayElement, A::Error> {
        let mut series_labels = Labels::new();
        let mut exemplars: Option<Vec<ExemplarRow>> = None;
        let mut pairs = vec![];
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "seriesLabels" => series_labels = map.next_value()?,
                "exemplars" => exemplars = Some(map.next_value()?),
                _ => {
                    let value = match map.next_value::<Value>()? {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    pairs.push(Label::new(key, value));
                }
            }
        }
        let element = match exemplars {
            Some(rows) => ObjectElement::Exemplars(exemplar_frame(series_labels, rows)),
            None => ObjectElement::LabelPairs(pairs),
        };
        Ok(ArrayElement::Object(element))
    }
}

fn exemplar_frame(series_labels: Labels, rows: Vec<ExemplarRow>) -> Frame {
    let mut times = Vec::with_capacity(rows.len());
    let mut values = Vec::with_capacity(rows.len());
    let mut columns = ColumnSet::default();
    let mut notices = vec![];
    for row in rows {
        notices.extend(row.unknown_keys.into_iter().map(|key| {
            Notice::new(
                NoticeSeverity::Error,
                format!("unable to parse key: {key} in response body"),
            )
        }));
        let Some(timestamp) = row.timestamp else {
            notices.push(Notice::new(
                NoticeSeverity::Error,
                "exemplar without timestamp in response body",
            ));
            continue;
        };
        times.push(timestamp);
        values.push(row.value);
        columns.push_row(row.labels);
    }

    let mut fields = vec![
        Field::time(times),
        Field::float(VALUE_FIELD_NAME, values).with_labels(series_labels),
    ];
    fields.extend(columns.into_fields());
    let mut frame = Frame::new("", fields).with_result_type("exemplar");
    frame.meta.notices = notices;
    frame
}

/// Visits `data` when it is an array: label values, label sets or exemplar blocks.
pub(crate) struct ArrayDataVisitor;

impl<'de> Visitor<'de> for ArrayDataVisitor {
    type Value = Vec<Frame>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<Frame>, A::Error> {
        let mut frames = vec![];
        let mut strings = vec![];
        let mut label_columns = ColumnSet::default();
        // Position of the label listing among the exemplar frames.
        let mut label_frame_pos = None;

        while let Some(element) = seq.next_element::<ArrayElement>()? {
            match element {
                ArrayElement::Text(s) => strings.push(s),
                ArrayElement::Object(ObjectElement::Exemplars(frame)) => frames.push(frame),
                ArrayElement::Object(ObjectElement::LabelPairs(pairs)) => {
                    if label_frame_pos.is_none() {
                        label_frame_pos = Some(frames.len());
                    }
                    label_columns.push_row(pairs);
                }
            }
        }

        if let Some(pos) = label_frame_pos {
            if !label_columns.is_empty() {
                frames.insert(pos, Frame::new("", label_columns.into_fields()));
            }
        }
        if !strings.is_empty() {
            frames.push(Frame::new(
                "",
                vec![Field::string(VALUE_FIELD_NAME, strings)],
            ));
        }
        Ok(frames)
    }
}
