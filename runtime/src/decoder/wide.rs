use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::types::{Field, FieldValues, Frame, FrameType};

fn is_series_frame(frame: &Frame) -> bool {
    frame.meta.frame_type == Some(FrameType::TimeSeriesMulti)
        && frame.fields.len() == 2
        && frame.fields[0].values.is_time()
        && matches!(frame.fields[1].values, FieldValues::Float(_))
}

/// Joins all series frames on their timestamps into a single frame with one nullable
/// value column per series. Other frames are passed through after the merged frame.
pub fn merge_wide(frames: Vec<Frame>) -> Vec<Frame> {
    let (series, mut rest): (Vec<Frame>, Vec<Frame>) =
        frames.into_iter().partition(is_series_frame);
    if series.is_empty() {
        return rest;
    }

    let mut rows: BTreeMap<DateTime<Utc>, usize> = BTreeMap::new();
    for frame in &series {
        if let FieldValues::Time(times) = &frame.fields[0].values {
            rows.extend(times.iter().map(|t| (*t, 0)));
        }
    }
    for (i, row) in rows.values_mut().enumerate() {
        *row = i;
    }

    let mut meta = series[0].meta.clone();
    meta.frame_type = Some(FrameType::TimeSeriesWide);
    meta.notices.clear();

    let mut fields = Vec::with_capacity(series.len() + 1);
    fields.push(Field::time(rows.keys().copied().collect()));
    for frame in series {
        meta.notices.extend(frame.meta.notices);
        let mut fields_iter = frame.fields.into_iter();
        let (Some(time), Some(value)) = (fields_iter.next(), fields_iter.next()) else {
            continue;
        };
        let (FieldValues::Time(times), FieldValues::Float(values)) = (time.values, value.values)
        else {
            continue;
        };
        let mut column = vec![None; rows.len()];
        for (t, v) in times.iter().zip(values) {
            if let Some(row) = rows.get(t) {
                column[*row] = Some(v);
            }
        }
        fields.push(Field {
            name: value.name,
            labels: value.labels,
            config: value.config,
            values: FieldValues::NullableFloat(column),
        });
    }

    let mut wide = Frame::new("", fields);
    wide.meta = meta;
    rest.insert(0, wide);
    rest
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use pretty_assertions::assert_eq;

    use promsource_common::label::Labels;

    use super::*;
    use crate::decoder::series::series_frame;
    use crate::decoder::values::SamplePair;

    fn points(samples: &[(i64, f64)]) -> Vec<SamplePair> {
        samples
            .iter()
            .map(|(t, v)| SamplePair {
                timestamp: DateTime::from_timestamp(*t, 0).unwrap(),
                value: *v,
            })
            .collect()
    }

    #[test]
    fn test_merge_outer_joins_on_time() {
        let mut a = Labels::new();
        a.insert("__name__".to_string(), "up".to_string());
        a.insert("job".to_string(), "a".to_string());
        let frames = vec![
            series_frame(a, points(&[(10, 1.0), (20, 2.0)]), "matrix"),
            series_frame(Labels::new(), points(&[(20, 3.0), (30, 4.0)]), "matrix"),
        ];

        let merged = merge_wide(frames);
        assert_eq!(merged.len(), 1);
        let frame = &merged[0];
        assert_eq!(frame.meta.frame_type, Some(FrameType::TimeSeriesWide));
        assert_eq!(frame.result_type(), Some("matrix"));
        assert_eq!(frame.rows(), 3);
        assert!(frame.is_rectangular());
        assert_eq!(frame.fields[1].name, "up");
        assert_eq!(frame.fields[1].labels["job"], "a");
        assert_eq!(
            frame.fields[1].values,
            FieldValues::NullableFloat(vec![Some(1.0), Some(2.0), None])
        );
        assert_eq!(
            frame.fields[2].values,
            FieldValues::NullableFloat(vec![None, Some(3.0), Some(4.0)])
        );
    }

    #[test]
    fn test_merge_keeps_other_frames() {
        let other = Frame::new("", vec![Field::string("Value", vec!["a".to_string()])]);
        let merged = merge_wide(vec![other.clone()]);
        assert_eq!(merged, vec![other]);
    }
}
