use std::sync::Arc;
use std::time::Duration;

use promsource_common::label::Labels;

use crate::config::SamplerKind;
use crate::exemplar::{Exemplar, ExemplarSampler, LabelTracker, Sampler};
use crate::types::{Field, FieldValues, Frame, FrameMeta, TIME_FIELD_NAME, VALUE_FIELD_NAME};

pub const EXEMPLAR_FRAME_NAME: &str = "exemplar";

/// Collapses the exemplar frames of a response into one sampled frame. Other frames are
/// passed through unchanged, ahead of the exemplar frame.
pub struct Framer {
    sampler: ExemplarSampler,
    labels: LabelTracker,
    frames: Vec<Frame>,
    meta: Option<FrameMeta>,
    ref_id: String,
}

impl Framer {
    pub fn new(sampler: ExemplarSampler) -> Self {
        Self {
            sampler,
            labels: LabelTracker::default(),
            frames: vec![],
            meta: None,
            ref_id: String::new(),
        }
    }

    pub fn set_step(&mut self, step: Duration) {
        self.sampler.set_step(step);
    }

    pub fn add_frame(&mut self, frame: Frame) {
        if !frame.is_exemplar() {
            self.frames.push(frame);
            return;
        }

        let Frame {
            fields,
            meta,
            ref_id,
            ..
        } = frame;
        match self.meta.as_mut() {
            Some(kept) => kept.notices.extend(meta.notices),
            None => {
                self.meta = Some(meta);
                self.ref_id = ref_id;
            }
        }

        let mut fields = fields.into_iter();
        let (Some(time), Some(value)) = (fields.next(), fields.next()) else {
            return;
        };
        let (FieldValues::Time(times), FieldValues::Float(values)) = (time.values, value.values)
        else {
            return;
        };
        let label_fields: Vec<(String, Vec<String>)> = fields
            .filter_map(|f| match f.values {
                FieldValues::String(v) => Some((f.name, v)),
                _ => None,
            })
            .collect();

        let series_labels = Arc::new(value.labels);
        self.labels.add(series_labels.keys());
        self.labels.add(label_fields.iter().map(|(name, _)| name));

        for (row, (timestamp, value)) in times.into_iter().zip(values).enumerate() {
            let labels: Labels = label_fields
                .iter()
                .filter_map(|(name, values)| {
                    let v = values.get(row)?;
                    (!v.is_empty()).then(|| (name.clone(), v.clone()))
                })
                .collect();
            self.sampler.add(Exemplar {
                timestamp,
                value,
                series_labels: Arc::clone(&series_labels),
                labels,
            });
        }
    }

    pub fn frames(mut self) -> Vec<Frame> {
        let exemplars = self.sampler.sample();
        self.sampler.reset();
        if exemplars.is_empty() {
            return self.frames;
        }

        let mut times = Vec::with_capacity(exemplars.len());
        let mut values = Vec::with_capacity(exemplars.len());
        let mut columns: Vec<(String, Vec<String>)> = self
            .labels
            .names()
            .map(|name| (name.to_string(), Vec::with_capacity(exemplars.len())))
            .collect();
        for exemplar in &exemplars {
            times.push(exemplar.timestamp);
            values.push(exemplar.value);
            for (name, column) in columns.iter_mut() {
                column.push(exemplar.label(name).to_string());
            }
        }

        let mut fields = vec![
            Field::new(TIME_FIELD_NAME, FieldValues::Time(times)),
            Field::float(VALUE_FIELD_NAME, values),
        ];
        fields.extend(
            columns
                .into_iter()
                .map(|(name, column)| Field::string(name, column)),
        );

        let mut frame = Frame::new(EXEMPLAR_FRAME_NAME, fields);
        frame.ref_id = self.ref_id;
        if let Some(meta) = self.meta {
            frame.meta = meta;
        }
        self.frames.push(frame);
        self.frames
    }
}

/// Runs the exemplar frames among `frames` through a fresh sampler of `kind`.
pub fn process_exemplars(frames: Vec<Frame>, kind: SamplerKind, step: Duration) -> Vec<Frame> {
    if !frames.iter().any(Frame::is_exemplar) {
        return frames;
    }
    let mut framer = Framer::new(ExemplarSampler::new(kind));
    framer.set_step(step);
    for frame in frames {
        framer.add_frame(frame);
    }
    framer.frames()
}
