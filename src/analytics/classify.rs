use image::imageops::{self, FilterType};
use thiserror::Error;

use super::engine::{EngineError, InferenceEngine, InputTensor};
use super::registry::{ModelRegistry, ModelSlot};
use crate::frame::Frame;
use crate::storage::{DetectionEvent, DetectionHistory};

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("model returned no usable scores")]
    EmptyOutput,
    #[error("class index {index} outside label table of {labels}")]
    UnknownClass { index: usize, labels: usize },
    #[error("invalid input shape {0}x{1}")]
    InvalidShape(u32, u32),
}

/// Resize to `(width, height)` and lay out as NHWC RGB `[1, h, w, 3]`.
pub fn preprocess(frame: &Frame, input_shape: (u32, u32)) -> Result<InputTensor, InferenceError> {
    let (width, height) = input_shape;
    if width == 0 || height == 0 || frame.is_empty() {
        return Err(InferenceError::InvalidShape(width, height));
    }

    let resized = if frame.width() == width && frame.height() == height {
        frame.image.clone()
    } else {
        imageops::resize(&frame.image, width, height, FilterType::Triangle)
    };

    InputTensor::from_shape_vec((1, height as usize, width as usize, 3), resized.into_raw())
        .map_err(|_| InferenceError::InvalidShape(width, height))
}

/// Index and value of the highest score. Ties keep the first index; NaN
/// scores are ignored.
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, s)| !s.is_nan())
        .fold(None, |best, (i, s)| match best {
            Some((_, b)) if b >= s => best,
            _ => Some((i, s)),
        })
}

pub fn classify(
    engine: &mut dyn InferenceEngine,
    slot: &ModelSlot,
    frame: &Frame,
) -> Result<DetectionEvent, InferenceError> {
    let input = preprocess(frame, slot.input_shape)?;
    let scores = engine.infer(slot.handle, &input)?;
    let (index, confidence) = argmax(&scores).ok_or(InferenceError::EmptyOutput)?;
    let label = slot.label(index).ok_or(InferenceError::UnknownClass {
        index,
        labels: slot.labels.len(),
    })?;

    Ok(DetectionEvent::new(
        slot.category.clone(),
        label.to_string(),
        confidence,
        frame.captured_at,
    ))
}

/// Outcome of evaluating every active model once.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub events: Vec<DetectionEvent>,
    pub failures: Vec<(String, String)>,
}

/// Run each active model in registration order, appending each result to
/// `history` as it is produced. A failing model is logged and skipped; the
/// rest still run.
pub fn run_models(
    engine: &mut dyn InferenceEngine,
    registry: &ModelRegistry,
    frame: &Frame,
    history: &DetectionHistory,
) -> CycleReport {
    let mut report = CycleReport::default();

    for slot in registry.slots() {
        match classify(engine, slot, frame) {
            Ok(event) => {
                tracing::trace!(
                    category = %event.category,
                    label = %event.label,
                    confidence = format!("{:.2}", event.confidence),
                    "classified"
                );
                history.append(event.clone());
                report.events.push(event);
            }
            Err(e) => {
                tracing::warn!(
                    category = %slot.category,
                    error = %e,
                    "inference failed, skipping this cycle"
                );
                report.failures.push((slot.category.clone(), e.to_string()));
            }
        }
    }

    report
}

/// Most recent event per active category, indexed by registration order.
#[derive(Debug, Clone)]
pub struct LatestDetections {
    slots: Vec<Option<DetectionEvent>>,
}

impl LatestDetections {
    pub fn new(categories: usize) -> Self {
        Self {
            slots: vec![None; categories],
        }
    }

    pub fn update(&mut self, registry: &ModelRegistry, events: &[DetectionEvent]) {
        for event in events {
            if let Some(pos) = registry.position(&event.category) {
                if let Some(slot) = self.slots.get_mut(pos) {
                    *slot = Some(event.clone());
                }
            }
        }
    }

    /// `(registration index, event)` for every category seen so far.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &DetectionEvent)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i, e)))
    }

    pub fn get(&self, index: usize) -> Option<&DetectionEvent> {
        self.slots.get(index).and_then(Option::as_ref)
    }
}
