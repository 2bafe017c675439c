//! Boundary to the inference runtime.
//!
//! The pipeline only needs three capabilities from a runtime: load a model
//! file, report its expected input size, and turn an input tensor into a
//! class-score vector. Tensor contents and quantization are model-defined.

use std::path::{Path, PathBuf};

use ndarray::Array4;
use thiserror::Error;

/// NHWC `u8` RGB tensor of shape `[1, height, width, 3]`.
pub type InputTensor = Array4<u8>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelHandle(pub usize);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to load model {path}: {reason}")]
    Load { path: PathBuf, reason: String },
    #[error("unknown model handle {0:?}")]
    UnknownHandle(ModelHandle),
    #[error("inference failed: {0}")]
    Inference(String),
}

pub trait InferenceEngine: Send {
    fn name(&self) -> &'static str;

    fn load(&mut self, model_path: &Path) -> Result<ModelHandle, EngineError>;

    /// Model input size as `(width, height)`, when the model declares one.
    fn input_shape(&self, handle: ModelHandle) -> Result<Option<(u32, u32)>, EngineError>;

    fn infer(
        &mut self,
        handle: ModelHandle,
        input: &InputTensor,
    ) -> Result<Vec<f32>, EngineError>;
}

/// Deterministic engine used when no real runtime is compiled in.
///
/// Scores are a triangular bump centred on the class index proportional to
/// the mean input brightness, so brighter scenes select higher classes.
pub struct StubEngine {
    models: Vec<PathBuf>,
    num_classes: usize,
}

impl StubEngine {
    pub fn new(num_classes: usize) -> Self {
        Self {
            models: Vec::new(),
            num_classes: num_classes.max(1),
        }
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new(8)
    }
}

impl InferenceEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn load(&mut self, model_path: &Path) -> Result<ModelHandle, EngineError> {
        if !model_path.exists() {
            return Err(EngineError::Load {
                path: model_path.to_path_buf(),
                reason: "file not found".into(),
            });
        }
        self.models.push(model_path.to_path_buf());
        Ok(ModelHandle(self.models.len() - 1))
    }

    fn input_shape(&self, handle: ModelHandle) -> Result<Option<(u32, u32)>, EngineError> {
        if handle.0 >= self.models.len() {
            return Err(EngineError::UnknownHandle(handle));
        }
        Ok(None)
    }

    fn infer(
        &mut self,
        handle: ModelHandle,
        input: &InputTensor,
    ) -> Result<Vec<f32>, EngineError> {
        if handle.0 >= self.models.len() {
            return Err(EngineError::UnknownHandle(handle));
        }
        if input.is_empty() {
            return Err(EngineError::Inference("empty input tensor".into()));
        }

        let mean = input.iter().map(|&v| v as f64).sum::<f64>() / input.len() as f64;
        let n = self.num_classes;
        let peak = ((mean / 256.0) * n as f64).floor() as usize;
        let peak = peak.min(n - 1);

        Ok((0..n)
            .map(|i| {
                let distance = i.abs_diff(peak) as f32;
                (1.0 - distance / n as f32).max(0.0)
            })
            .collect())
    }
}
