mod classify;
mod engine;
mod motion;
#[cfg(feature = "onnx")]
mod onnx;
mod pipeline;
mod registry;

pub use classify::{
    argmax, classify, preprocess, run_models, CycleReport, InferenceError, LatestDetections,
};
pub use engine::{EngineError, InferenceEngine, InputTensor, ModelHandle, StubEngine};
#[cfg(feature = "opencv")]
pub use motion::Mog2Background;
pub use motion::{
    bounding_regions, BackgroundModel, ForegroundMask, GaussianBackground, MotionDetector,
    ReferenceBackground,
};
#[cfg(feature = "onnx")]
pub use onnx::OnnxEngine;
pub use pipeline::{spawn_pipeline, Pipeline, PipelineControl, PipelineExit, PipelineStatus};
pub use registry::{load_labels, ModelLoadError, ModelRegistry, ModelSlot};
