use std::path::Path;

use ndarray::{Array4, ArrayView4};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::tensor::TensorElementType;
use ort::value::{TensorRef, ValueType};

use super::engine::{EngineError, InferenceEngine, InputTensor, ModelHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputKind {
    Quantized,
    Float,
}

/// What a model's first input declares: element type, channel order and,
/// when every spatial dimension is fixed, the `(width, height)` it expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InputLayout {
    kind: InputKind,
    channels_first: bool,
    shape: Option<(u32, u32)>,
}

fn fixed_dim(dim: i64) -> Option<u32> {
    u32::try_from(dim).ok().filter(|&d| d > 0)
}

fn describe_input(ty: TensorElementType, dims: &[i64]) -> Result<InputLayout, String> {
    let kind = match ty {
        TensorElementType::Uint8 => InputKind::Quantized,
        TensorElementType::Float32 => InputKind::Float,
        other => return Err(format!("unsupported input element type {other:?}")),
    };
    if dims.len() != 4 {
        return Err(format!("expected a 4-d image input, model declares {dims:?}"));
    }

    let (channels_first, height, width) = match (dims[1], dims[3]) {
        (_, 3) => (false, dims[1], dims[2]),
        (3, _) => (true, dims[2], dims[3]),
        _ => return Err(format!("input {dims:?} has no 3-channel axis")),
    };
    let shape = fixed_dim(width).zip(fixed_dim(height));
    Ok(InputLayout {
        kind,
        channels_first,
        shape,
    })
}

struct LoadedModel {
    session: Session,
    layout: InputLayout,
}

/// ONNX Runtime backed classifier engine.
///
/// Quantized models take the raw `u8` tensor; float models get the same
/// tensor scaled to `[0, 1]`. The element type and channel order come from
/// the model's declared input, read once at load time.
pub struct OnnxEngine {
    models: Vec<LoadedModel>,
    intra_threads: usize,
}

impl OnnxEngine {
    pub fn new(intra_threads: usize) -> Self {
        Self {
            models: Vec::new(),
            intra_threads: intra_threads.max(1),
        }
    }

    fn build_session(
        &self,
        model_path: &str,
    ) -> Result<Session, Box<dyn std::error::Error + Send + Sync>> {
        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.intra_threads)?;

        let session = if model_path.starts_with("http://") || model_path.starts_with("https://") {
            builder.commit_from_url(model_path)?
        } else {
            builder.commit_from_file(model_path)?
        };
        Ok(session)
    }
}

fn read_layout(session: &Session) -> Result<InputLayout, String> {
    let input = session
        .inputs()
        .first()
        .ok_or_else(|| "model declares no inputs".to_string())?;
    match input.dtype() {
        ValueType::Tensor { ty, shape, .. } => describe_input(*ty, shape),
        other => Err(format!("input is not a tensor: {other:?}")),
    }
}

fn run(
    session: &mut Session,
    layout: InputLayout,
    input: &InputTensor,
) -> Result<Vec<f32>, Box<dyn std::error::Error + Send + Sync>> {
    let view: ArrayView4<u8> = if layout.channels_first {
        input.view().permuted_axes([0, 3, 1, 2])
    } else {
        input.view()
    };

    let outputs = match layout.kind {
        InputKind::Quantized => {
            let owned = view.as_standard_layout();
            let tensor = TensorRef::from_array_view(owned.view())?.into_dyn();
            session.run(ort::inputs![tensor])?
        }
        InputKind::Float => {
            let scaled: Array4<f32> = view.mapv(|v| v as f32 / 255.0);
            let tensor = TensorRef::from_array_view(scaled.view())?.into_dyn();
            session.run(ort::inputs![tensor])?
        }
    };

    let output = &outputs[0];
    if let Ok(scores) = output.try_extract_array::<f32>() {
        return Ok(scores.iter().copied().collect());
    }
    let quantized = output.try_extract_array::<u8>()?;
    Ok(quantized.iter().map(|&v| v as f32 / 255.0).collect())
}

impl InferenceEngine for OnnxEngine {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn load(&mut self, model_path: &Path) -> Result<ModelHandle, EngineError> {
        let load_error = |reason: String| EngineError::Load {
            path: model_path.to_path_buf(),
            reason,
        };
        let session = self
            .build_session(&model_path.to_string_lossy())
            .map_err(|e| load_error(e.to_string()))?;
        let layout = read_layout(&session).map_err(load_error)?;
        tracing::debug!(
            model = %model_path.display(),
            kind = ?layout.kind,
            channels_first = layout.channels_first,
            shape = ?layout.shape,
            "model input read"
        );

        self.models.push(LoadedModel { session, layout });
        Ok(ModelHandle(self.models.len() - 1))
    }

    fn input_shape(&self, handle: ModelHandle) -> Result<Option<(u32, u32)>, EngineError> {
        self.models
            .get(handle.0)
            .map(|model| model.layout.shape)
            .ok_or(EngineError::UnknownHandle(handle))
    }

    fn infer(
        &mut self,
        handle: ModelHandle,
        input: &InputTensor,
    ) -> Result<Vec<f32>, EngineError> {
        let model = self
            .models
            .get_mut(handle.0)
            .ok_or(EngineError::UnknownHandle(handle))?;
        run(&mut model.session, model.layout, input)
            .map_err(|e| EngineError::Inference(e.to_string()))
    }
}
