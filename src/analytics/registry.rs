use std::path::{Path, PathBuf};

use thiserror::Error;

use super::engine::{EngineError, InferenceEngine, ModelHandle};
use crate::config::ModelConfig;

const DEFAULT_INPUT_SIZE: u32 = 224;

#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("failed to read labels {path}: {source}")]
    Labels {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("label file {0} is empty")]
    EmptyLabels(PathBuf),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("duplicate category {0}")]
    DuplicateCategory(String),
}

/// One active classifier: its engine handle, input size and label table.
#[derive(Debug, Clone)]
pub struct ModelSlot {
    pub category: String,
    pub input_shape: (u32, u32),
    pub handle: ModelHandle,
    pub labels: Vec<String>,
}

impl ModelSlot {
    pub fn label(&self, class_index: usize) -> Option<&str> {
        self.labels.get(class_index).map(String::as_str)
    }
}

/// Immutable set of loaded models, iterated in registration order.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    slots: Vec<ModelSlot>,
}

impl ModelRegistry {
    /// Load every configured model. A category that fails to load is logged
    /// and left out; the others are unaffected.
    pub fn build(engine: &mut dyn InferenceEngine, models: &[ModelConfig]) -> Self {
        let mut slots: Vec<ModelSlot> = Vec::with_capacity(models.len());

        for model in models {
            if slots.iter().any(|s| s.category == model.category) {
                let e = ModelLoadError::DuplicateCategory(model.category.clone());
                tracing::error!(category = %model.category, error = %e, "skipping model");
                continue;
            }

            match load_slot(engine, model) {
                Ok(slot) => {
                    tracing::info!(
                        category = %slot.category,
                        engine = engine.name(),
                        labels = slot.labels.len(),
                        input = ?slot.input_shape,
                        "model loaded"
                    );
                    slots.push(slot);
                }
                Err(e) => {
                    tracing::error!(
                        category = %model.category,
                        model = %model.model_path.display(),
                        error = %e,
                        "failed to load model, category disabled"
                    );
                }
            }
        }

        Self { slots }
    }

    pub fn from_slots(slots: Vec<ModelSlot>) -> Self {
        Self { slots }
    }

    pub fn active_categories(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.category.clone()).collect()
    }

    pub fn slot(&self, category: &str) -> Option<&ModelSlot> {
        self.slots.iter().find(|s| s.category == category)
    }

    pub fn position(&self, category: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.category == category)
    }

    pub fn slots(&self) -> impl Iterator<Item = &ModelSlot> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

fn load_slot(
    engine: &mut dyn InferenceEngine,
    model: &ModelConfig,
) -> Result<ModelSlot, ModelLoadError> {
    let labels = load_labels(&model.label_path)?;
    let handle = engine.load(&model.model_path)?;

    let declared = engine.input_shape(handle)?;
    let input_shape = match (model.input_width, model.input_height, declared) {
        (Some(w), Some(h), _) => (w, h),
        (_, _, Some(shape)) => shape,
        (w, h, None) => (
            w.unwrap_or(DEFAULT_INPUT_SIZE),
            h.unwrap_or(DEFAULT_INPUT_SIZE),
        ),
    };

    Ok(ModelSlot {
        category: model.category.clone(),
        input_shape,
        handle,
        labels,
    })
}

/// Newline-delimited labels; line index is class index.
pub fn load_labels(path: &Path) -> Result<Vec<String>, ModelLoadError> {
    let content = std::fs::read_to_string(path).map_err(|source| ModelLoadError::Labels {
        path: path.to_path_buf(),
        source,
    })?;

    let labels: Vec<String> = content.lines().map(|l| l.trim_end().to_string()).collect();
    if labels.iter().all(|l| l.is_empty()) {
        return Err(ModelLoadError::EmptyLabels(path.to_path_buf()));
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::engine::StubEngine;
    use std::io::Write;

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn model(&self, category: &str, labels: &str) -> ModelConfig {
            let model_path = self.dir.path().join(format!("{category}.onnx"));
            std::fs::write(&model_path, b"model").unwrap();
            let label_path = self.dir.path().join(format!("{category}.txt"));
            let mut f = std::fs::File::create(&label_path).unwrap();
            f.write_all(labels.as_bytes()).unwrap();
            ModelConfig {
                category: category.to_string(),
                model_path,
                label_path,
                input_width: None,
                input_height: None,
            }
        }
    }

    #[test]
    fn labels_are_trimmed_and_indexed() {
        let fx = Fixture::new();
        let model = fx.model("birds", "sparrow\r\nrobin  \nwren\n");
        let labels = load_labels(&model.label_path).unwrap();
        assert_eq!(labels, ["sparrow", "robin", "wren"]);
    }

    #[test]
    fn empty_label_file_fails() {
        let fx = Fixture::new();
        let model = fx.model("birds", "\n\n");
        assert!(matches!(
            load_labels(&model.label_path),
            Err(ModelLoadError::EmptyLabels(_))
        ));
    }

    #[test]
    fn one_failed_model_is_excluded() {
        let fx = Fixture::new();
        let birds = fx.model("birds", "sparrow\nrobin\n");
        let mut bugs = fx.model("bugs", "ant\nbee\n");
        bugs.model_path = fx.dir.path().join("missing.onnx");
        let flowers = fx.model("flowers", "rose\ntulip\n");

        let mut engine = StubEngine::default();
        let registry = ModelRegistry::build(&mut engine, &[birds, bugs, flowers]);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.active_categories(), ["birds", "flowers"]);
        assert!(registry.slot("bugs").is_none());
        assert_eq!(registry.slot("flowers").unwrap().labels, ["rose", "tulip"]);
        assert_eq!(registry.position("flowers"), Some(1));
    }

    #[test]
    fn missing_labels_exclude_category() {
        let fx = Fixture::new();
        let mut birds = fx.model("birds", "sparrow\n");
        birds.label_path = fx.dir.path().join("nope.txt");

        let mut engine = StubEngine::default();
        let registry = ModelRegistry::build(&mut engine, &[birds]);
        assert!(registry.is_empty());
    }

    #[test]
    fn input_shape_override_and_default() {
        let fx = Fixture::new();
        let mut birds = fx.model("birds", "sparrow\n");
        birds.input_width = Some(192);
        birds.input_height = Some(160);
        let flowers = fx.model("flowers", "rose\n");

        let mut engine = StubEngine::default();
        let registry = ModelRegistry::build(&mut engine, &[birds, flowers]);
        assert_eq!(registry.slot("birds").unwrap().input_shape, (192, 160));
        assert_eq!(registry.slot("flowers").unwrap().input_shape, (224, 224));
    }

    #[test]
    fn duplicate_category_keeps_first() {
        let fx = Fixture::new();
        let first = fx.model("birds", "sparrow\n");
        let second = fx.model("birds", "robin\n");

        let mut engine = StubEngine::default();
        let registry = ModelRegistry::build(&mut engine, &[first, second]);
        assert_eq!(registry.len(), 1);
    }
}
