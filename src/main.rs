use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use feedwatch::analytics::{
    spawn_pipeline, InferenceEngine, ModelRegistry, MotionDetector, Pipeline, PipelineControl,
    PipelineExit,
};
use feedwatch::api::{self, AppState};
use feedwatch::buffer::FrameSlot;
use feedwatch::camera::{FrameSource, SyntheticSource};
use feedwatch::config::{CameraConfig, Config, SourceKind};
use feedwatch::render::{Annotator, FrameEncoder};
use feedwatch::storage::DetectionHistory;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("feedwatch=debug".parse()?))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    tracing::info!("loaded {} model(s)", config.models.len());

    let mut engine = build_engine();
    let registry = Arc::new(ModelRegistry::build(engine.as_mut(), &config.models));
    if registry.is_empty() {
        tracing::warn!("no model loaded, the feed will carry motion boxes only");
    }

    let history = DetectionHistory::new(config.history.capacity);
    let frames = FrameSlot::new();
    let control = PipelineControl::new();

    let pipeline = Pipeline::new(
        build_source(&config.camera),
        engine,
        Arc::clone(&registry),
        history.clone(),
        Annotator::from_config(&config.annotate),
        FrameEncoder::new(config.encoder.quality),
        frames.clone(),
        control.clone(),
    );
    let motion = config.motion.clone();
    let producer = spawn_pipeline(pipeline, move || MotionDetector::from_config(&motion));

    let state = AppState::new(history, frames, control.clone(), registry.active_categories());
    let server = tokio::spawn(api::start_server(state, config.http.port));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    control.shutdown();

    match producer.await {
        Ok(PipelineExit::Shutdown) => {}
        Ok(exit) => tracing::warn!(?exit, "producer had already stopped"),
        Err(e) => tracing::error!("producer task failed: {}", e),
    }

    match server.await {
        Ok(Err(e)) => tracing::error!("http server error: {}", e),
        Err(e) => tracing::error!("http server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    tracing::info!("shutdown complete");
    Ok(())
}

fn build_source(config: &CameraConfig) -> Box<dyn FrameSource> {
    match config.source {
        SourceKind::Synthetic => {
            Box::new(SyntheticSource::new(config.width, config.height, config.fps))
        }
        #[cfg(feature = "opencv")]
        SourceKind::Device => Box::new(feedwatch::camera::CameraSource::new(config)),
        #[cfg(not(feature = "opencv"))]
        SourceKind::Device => {
            tracing::warn!("built without opencv, falling back to synthetic source");
            Box::new(SyntheticSource::new(config.width, config.height, config.fps))
        }
    }
}

#[cfg(feature = "onnx")]
fn build_engine() -> Box<dyn InferenceEngine> {
    Box::new(feedwatch::analytics::OnnxEngine::new(4))
}

#[cfg(not(feature = "onnx"))]
fn build_engine() -> Box<dyn InferenceEngine> {
    tracing::warn!("built without onnx, using stub inference engine");
    Box::new(feedwatch::analytics::StubEngine::default())
}
