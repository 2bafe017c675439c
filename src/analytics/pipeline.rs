use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;

use crate::buffer::FrameSlot;
use crate::camera::{FrameSource, SourceGuard};
use crate::frame::Frame;
use crate::render::{Annotator, FrameEncoder};
use crate::storage::DetectionHistory;

use super::classify::{self, LatestDetections};
use super::engine::InferenceEngine;
use super::motion::MotionDetector;
use super::registry::ModelRegistry;

const MAX_CONSECUTIVE_READ_FAILURES: u32 = 2;
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Starting,
    Running,
    Paused,
    NoFeed,
    Stopped,
}

impl PipelineStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Running,
            2 => Self::Paused,
            3 => Self::NoFeed,
            4 => Self::Stopped,
            _ => Self::Starting,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Starting => 0,
            Self::Running => 1,
            Self::Paused => 2,
            Self::NoFeed => 3,
            Self::Stopped => 4,
        }
    }
}

/// Why the producer loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineExit {
    Shutdown,
    DeviceUnavailable,
    SourceFailed,
}

struct ControlInner {
    paused: AtomicBool,
    status: AtomicU8,
    shutdown: watch::Sender<bool>,
}

/// Shared handle for pausing, resuming and stopping the producer.
#[derive(Clone)]
pub struct PipelineControl {
    inner: Arc<ControlInner>,
}

impl PipelineControl {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ControlInner {
                paused: AtomicBool::new(false),
                status: AtomicU8::new(PipelineStatus::Starting.as_u8()),
                shutdown,
            }),
        }
    }

    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Resuming only makes sense while the producer loop is still alive.
    pub fn can_resume(&self) -> bool {
        !matches!(
            self.status(),
            PipelineStatus::NoFeed | PipelineStatus::Stopped
        )
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.inner.shutdown.subscribe();
        let _ = rx.wait_for(|stop| *stop).await;
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus::from_u8(self.inner.status.load(Ordering::SeqCst))
    }

    pub fn set_status(&self, status: PipelineStatus) {
        self.inner.status.store(status.as_u8(), Ordering::SeqCst);
    }
}

impl Default for PipelineControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer: capture, detect, classify, annotate, encode, publish.
///
/// Owns the frame source exclusively; the detection history and frame slot
/// are the only state shared with HTTP handlers. The motion detector is
/// handed to `run` on the producer thread and never leaves it.
pub struct Pipeline<S: FrameSource> {
    source: SourceGuard<S>,
    engine: Box<dyn InferenceEngine>,
    registry: Arc<ModelRegistry>,
    history: DetectionHistory,
    annotator: Annotator,
    encoder: FrameEncoder,
    frames: FrameSlot,
    control: PipelineControl,
    latest: LatestDetections,
    cycle: u64,
}

impl<S: FrameSource> Pipeline<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: S,
        engine: Box<dyn InferenceEngine>,
        registry: Arc<ModelRegistry>,
        history: DetectionHistory,
        annotator: Annotator,
        encoder: FrameEncoder,
        frames: FrameSlot,
        control: PipelineControl,
    ) -> Self {
        let latest = LatestDetections::new(registry.len());
        Self {
            source: SourceGuard::new(source),
            engine,
            registry,
            history,
            annotator,
            encoder,
            frames,
            control,
            latest,
            cycle: 0,
        }
    }

    pub fn run(mut self, mut detector: MotionDetector) -> PipelineExit {
        tracing::info!(
            camera = %self.source.name(),
            models = self.registry.len(),
            engine = self.engine.name(),
            "pipeline started"
        );

        let mut consecutive_failures = 0u32;

        let exit = loop {
            if self.control.is_shutdown() {
                break PipelineExit::Shutdown;
            }

            if self.control.is_paused() {
                if self.source.is_acquired() {
                    self.source.release();
                    detector.reset();
                    tracing::info!(camera = %self.source.name(), "pipeline paused");
                }
                self.control.set_status(PipelineStatus::Paused);
                thread::sleep(PAUSE_POLL_INTERVAL);
                continue;
            }

            if !self.source.is_acquired() {
                if let Err(e) = self.source.acquire() {
                    tracing::error!(
                        camera = %self.source.name(),
                        error = %e,
                        "frame source unavailable"
                    );
                    break PipelineExit::DeviceUnavailable;
                }
                consecutive_failures = 0;
                self.control.set_status(PipelineStatus::Running);
            }

            match self.source.read() {
                Ok(frame) => {
                    consecutive_failures = 0;
                    self.run_cycle(&mut detector, frame);
                }
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        camera = %self.source.name(),
                        error = %e,
                        consecutive_failures,
                        "frame read failed"
                    );
                    if consecutive_failures >= MAX_CONSECUTIVE_READ_FAILURES {
                        tracing::error!(camera = %self.source.name(), "frame source presumed dead");
                        break PipelineExit::SourceFailed;
                    }
                }
            }
        };

        self.source.release();
        self.control.set_status(match exit {
            PipelineExit::Shutdown => PipelineStatus::Stopped,
            PipelineExit::DeviceUnavailable | PipelineExit::SourceFailed => PipelineStatus::NoFeed,
        });
        tracing::info!(
            camera = %self.source.name(),
            cycles = self.cycle,
            ?exit,
            "pipeline stopped"
        );
        exit
    }

    fn run_cycle(&mut self, detector: &mut MotionDetector, frame: Frame) {
        self.cycle += 1;
        let started = Instant::now();

        let regions = detector.detect(&frame);

        // Motion regions are drawn only; every model runs on every frame.
        let report = classify::run_models(
            self.engine.as_mut(),
            &self.registry,
            &frame,
            &self.history,
        );
        self.latest.update(&self.registry, &report.events);

        let annotated = self.annotator.annotate(frame, &regions, &self.latest);

        match self.encoder.encode(&annotated) {
            Ok(jpeg) => {
                self.frames.publish(jpeg);
            }
            Err(e) => {
                tracing::warn!(
                    cycle = self.cycle,
                    error = %e,
                    "frame encode failed, emission skipped"
                );
            }
        }

        tracing::trace!(
            cycle = self.cycle,
            regions = regions.len(),
            events = report.events.len(),
            failures = report.failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cycle complete"
        );
    }
}

/// Run the producer on a blocking thread. `make_detector` is called on that
/// thread, so background models holding native handles need not be `Send`.
pub fn spawn_pipeline<S, F>(
    pipeline: Pipeline<S>,
    make_detector: F,
) -> tokio::task::JoinHandle<PipelineExit>
where
    S: FrameSource + 'static,
    F: FnOnce() -> MotionDetector + Send + 'static,
{
    tokio::task::spawn_blocking(move || pipeline.run(make_detector()))
}
