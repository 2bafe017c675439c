//! Producer loop driven end to end with scripted sources and engines.

use std::collections::HashSet;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};

use feedwatch::analytics::{
    BackgroundModel, EngineError, ForegroundMask, GaussianBackground, InferenceEngine,
    InputTensor, ModelHandle, ModelRegistry, ModelSlot, MotionDetector, Pipeline,
    PipelineControl, PipelineExit, PipelineStatus, StubEngine,
};
use feedwatch::api::mjpeg::{multipart_part, ClientStream};
use feedwatch::buffer::FrameSlot;
use feedwatch::camera::{FrameSource, SourceError};
use feedwatch::config::ModelConfig;
use feedwatch::frame::Frame;
use feedwatch::render::{Annotator, FrameEncoder};
use feedwatch::storage::DetectionHistory;

#[derive(Default)]
struct SourceCounters {
    open: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
    reads: AtomicUsize,
}

/// Yields `frames` frames, then fails every read. Reads whose index is in
/// `failing_reads` fail once without ending the script.
struct ScriptedSource {
    frames: usize,
    failing_reads: HashSet<usize>,
    fail_open: bool,
    read_delay: Duration,
    counters: Arc<SourceCounters>,
}

impl ScriptedSource {
    fn new(frames: usize) -> (Self, Arc<SourceCounters>) {
        let counters = Arc::new(SourceCounters::default());
        let source = Self {
            frames,
            failing_reads: HashSet::new(),
            fail_open: false,
            read_delay: Duration::ZERO,
            counters: Arc::clone(&counters),
        };
        (source, counters)
    }
}

impl FrameSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn open(&mut self) -> Result<(), SourceError> {
        if self.fail_open {
            return Err(SourceError::DeviceUnavailable("no such device".into()));
        }
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        self.counters.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, SourceError> {
        thread::sleep(self.read_delay);
        let n = self.counters.reads.fetch_add(1, Ordering::SeqCst);
        if n >= self.frames {
            return Err(SourceError::ReadFailed("end of script".into()));
        }
        if self.failing_reads.contains(&n) {
            return Err(SourceError::ReadFailed("dropped frame".into()));
        }
        let shade = (n % 25) as u8 * 10;
        Ok(Frame::new(RgbImage::from_pixel(64, 48, Rgb([shade, shade, shade]))))
    }

    fn close(&mut self) {
        if self.counters.open.swap(false, Ordering::SeqCst) {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        self.counters.open.load(Ordering::SeqCst)
    }
}

/// Scores are one-hot at the per-model call count, so the n-th call for a
/// model yields label `l{n}`.
struct ScriptedEngine {
    calls: Vec<usize>,
    failing: HashSet<(usize, usize)>,
}

impl ScriptedEngine {
    fn new(models: usize) -> Self {
        Self {
            calls: vec![0; models],
            failing: HashSet::new(),
        }
    }
}

impl InferenceEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn load(&mut self, _model_path: &Path) -> Result<ModelHandle, EngineError> {
        self.calls.push(0);
        Ok(ModelHandle(self.calls.len() - 1))
    }

    fn input_shape(&self, _handle: ModelHandle) -> Result<Option<(u32, u32)>, EngineError> {
        Ok(Some((8, 8)))
    }

    fn infer(
        &mut self,
        handle: ModelHandle,
        _input: &InputTensor,
    ) -> Result<Vec<f32>, EngineError> {
        let call = self.calls[handle.0];
        self.calls[handle.0] += 1;
        if self.failing.contains(&(handle.0, call)) {
            return Err(EngineError::Inference("tensor allocation failed".into()));
        }
        let mut scores = vec![0.0; 16];
        scores[call % 16] = 1.0;
        Ok(scores)
    }
}

fn labels() -> Vec<String> {
    (0..16).map(|i| format!("l{}", i)).collect()
}

fn registry(categories: &[&str]) -> Arc<ModelRegistry> {
    let slots = categories
        .iter()
        .enumerate()
        .map(|(i, category)| ModelSlot {
            category: category.to_string(),
            input_shape: (8, 8),
            handle: ModelHandle(i),
            labels: labels(),
        })
        .collect();
    Arc::new(ModelRegistry::from_slots(slots))
}

struct Harness {
    history: DetectionHistory,
    frames: FrameSlot,
    control: PipelineControl,
}

fn pipeline<S: FrameSource>(
    source: S,
    engine: Box<dyn InferenceEngine>,
    registry: Arc<ModelRegistry>,
    capacity: usize,
) -> (Pipeline<S>, Harness) {
    let harness = Harness {
        history: DetectionHistory::new(capacity),
        frames: FrameSlot::new(),
        control: PipelineControl::new(),
    };
    let pipeline = Pipeline::new(
        source,
        engine,
        registry,
        harness.history.clone(),
        Annotator::new(None, 10, 40, 24.0),
        FrameEncoder::new(80),
        harness.frames.clone(),
        harness.control.clone(),
    );
    (pipeline, harness)
}

fn detector() -> MotionDetector {
    MotionDetector::new(Box::new(GaussianBackground::new(0.005, 2.5)), 500)
}

fn events(history: &DetectionHistory) -> Vec<(String, String)> {
    history
        .snapshot()
        .into_iter()
        .map(|e| (e.category, e.label))
        .collect()
}

fn pair(category: &str, label: &str) -> (String, String) {
    (category.to_string(), label.to_string())
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn history_keeps_most_recent_events_across_cycles() {
    let (source, counters) = ScriptedSource::new(6);
    let (pipeline, harness) = pipeline(
        source,
        Box::new(ScriptedEngine::new(2)),
        registry(&["birds", "flowers"]),
        5,
    );

    let exit = pipeline.run(detector());

    assert_eq!(exit, PipelineExit::SourceFailed);
    assert_eq!(harness.control.status(), PipelineStatus::NoFeed);
    assert!(!harness.control.can_resume());
    assert_eq!(harness.frames.published(), 6);
    assert!(!counters.open.load(Ordering::SeqCst));
    // Two failed reads in a row end the loop.
    assert_eq!(counters.reads.load(Ordering::SeqCst), 8);

    assert_eq!(
        events(&harness.history),
        [
            pair("flowers", "l3"),
            pair("birds", "l4"),
            pair("flowers", "l4"),
            pair("birds", "l5"),
            pair("flowers", "l5"),
        ]
    );
}

#[test]
fn isolated_read_failures_do_not_stop_the_loop() {
    let (mut source, counters) = ScriptedSource::new(6);
    source.failing_reads = HashSet::from([1, 3]);
    let (pipeline, harness) = pipeline(
        source,
        Box::new(ScriptedEngine::new(1)),
        registry(&["birds"]),
        10,
    );

    assert_eq!(pipeline.run(detector()), PipelineExit::SourceFailed);

    // Reads 0, 2, 4 and 5 succeed; only the trailing pair ends the loop.
    assert_eq!(harness.frames.published(), 4);
    assert_eq!(counters.reads.load(Ordering::SeqCst), 8);
    assert_eq!(
        events(&harness.history),
        [
            pair("birds", "l0"),
            pair("birds", "l1"),
            pair("birds", "l2"),
            pair("birds", "l3"),
        ]
    );
}

#[test]
fn failing_model_skips_one_cycle_only() {
    let (source, _counters) = ScriptedSource::new(4);
    let mut engine = ScriptedEngine::new(2);
    engine.failing.insert((0, 2));
    let (pipeline, harness) = pipeline(
        source,
        Box::new(engine),
        registry(&["birds", "flowers"]),
        10,
    );

    assert_eq!(pipeline.run(detector()), PipelineExit::SourceFailed);

    assert_eq!(
        events(&harness.history),
        [
            pair("birds", "l0"),
            pair("flowers", "l0"),
            pair("birds", "l1"),
            pair("flowers", "l1"),
            pair("flowers", "l2"),
            pair("birds", "l3"),
            pair("flowers", "l3"),
        ]
    );
    assert_eq!(harness.frames.published(), 4);
}

#[test]
fn model_that_fails_to_load_is_left_out() {
    let dir = tempfile::tempdir().unwrap();
    let labels_path = dir.path().join("labels.txt");
    std::fs::write(&labels_path, labels().join("\n")).unwrap();

    let mut models = Vec::new();
    for category in ["birds", "bugs", "flowers"] {
        let model_path = dir.path().join(format!("{}.tflite", category));
        if category != "bugs" {
            std::fs::write(&model_path, b"model").unwrap();
        }
        models.push(ModelConfig {
            category: category.into(),
            model_path,
            label_path: labels_path.clone(),
            input_width: Some(16),
            input_height: Some(16),
        });
    }

    let mut engine = StubEngine::new(16);
    let registry = Arc::new(ModelRegistry::build(&mut engine, &models));
    assert_eq!(registry.active_categories(), ["birds", "flowers"]);

    let (source, _counters) = ScriptedSource::new(2);
    let (pipeline, harness) = pipeline(source, Box::new(engine), registry, 10);
    pipeline.run(detector());

    let categories: Vec<_> = harness
        .history
        .snapshot()
        .into_iter()
        .map(|e| e.category)
        .collect();
    assert_eq!(categories, ["birds", "flowers", "birds", "flowers"]);
}

#[test]
fn unavailable_device_ends_the_loop() {
    let (mut source, counters) = ScriptedSource::new(10);
    source.fail_open = true;
    let (pipeline, harness) = pipeline(
        source,
        Box::new(ScriptedEngine::new(1)),
        registry(&["birds"]),
        5,
    );

    assert_eq!(pipeline.run(detector()), PipelineExit::DeviceUnavailable);
    assert_eq!(harness.control.status(), PipelineStatus::NoFeed);
    assert_eq!(harness.frames.published(), 0);
    assert_eq!(harness.history.size(), 0);
    assert_eq!(counters.reads.load(Ordering::SeqCst), 0);
}

#[test]
fn pause_releases_device_and_resume_reacquires() {
    let (mut source, counters) = ScriptedSource::new(usize::MAX);
    source.read_delay = Duration::from_millis(5);
    let (pipeline, harness) = pipeline(
        source,
        Box::new(ScriptedEngine::new(1)),
        registry(&["birds"]),
        5,
    );
    let worker = thread::spawn(move || pipeline.run(detector()));

    let frames = harness.frames.clone();
    assert!(wait_until(Duration::from_secs(5), || frames.published() >= 2));

    harness.control.pause();
    let control = harness.control.clone();
    assert!(wait_until(Duration::from_secs(5), || {
        control.status() == PipelineStatus::Paused
    }));
    assert!(!counters.open.load(Ordering::SeqCst));
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);

    let paused_at = harness.frames.published();
    thread::sleep(Duration::from_millis(250));
    assert_eq!(harness.frames.published(), paused_at);

    harness.control.resume();
    assert!(wait_until(Duration::from_secs(5), || {
        frames.published() > paused_at + 1
    }));
    assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
    assert_eq!(harness.control.status(), PipelineStatus::Running);

    harness.control.shutdown();
    assert_eq!(worker.join().unwrap(), PipelineExit::Shutdown);
    assert_eq!(harness.control.status(), PipelineStatus::Stopped);
    assert!(!counters.open.load(Ordering::SeqCst));
    assert_eq!(counters.closes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stalled_client_does_not_hold_back_producer() {
    let (source, _counters) = ScriptedSource::new(20);
    let (pipeline, harness) = pipeline(
        source,
        Box::new(ScriptedEngine::new(1)),
        registry(&["birds"]),
        5,
    );

    // Connected but never polled while the producer runs.
    let mut client = ClientStream::connect(&harness.frames, &harness.control, 1);
    assert_eq!(harness.frames.client_count(), 1);

    let exit = tokio::time::timeout(
        Duration::from_secs(30),
        feedwatch::analytics::spawn_pipeline(pipeline, detector),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(exit, PipelineExit::SourceFailed);
    assert_eq!(harness.frames.published(), 20);

    let latest = harness.frames.latest().unwrap();
    assert_eq!(latest.seq, 20);
    let part = client.next_part().await.unwrap();
    assert_eq!(part, multipart_part(&latest.data));

    drop(client);
    assert_eq!(harness.frames.client_count(), 0);
}

/// Background model pinned to the thread that built it, like an OpenCV
/// subtractor holding a native handle.
struct ThreadBoundBackground {
    inner: GaussianBackground,
    _pinned: Rc<()>,
}

impl BackgroundModel for ThreadBoundBackground {
    fn apply(&mut self, frame: &Frame) -> ForegroundMask {
        self.inner.apply(frame)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

#[tokio::test]
async fn detector_is_built_on_the_producer_thread() {
    let (source, _counters) = ScriptedSource::new(3);
    let (pipeline, harness) = pipeline(
        source,
        Box::new(ScriptedEngine::new(1)),
        registry(&["birds"]),
        5,
    );

    let built_on = Arc::new(Mutex::new(None));
    let record = Arc::clone(&built_on);
    let make_detector = move || {
        *record.lock().unwrap() = Some(thread::current().id());
        let model = ThreadBoundBackground {
            inner: GaussianBackground::new(0.005, 2.5),
            _pinned: Rc::new(()),
        };
        MotionDetector::new(Box::new(model), 500)
    };

    let exit = tokio::time::timeout(
        Duration::from_secs(30),
        feedwatch::analytics::spawn_pipeline(pipeline, make_detector),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(exit, PipelineExit::SourceFailed);
    assert_eq!(harness.frames.published(), 3);

    let built_on = built_on.lock().unwrap().take().unwrap();
    assert_ne!(built_on, thread::current().id());
}
