use std::time::SystemTime;

use image::RgbImage;

use crate::config::{MotionBackend, MotionConfig};
use crate::frame::{Frame, MotionRegion};

const INITIAL_VARIANCE: f32 = 15.0 * 15.0;
const MIN_VARIANCE: f32 = 4.0 * 4.0;

/// Binary foreground mask, row-major, one entry per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundMask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<bool>,
}

impl ForegroundMask {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![false; width as usize * height as usize],
        }
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&fg| fg).count()
    }
}

/// Per-pixel background statistics updated on every frame.
pub trait BackgroundModel {
    fn apply(&mut self, frame: &Frame) -> ForegroundMask;

    /// Forget learned statistics, e.g. after the camera was reacquired.
    fn reset(&mut self);
}

fn luma(image: &RgbImage) -> Vec<f32> {
    image
        .pixels()
        .map(|p| 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32)
        .collect()
}

/// Running Gaussian per pixel on luma.
///
/// The first frame (and any frame whose size differs from the model) seeds
/// the statistics and reports an empty mask.
pub struct GaussianBackground {
    learning_rate: f32,
    deviation_threshold: f32,
    width: u32,
    height: u32,
    mean: Vec<f32>,
    variance: Vec<f32>,
}

impl GaussianBackground {
    pub fn new(learning_rate: f32, deviation_threshold: f32) -> Self {
        Self {
            learning_rate: learning_rate.clamp(0.0, 1.0),
            deviation_threshold,
            width: 0,
            height: 0,
            mean: Vec::new(),
            variance: Vec::new(),
        }
    }

    fn seed(&mut self, frame: &Frame, values: Vec<f32>) {
        self.width = frame.width();
        self.height = frame.height();
        self.variance = vec![INITIAL_VARIANCE; values.len()];
        self.mean = values;
    }
}

impl BackgroundModel for GaussianBackground {
    fn apply(&mut self, frame: &Frame) -> ForegroundMask {
        let values = luma(&frame.image);

        if self.mean.is_empty() || self.width != frame.width() || self.height != frame.height() {
            self.seed(frame, values);
            return ForegroundMask::empty(frame.width(), frame.height());
        }

        let alpha = self.learning_rate;
        let k2 = self.deviation_threshold * self.deviation_threshold;
        let mut data = Vec::with_capacity(values.len());

        for (i, value) in values.into_iter().enumerate() {
            let diff = value - self.mean[i];
            let d2 = diff * diff;
            data.push(d2 > k2 * self.variance[i]);

            self.mean[i] += alpha * diff;
            self.variance[i] =
                (self.variance[i] + alpha * (d2 - self.variance[i])).max(MIN_VARIANCE);
        }

        ForegroundMask {
            width: self.width,
            height: self.height,
            data,
        }
    }

    fn reset(&mut self) {
        self.mean.clear();
        self.variance.clear();
        self.width = 0;
        self.height = 0;
    }
}

/// Fixed reference image; a pixel is foreground when its luma differs from
/// the reference by more than `threshold`. Deterministic, never learns.
pub struct ReferenceBackground {
    reference: Vec<f32>,
    width: u32,
    height: u32,
    threshold: f32,
}

impl ReferenceBackground {
    pub fn new(reference: &RgbImage, threshold: f32) -> Self {
        Self {
            reference: luma(reference),
            width: reference.width(),
            height: reference.height(),
            threshold,
        }
    }
}

impl BackgroundModel for ReferenceBackground {
    fn apply(&mut self, frame: &Frame) -> ForegroundMask {
        if frame.width() != self.width || frame.height() != self.height {
            return ForegroundMask::empty(frame.width(), frame.height());
        }
        let data = luma(&frame.image)
            .into_iter()
            .zip(&self.reference)
            .map(|(value, reference)| (value - reference).abs() > self.threshold)
            .collect();
        ForegroundMask {
            width: self.width,
            height: self.height,
            data,
        }
    }

    fn reset(&mut self) {}
}

#[cfg(feature = "opencv")]
pub use mog2::Mog2Background;

#[cfg(feature = "opencv")]
mod mog2 {
    use opencv::{
        core::{Mat, Ptr},
        imgproc,
        prelude::*,
        video::{self, BackgroundSubtractorTrait},
    };

    use super::{BackgroundModel, ForegroundMask};
    use crate::frame::Frame;

    const HISTORY: i32 = 500;
    const VAR_THRESHOLD: f64 = 16.0;
    // MOG2 marks shadows as 127; only definite foreground (255) survives.
    const SHADOW_CUTOFF: f64 = 127.0;

    pub struct Mog2Background {
        mog2: Ptr<video::BackgroundSubtractorMOG2>,
        fg_mask: Mat,
        learning_rate: f64,
    }

    impl Mog2Background {
        pub fn new() -> opencv::Result<Self> {
            Ok(Self {
                mog2: video::create_background_subtractor_mog2(HISTORY, VAR_THRESHOLD, true)?,
                fg_mask: Mat::default(),
                learning_rate: -1.0,
            })
        }

        fn try_apply(&mut self, frame: &Frame) -> opencv::Result<ForegroundMask> {
            let (width, height) = (frame.width(), frame.height());
            let flat = Mat::from_slice(frame.image.as_raw())?;
            let rgb = flat.reshape(3, height as i32)?.try_clone()?;

            BackgroundSubtractorTrait::apply(
                &mut self.mog2,
                &rgb,
                &mut self.fg_mask,
                self.learning_rate,
            )?;

            let mut binary = Mat::default();
            imgproc::threshold(
                &self.fg_mask,
                &mut binary,
                SHADOW_CUTOFF,
                255.0,
                imgproc::THRESH_BINARY,
            )?;

            let data = binary.data_bytes()?.iter().map(|&v| v > 0).collect();
            Ok(ForegroundMask {
                width,
                height,
                data,
            })
        }
    }

    impl BackgroundModel for Mog2Background {
        fn apply(&mut self, frame: &Frame) -> ForegroundMask {
            match self.try_apply(frame) {
                Ok(mask) => mask,
                Err(e) => {
                    tracing::trace!(error = %e, "mog2 apply failed");
                    ForegroundMask::empty(frame.width(), frame.height())
                }
            }
        }

        fn reset(&mut self) {
            match video::create_background_subtractor_mog2(HISTORY, VAR_THRESHOLD, true) {
                Ok(mog2) => self.mog2 = mog2,
                Err(e) => tracing::warn!(error = %e, "failed to reset mog2 model"),
            }
        }
    }
}

/// Stateful motion detector. Not reentrant: one instance per camera, built
/// on the thread that drives it.
pub struct MotionDetector {
    model: Box<dyn BackgroundModel>,
    min_area: u32,
}

impl MotionDetector {
    pub fn new(model: Box<dyn BackgroundModel>, min_area: u32) -> Self {
        Self { model, min_area }
    }

    pub fn from_config(config: &MotionConfig) -> Self {
        let model: Box<dyn BackgroundModel> = match config.backend {
            MotionBackend::Gaussian => Box::new(GaussianBackground::new(
                config.learning_rate,
                config.deviation_threshold,
            )),
            #[cfg(feature = "opencv")]
            MotionBackend::Mog2 => match Mog2Background::new() {
                Ok(m) => Box::new(m),
                Err(e) => {
                    tracing::warn!(error = %e, "mog2 unavailable, using gaussian background");
                    Box::new(GaussianBackground::new(
                        config.learning_rate,
                        config.deviation_threshold,
                    ))
                }
            },
            #[cfg(not(feature = "opencv"))]
            MotionBackend::Mog2 => {
                tracing::warn!("built without opencv, using gaussian background");
                Box::new(GaussianBackground::new(
                    config.learning_rate,
                    config.deviation_threshold,
                ))
            }
        };
        Self::new(model, config.min_area)
    }

    pub fn detect(&mut self, frame: &Frame) -> Vec<MotionRegion> {
        if frame.is_empty() {
            return Vec::new();
        }
        let mask = self.model.apply(frame);
        bounding_regions(&mask, self.min_area, frame.captured_at)
    }

    pub fn reset(&mut self) {
        self.model.reset();
    }
}

/// 8-connected components of `mask` whose pixel count is strictly greater
/// than `min_area`, as bounding boxes sorted by (y, x).
pub fn bounding_regions(
    mask: &ForegroundMask,
    min_area: u32,
    observed_at: SystemTime,
) -> Vec<MotionRegion> {
    let width = mask.width as usize;
    let height = mask.height as usize;
    let mut visited = vec![false; mask.data.len()];
    let mut stack = Vec::new();
    let mut regions = Vec::new();

    for start in 0..mask.data.len() {
        if !mask.data[start] || visited[start] {
            continue;
        }

        visited[start] = true;
        stack.push(start);
        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);
        let mut pixels = 0u64;

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % width, idx / width);
            pixels += 1;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = x as i64 + dx;
                    let ny = y as i64 + dy;
                    if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                        continue;
                    }
                    let n = ny as usize * width + nx as usize;
                    if mask.data[n] && !visited[n] {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        if pixels > min_area as u64 {
            regions.push(MotionRegion {
                x: min_x as u32,
                y: min_y as u32,
                width: (max_x - min_x + 1) as u32,
                height: (max_y - min_y + 1) as u32,
                observed_at,
            });
        }
    }

    regions.sort_by_key(|r| (r.y, r.x));
    regions
}
