use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};

use super::{FrameSource, SourceError};
use crate::frame::Frame;

const BACKGROUND: Rgb<u8> = Rgb([96, 110, 88]);
const SQUARE: Rgb<u8> = Rgb([230, 220, 60]);

/// Test-pattern source: a bright square sweeping across a flat background.
///
/// Paced to `fps` so the producer loop behaves as it would against a camera.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    frame_interval: Duration,
    square: u32,
    tick: u64,
    next_due: Option<Instant>,
    open: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        let frame_interval = if fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / fps as f64)
        };
        Self {
            width,
            height,
            frame_interval,
            square: (width.min(height) / 6).max(1),
            tick: 0,
            next_due: None,
            open: false,
        }
    }

    /// Render frame `tick` without pacing or state changes.
    pub fn render(&self, tick: u64) -> RgbImage {
        let mut image = RgbImage::from_pixel(self.width, self.height, BACKGROUND);
        let span = self.width.saturating_sub(self.square).max(1) as u64;
        let x0 = ((tick * 8) % span) as u32;
        let y0 = self.height.saturating_sub(self.square) / 2;

        for y in y0..(y0 + self.square).min(self.height) {
            for x in x0..(x0 + self.square).min(self.width) {
                image.put_pixel(x, y, SQUARE);
            }
        }
        image
    }

    fn pace(&mut self) {
        if self.frame_interval.is_zero() {
            return;
        }
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + self.frame_interval);
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open(&mut self) -> Result<(), SourceError> {
        if self.width == 0 || self.height == 0 {
            return Err(SourceError::DeviceUnavailable(format!(
                "invalid synthetic size {}x{}",
                self.width, self.height
            )));
        }
        self.open = true;
        self.next_due = None;
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, SourceError> {
        if !self.open {
            return Err(SourceError::ReadFailed("source not open".into()));
        }
        self.pace();
        let image = self.render(self.tick);
        self.tick += 1;
        Ok(Frame::new(image))
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
