//! Frame and motion-region types shared across the pipeline.

use std::time::{SystemTime, UNIX_EPOCH};

use image::RgbImage;

/// One acquired camera image, stored as packed RGB.
///
/// Owned by the cycle that captured it; dimensions are fixed at acquisition.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: SystemTime,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: SystemTime::now(),
        }
    }

    /// Build a frame from packed RGB bytes. Returns `None` if the buffer
    /// length does not match `width * height * 3`.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        RgbImage::from_raw(width, height, data).map(Self::new)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// Axis-aligned box of foreground activity for one detection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub observed_at: SystemTime,
}

pub fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
