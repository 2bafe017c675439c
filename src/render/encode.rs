use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use thiserror::Error;

use crate::frame::Frame;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("cannot encode empty frame")]
    EmptyFrame,
    #[error("jpeg encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

/// JPEG encoder with a fixed quality.
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    quality: u8,
}

impl FrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>, EncodeError> {
        if frame.is_empty() {
            return Err(EncodeError::EmptyFrame);
        }
        let mut buf = Vec::with_capacity(frame.image.as_raw().len() / 8);
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, self.quality);
        encoder.encode(
            frame.image.as_raw(),
            frame.width(),
            frame.height(),
            ExtendedColorType::Rgb8,
        )?;
        Ok(buf)
    }
}
