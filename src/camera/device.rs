use opencv::core::Mat;
use opencv::imgproc;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};

use super::{FrameSource, SourceError};
use crate::config::CameraConfig;
use crate::frame::Frame;

/// USB/V4L camera opened by device index through OpenCV.
pub struct CameraSource {
    name: String,
    device: i32,
    width: u32,
    height: u32,
    fps: u32,
    capture: Option<VideoCapture>,
}

impl CameraSource {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            name: format!("video{}", config.device),
            device: config.device,
            width: config.width,
            height: config.height,
            fps: config.fps,
            capture: None,
        }
    }

    fn configure(&self, capture: &mut VideoCapture) {
        let props = [
            (videoio::CAP_PROP_FRAME_WIDTH, self.width as f64),
            (videoio::CAP_PROP_FRAME_HEIGHT, self.height as f64),
            (videoio::CAP_PROP_FPS, self.fps as f64),
        ];
        for (prop, value) in props {
            // Drivers may ignore unsupported properties; the frame size is
            // taken from what the device actually delivers.
            if let Err(e) = capture.set(prop, value) {
                tracing::debug!(camera = %self.name, prop, error = %e, "camera property rejected");
            }
        }
    }
}

impl FrameSource for CameraSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<(), SourceError> {
        let mut capture = VideoCapture::new(self.device, videoio::CAP_ANY)
            .map_err(|e| SourceError::DeviceUnavailable(e.to_string()))?;

        let opened = capture
            .is_opened()
            .map_err(|e| SourceError::DeviceUnavailable(e.to_string()))?;
        if !opened {
            let _ = capture.release();
            return Err(SourceError::DeviceUnavailable(format!(
                "could not open camera {}",
                self.device
            )));
        }

        self.configure(&mut capture);
        self.capture = Some(capture);
        tracing::info!(camera = %self.name, "camera initialized");
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, SourceError> {
        let capture = self
            .capture
            .as_mut()
            .ok_or_else(|| SourceError::ReadFailed("camera not open".into()))?;

        let mut bgr = Mat::default();
        let grabbed = capture
            .read(&mut bgr)
            .map_err(|e| SourceError::ReadFailed(e.to_string()))?;
        if !grabbed || bgr.rows() == 0 || bgr.cols() == 0 {
            return Err(SourceError::ReadFailed("no frame from camera".into()));
        }

        let mut rgb = Mat::default();
        imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0)
            .map_err(|e| SourceError::ReadFailed(e.to_string()))?;

        let data = rgb
            .data_bytes()
            .map_err(|e| SourceError::ReadFailed(e.to_string()))?
            .to_vec();

        Frame::from_rgb(rgb.cols() as u32, rgb.rows() as u32, data)
            .ok_or_else(|| SourceError::ReadFailed("unexpected frame layout".into()))
    }

    fn close(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.release() {
                tracing::warn!(camera = %self.name, error = %e, "camera release failed");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.capture.is_some()
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}
