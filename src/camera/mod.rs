#[cfg(feature = "opencv")]
mod device;
mod synthetic;

use thiserror::Error;

use crate::frame::Frame;

#[cfg(feature = "opencv")]
pub use device::CameraSource;
pub use synthetic::SyntheticSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("camera device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("frame read failed: {0}")]
    ReadFailed(String),
}

/// A camera-like producer of frames.
///
/// `read` may block until a frame is ready and never retries on its own.
/// `close` must be idempotent and safe after a partially failed `open`.
pub trait FrameSource: Send {
    fn name(&self) -> &str;

    fn open(&mut self) -> Result<(), SourceError>;

    fn read(&mut self) -> Result<Frame, SourceError>;

    fn close(&mut self);

    fn is_open(&self) -> bool;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn open(&mut self) -> Result<(), SourceError> {
        (**self).open()
    }

    fn read(&mut self) -> Result<Frame, SourceError> {
        (**self).read()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

/// Scoped ownership of a frame source.
///
/// Every exit path (pause, error, shutdown, unwinding) funnels through
/// `release`, which `Drop` also calls.
pub struct SourceGuard<S: FrameSource> {
    source: S,
}

impl<S: FrameSource> SourceGuard<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn acquire(&mut self) -> Result<(), SourceError> {
        if self.source.is_open() {
            return Ok(());
        }
        tracing::info!(camera = %self.source.name(), "acquiring frame source");
        if let Err(e) = self.source.open() {
            self.source.close();
            return Err(e);
        }
        Ok(())
    }

    pub fn release(&mut self) {
        if self.source.is_open() {
            tracing::info!(camera = %self.source.name(), "releasing frame source");
        }
        self.source.close();
    }

    pub fn is_acquired(&self) -> bool {
        self.source.is_open()
    }

    pub fn read(&mut self) -> Result<Frame, SourceError> {
        self.source.read()
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }
}

impl<S: FrameSource> Drop for SourceGuard<S> {
    fn drop(&mut self) {
        self.release();
    }
}
