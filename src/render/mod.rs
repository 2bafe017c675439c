mod annotate;
mod encode;

pub use annotate::{caption, Annotator};
pub use encode::{EncodeError, FrameEncoder};
