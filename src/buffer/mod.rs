mod frame_slot;

pub use frame_slot::{EncodedFrame, FrameSlot};
