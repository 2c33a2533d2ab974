//! Protocol module containing the frame type and the wire codec.

pub mod codec;
pub mod frame;

pub use codec::{encode_frame, FrameDecoder};
pub use frame::{Frame, FrameError, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
