//! # framehub-core
//!
//! Shared library for framehub containing the wire framing protocol: the
//! [`Frame`] value type and the length-prefixed codec that assembles frames
//! out of an arbitrarily segmented TCP byte stream.
//!
//! This crate is used by the server and by any peer implementation.
//! It has zero dependencies on OS APIs, network sockets, or threads.
//!
//! # Wire format
//!
//! Every message on the wire is a *frame*:
//!
//! ```text
//! +----------------+------------------------+
//! | length: uint32 | payload: length bytes  |
//! +----------------+------------------------+
//! ```
//!
//! The length field is big-endian and counts only the payload bytes. There is
//! no magic number and no version byte. A length of zero is a valid frame
//! with an empty payload.
//!
//! TCP delivers a byte stream, not messages: a single `read` can return half
//! a frame, three frames, or three frames and a half. The [`FrameDecoder`]
//! owns the accumulation buffer that bridges that gap — callers feed it raw
//! bytes in whatever fragments the socket produced and pull out complete
//! frames as they become decodable.

pub mod protocol;

// Re-export the most-used items at the crate root so callers can write
// `framehub_core::FrameDecoder` instead of the full path.
pub use protocol::codec::{encode_frame, FrameDecoder};
pub use protocol::frame::{Frame, FrameError, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
