//! The frame value type and wire constants.

use thiserror::Error;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default upper bound on a single frame's payload length.
///
/// A peer declaring a larger frame is treated as a protocol violation, not as
/// a request to allocate — see [`FrameError::FrameTooLarge`].
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// A length prefix declared more payload bytes than the configured maximum.
    #[error("frame length {length} exceeds maximum of {max} bytes")]
    FrameTooLarge { length: usize, max: usize },

    /// A payload is too large to be described by the 4-byte length field.
    #[error("payload of {length} bytes exceeds the length field's u32 range")]
    EncodeOverflow { length: usize },
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// One complete application-level message as carried over the wire.
///
/// A frame is a value type: it has no identity beyond its position in a
/// connection's byte stream, and the payload is opaque bytes — interpretation
/// (UTF-8 text or otherwise) is entirely up to the layer above the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Vec<u8>,
}

impl Frame {
    /// Wraps a payload in a frame.
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// The payload length in bytes — on the wire this is the value of the
    /// length prefix.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` for a zero-length frame.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Borrows the payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the frame, returning the payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

impl From<Vec<u8>> for Frame {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}
