//! Length-prefixed frame codec.
//!
//! [`encode_frame`] is a pure function from payload bytes to wire bytes.
//! [`FrameDecoder`] is the stateful half: it accumulates raw socket reads and
//! yields complete frames, keeping any incomplete trailer buffered until the
//! rest of it arrives. The decoder never blocks and never over-reads — one
//! call extracts whatever is decodable from the bytes fed so far, no more.

use crate::protocol::frame::{Frame, FrameError, LENGTH_PREFIX_SIZE};

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encodes a payload into wire bytes: 4-byte big-endian length, then the raw
/// payload.
///
/// Pure and infallible for any payload the length field can describe. The
/// payload is never truncated: an oversized one is rejected before a single
/// byte is produced.
///
/// # Errors
///
/// Returns [`FrameError::EncodeOverflow`] if the payload length does not fit
/// in a `u32`.
///
/// # Examples
///
/// ```rust
/// use framehub_core::encode_frame;
///
/// let bytes = encode_frame(b"hi").unwrap();
/// assert_eq!(bytes, [0, 0, 0, 2, b'h', b'i']);
/// ```
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let length = checked_wire_length(payload.len())?;
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&length.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Validates that a payload length fits the 4-byte length field.
fn checked_wire_length(payload_len: usize) -> Result<u32, FrameError> {
    u32::try_from(payload_len).map_err(|_| FrameError::EncodeOverflow {
        length: payload_len,
    })
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Framing state: between frames, or mid-frame with a known body length.
///
/// The length prefix is consumed into the state as soon as it is readable;
/// the accumulation buffer then holds only not-yet-consumed stream bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    AwaitingLength,
    AwaitingBody(usize),
}

/// Incremental decoder for one connection's inbound byte stream.
///
/// Feed it whatever fragments the socket produced — half a frame, three
/// frames back-to-back, a single byte — and pull complete frames with
/// [`next_frame`](FrameDecoder::next_frame). Decoded output is invariant
/// under re-fragmentation of the input.
///
/// A declared length above the configured maximum is a protocol violation:
/// the decoder reports [`FrameError::FrameTooLarge`] *before* buffering or
/// allocating any of the body, and stays in the failed state on every
/// subsequent call (the connection is expected to be closed).
///
/// # Examples
///
/// ```rust
/// use framehub_core::{encode_frame, FrameDecoder, DEFAULT_MAX_FRAME_SIZE};
///
/// let wire = encode_frame(b"split me").unwrap();
/// let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_SIZE);
///
/// // Deliver the frame in two arbitrary fragments.
/// decoder.feed(&wire[..3]);
/// assert!(decoder.next_frame().unwrap().is_none());
///
/// decoder.feed(&wire[3..]);
/// let frame = decoder.next_frame().unwrap().expect("complete frame");
/// assert_eq!(frame.payload(), b"split me");
/// ```
#[derive(Debug)]
pub struct FrameDecoder {
    max_frame_size: usize,
    state: DecodeState,
    buf: Vec<u8>,
    failed: Option<FrameError>,
}

impl FrameDecoder {
    /// Creates a decoder that rejects frames whose declared payload length
    /// exceeds `max_frame_size`.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            state: DecodeState::AwaitingLength,
            buf: Vec::new(),
            failed: None,
        }
    }

    /// Appends freshly read stream bytes to the accumulation buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extracts the next complete frame, if the buffered bytes contain one.
    ///
    /// Returns `Ok(None)` when more bytes are needed; call again after the
    /// next [`feed`](FrameDecoder::feed). Callers should loop until `None`:
    /// a single read event may complete zero, one, or many frames.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::FrameTooLarge`] when a length prefix exceeds the
    /// configured maximum, and on every call thereafter.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if let Some(err) = self.failed {
            return Err(err);
        }

        loop {
            match self.state {
                DecodeState::AwaitingLength => {
                    if self.buf.len() < LENGTH_PREFIX_SIZE {
                        return Ok(None);
                    }
                    let length = u32::from_be_bytes([
                        self.buf[0],
                        self.buf[1],
                        self.buf[2],
                        self.buf[3],
                    ]) as usize;
                    if length > self.max_frame_size {
                        let err = FrameError::FrameTooLarge {
                            length,
                            max: self.max_frame_size,
                        };
                        self.failed = Some(err);
                        return Err(err);
                    }
                    self.buf.drain(..LENGTH_PREFIX_SIZE);
                    self.state = DecodeState::AwaitingBody(length);
                }
                DecodeState::AwaitingBody(length) => {
                    if self.buf.len() < length {
                        return Ok(None);
                    }
                    let payload: Vec<u8> = self.buf.drain(..length).collect();
                    self.state = DecodeState::AwaitingLength;
                    return Ok(Some(Frame::new(payload)));
                }
            }
        }
    }

    /// Number of received-but-unconsumed wire bytes, counting a length prefix
    /// already folded into the framing state.
    ///
    /// Zero exactly when the stream sits on a frame boundary.
    pub fn pending_bytes(&self) -> usize {
        match self.state {
            DecodeState::AwaitingLength => self.buf.len(),
            DecodeState::AwaitingBody(_) => LENGTH_PREFIX_SIZE + self.buf.len(),
        }
    }

    /// The maximum payload length this decoder accepts.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> FrameDecoder {
        FrameDecoder::new(1024)
    }

    /// Pulls every currently decodable frame out of the decoder.
    fn drain(decoder: &mut FrameDecoder) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = decoder.next_frame().expect("decode must succeed") {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_encode_prepends_big_endian_length() {
        let bytes = encode_frame(b"abc").unwrap();
        assert_eq!(bytes, [0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_encode_empty_payload_is_four_zero_bytes() {
        let bytes = encode_frame(&[]).unwrap();
        assert_eq!(bytes, [0, 0, 0, 0]);
    }

    #[test]
    fn test_checked_wire_length_rejects_beyond_u32() {
        // The validation path is tested directly rather than allocating a
        // 4 GiB payload.
        assert_eq!(checked_wire_length(0), Ok(0));
        assert_eq!(checked_wire_length(u32::MAX as usize), Ok(u32::MAX));
        assert_eq!(
            checked_wire_length(u32::MAX as usize + 1),
            Err(FrameError::EncodeOverflow {
                length: u32::MAX as usize + 1
            })
        );
    }

    #[test]
    fn test_decode_single_frame_roundtrip() {
        let mut dec = decoder();
        dec.feed(&encode_frame(b"send from client").unwrap());

        let frames = drain(&mut dec);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"send from client");
        assert_eq!(dec.pending_bytes(), 0);
    }

    #[test]
    fn test_decode_zero_length_frame_yields_empty_payload() {
        let mut dec = decoder();
        dec.feed(&[0, 0, 0, 0]);

        let frames = drain(&mut dec);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_empty());
    }

    #[test]
    fn test_decode_waits_for_missing_body_bytes() {
        let mut dec = decoder();
        let wire = encode_frame(b"partial").unwrap();

        // Length prefix plus one body byte: not yet decodable.
        dec.feed(&wire[..LENGTH_PREFIX_SIZE + 1]);
        assert!(dec.next_frame().unwrap().is_none());
        assert_eq!(dec.pending_bytes(), 5);

        dec.feed(&wire[LENGTH_PREFIX_SIZE + 1..]);
        let frame = dec.next_frame().unwrap().expect("now complete");
        assert_eq!(frame.payload(), b"partial");
    }

    #[test]
    fn test_decode_byte_by_byte_matches_whole_buffer() {
        let payloads: [&[u8]; 3] = [b"first", b"", b"third message"];
        let mut wire = Vec::new();
        for p in payloads {
            wire.extend_from_slice(&encode_frame(p).unwrap());
        }

        let mut whole = decoder();
        whole.feed(&wire);
        let expected = drain(&mut whole);

        let mut fragmented = decoder();
        let mut got = Vec::new();
        for byte in &wire {
            fragmented.feed(std::slice::from_ref(byte));
            got.extend(drain(&mut fragmented));
        }

        assert_eq!(got, expected);
        assert_eq!(fragmented.pending_bytes(), 0);
    }

    #[test]
    fn test_decode_many_frames_from_one_feed() {
        let mut dec = decoder();
        for i in 0..5u8 {
            dec.feed(&encode_frame(&[i; 3]).unwrap());
        }

        let frames = drain(&mut dec);
        assert_eq!(frames.len(), 5);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.payload(), &[i as u8; 3]);
        }
        assert_eq!(dec.pending_bytes(), 0);
    }

    #[test]
    fn test_oversized_length_rejected_before_body_arrives() {
        let mut dec = decoder();
        // Declare 2048 bytes against a 1024-byte maximum; send no body at all.
        dec.feed(&2048u32.to_be_bytes());

        assert_eq!(
            dec.next_frame(),
            Err(FrameError::FrameTooLarge {
                length: 2048,
                max: 1024
            })
        );
    }

    #[test]
    fn test_failed_decoder_keeps_returning_the_error() {
        let mut dec = decoder();
        dec.feed(&u32::MAX.to_be_bytes());

        let first = dec.next_frame();
        assert!(matches!(first, Err(FrameError::FrameTooLarge { .. })));

        // Further feeds must not resurrect the stream.
        dec.feed(&encode_frame(b"ok").unwrap());
        assert_eq!(dec.next_frame(), first);
    }

    #[test]
    fn test_length_at_exact_maximum_is_accepted() {
        let mut dec = decoder();
        let payload = vec![0xAB; dec.max_frame_size()];
        dec.feed(&encode_frame(&payload).unwrap());

        let frame = dec.next_frame().unwrap().expect("maximum-size frame");
        assert_eq!(frame.len(), 1024);
    }

    #[test]
    fn test_pending_bytes_counts_consumed_prefix() {
        let mut dec = decoder();
        dec.feed(&10u32.to_be_bytes());
        assert!(dec.next_frame().unwrap().is_none());

        // The prefix was folded into the framing state but the wire bytes are
        // still pending.
        assert_eq!(dec.pending_bytes(), 4);
        dec.feed(&[0; 4]);
        assert_eq!(dec.pending_bytes(), 8);
    }
}
