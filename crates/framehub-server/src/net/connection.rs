//! State for one accepted socket.
//!
//! A [`Connection`] owns the nonblocking stream plus everything the reactor
//! needs to drive it: the frame decoder accumulating inbound bytes, the send
//! queue holding not-yet-written outbound bytes, the interest the socket is
//! currently registered with, and an activity timestamp for the idle check.
//!
//! The readiness handlers here never block and never loop forever: reads and
//! writes drain the socket until it reports `WouldBlock`, then hand control
//! straight back to the reactor. A connection never closes itself either — it
//! reports *why* it should be closed via [`CloseCause`] and leaves the actual
//! teardown to the reactor, which owns the registry and the poll registration.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use framehub_core::{Frame, FrameDecoder, FrameError};
use mio::net::TcpStream;
use mio::{Interest, Token};

use crate::events::{CloseReason, ConnectionId};

/// Stack buffer size for one `read` call. Large reads arrive over several
/// readiness events; the decoder reassembles across all of them.
pub(crate) const READ_CHUNK_SIZE: usize = 4096;

// ── Send queue ────────────────────────────────────────────────────────────────

/// Outbound bytes the socket has not accepted yet.
///
/// Chunks are written strictly in FIFO order. `cursor` tracks how much of the
/// front chunk has already been written, so a partial write resumes exactly
/// where the socket stopped.
#[derive(Debug, Default)]
struct SendQueue {
    chunks: VecDeque<Vec<u8>>,
    cursor: usize,
}

impl SendQueue {
    fn push(&mut self, bytes: Vec<u8>) {
        debug_assert!(!bytes.is_empty(), "empty chunks would stall the cursor");
        self.chunks.push_back(bytes);
    }

    fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// The unwritten tail of the front chunk, or `None` when fully flushed.
    fn front_remaining(&self) -> Option<&[u8]> {
        self.chunks.front().map(|chunk| &chunk[self.cursor..])
    }

    /// Records that `written` more bytes of the front chunk went out.
    fn advance(&mut self, written: usize) {
        self.cursor += written;
        if let Some(front) = self.chunks.front() {
            debug_assert!(self.cursor <= front.len());
            if self.cursor == front.len() {
                self.chunks.pop_front();
                self.cursor = 0;
            }
        }
    }
}

// ── Readiness outcomes ────────────────────────────────────────────────────────

/// Why a connection must be torn down, as observed at the socket.
#[derive(Debug)]
pub enum CloseCause {
    /// The peer closed its end of the stream (EOF on read).
    PeerClosed,
    /// A socket-level read or write failed.
    Io(std::io::Error),
    /// The inbound byte stream violated framing rules.
    Protocol(FrameError),
}

impl CloseCause {
    /// The lifecycle reason this cause maps to.
    pub fn reason(&self) -> CloseReason {
        match self {
            CloseCause::PeerClosed => CloseReason::PeerClosed,
            CloseCause::Io(_) => CloseReason::IoError,
            CloseCause::Protocol(_) => CloseReason::ProtocolViolation,
        }
    }
}

/// Result of draining a readable socket once.
///
/// `frames` and `close` are not exclusive: frames decoded from earlier bytes
/// are still delivered even when the same burst ended in EOF or a framing
/// violation.
#[derive(Debug, Default)]
pub struct ReadOutcome {
    /// Complete frames decoded from this readiness event, in arrival order.
    pub frames: Vec<Frame>,
    /// Set when the connection must be closed after the frames are handled.
    pub close: Option<CloseCause>,
}

/// Result of flushing the send queue once.
#[derive(Debug)]
pub enum WriteOutcome {
    /// Everything queued has been handed to the socket.
    Flushed,
    /// The socket stopped accepting bytes; the queue keeps the rest.
    Partial,
    /// The connection failed while writing.
    Closed(CloseCause),
}

// ── Connection ────────────────────────────────────────────────────────────────

/// One accepted socket with its framing and write state.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    stream: TcpStream,
    token: Token,
    peer_addr: SocketAddr,
    decoder: FrameDecoder,
    send_queue: SendQueue,
    registered_interest: Interest,
    last_activity: Instant,
    frames_decoded: u64,
}

impl Connection {
    /// Wraps a freshly accepted stream. The caller is expected to have
    /// registered it with the poll under `token` for `READABLE`.
    pub fn new(
        id: ConnectionId,
        stream: TcpStream,
        token: Token,
        peer_addr: SocketAddr,
        max_frame_size: usize,
    ) -> Self {
        Self {
            id,
            stream,
            token,
            peer_addr,
            decoder: FrameDecoder::new(max_frame_size),
            send_queue: SendQueue::default(),
            registered_interest: Interest::READABLE,
            last_activity: Instant::now(),
            frames_decoded: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Total complete frames decoded over the connection's lifetime.
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// The interest the socket is currently registered with.
    pub fn registered_interest(&self) -> Interest {
        self.registered_interest
    }

    /// Records a reregistration performed by the reactor.
    pub fn set_registered_interest(&mut self, interest: Interest) {
        self.registered_interest = interest;
    }

    /// The interest the socket *should* be registered with: always readable,
    /// writable only while there is queued output.
    pub fn desired_interest(&self) -> Interest {
        if self.send_queue.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        }
    }

    /// Mutable access to the underlying stream for poll (de)registration.
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// True when no byte has moved in either direction for `window`.
    pub fn is_idle(&self, window: Duration) -> bool {
        self.last_activity.elapsed() >= window
    }

    /// Queues already-encoded wire bytes for delivery.
    ///
    /// Nothing is written here; the reactor flushes on the next writable
    /// readiness event after it arms `WRITABLE` interest.
    pub fn enqueue_send(&mut self, wire_bytes: Vec<u8>) {
        self.send_queue.push(wire_bytes);
    }

    /// Drains the readable socket and decodes whatever completed.
    ///
    /// Reads until `WouldBlock` (the socket is edge-notified, so stopping
    /// earlier could strand buffered bytes), feeding every chunk into the
    /// decoder, then extracts all complete frames. EOF, read errors, and
    /// framing violations are reported in [`ReadOutcome::close`]; a framing
    /// violation takes precedence as the recorded cause since it describes
    /// what the peer actually did wrong.
    pub fn on_readable(&mut self) -> ReadOutcome {
        let mut outcome = ReadOutcome::default();
        let mut buf = [0u8; READ_CHUNK_SIZE];

        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    outcome.close = Some(CloseCause::PeerClosed);
                    break;
                }
                Ok(n) => {
                    self.decoder.feed(&buf[..n]);
                    self.last_activity = Instant::now();
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    outcome.close = Some(CloseCause::Io(e));
                    break;
                }
            }
        }

        loop {
            match self.decoder.next_frame() {
                Ok(Some(frame)) => {
                    self.frames_decoded += 1;
                    outcome.frames.push(frame);
                }
                Ok(None) => break,
                Err(err) => {
                    outcome.close = Some(CloseCause::Protocol(err));
                    break;
                }
            }
        }

        outcome
    }

    /// Writes queued bytes until the queue empties or the socket pushes back.
    pub fn on_writable(&mut self) -> WriteOutcome {
        while let Some(remaining) = self.send_queue.front_remaining() {
            match self.stream.write(remaining) {
                Ok(0) => {
                    return WriteOutcome::Closed(CloseCause::Io(
                        std::io::ErrorKind::WriteZero.into(),
                    ));
                }
                Ok(n) => {
                    self.send_queue.advance(n);
                    self.last_activity = Instant::now();
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return WriteOutcome::Partial;
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return WriteOutcome::Closed(CloseCause::Io(e)),
            }
        }
        WriteOutcome::Flushed
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use framehub_core::encode_frame;
    use std::net::{TcpListener as StdTcpListener, TcpStream as StdTcpStream};
    use uuid::Uuid;

    const TEST_MAX_FRAME: usize = 1024;

    /// A nonblocking connection wired to a blocking std peer over loopback.
    fn socket_pair() -> (Connection, StdTcpStream) {
        let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        let peer = StdTcpStream::connect(addr).expect("connect peer");
        peer.set_read_timeout(Some(Duration::from_secs(2)))
            .expect("read timeout");
        let (accepted, peer_addr) = listener.accept().expect("accept");
        accepted.set_nonblocking(true).expect("nonblocking");
        let conn = Connection::new(
            Uuid::new_v4(),
            TcpStream::from_std(accepted),
            Token(7),
            peer_addr,
            TEST_MAX_FRAME,
        );
        (conn, peer)
    }

    /// Polls `on_readable` until `stop` is satisfied (or two seconds pass),
    /// accumulating frames across calls. Loopback delivery is asynchronous,
    /// so a single call may land before the bytes do.
    fn collect_reads(conn: &mut Connection, stop: impl Fn(&ReadOutcome) -> bool) -> ReadOutcome {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut all = ReadOutcome::default();
        loop {
            let mut outcome = conn.on_readable();
            all.frames.append(&mut outcome.frames);
            if outcome.close.is_some() {
                all.close = outcome.close;
            }
            if stop(&all) || Instant::now() >= deadline {
                return all;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    // ── Send queue ────────────────────────────────────────────────────────────

    #[test]
    fn test_send_queue_resumes_mid_chunk_after_partial_write() {
        let mut q = SendQueue::default();
        q.push(vec![1, 2, 3, 4]);
        q.push(vec![5, 6]);

        assert_eq!(q.front_remaining(), Some(&[1u8, 2, 3, 4][..]));
        q.advance(3);
        assert_eq!(q.front_remaining(), Some(&[4u8][..]));
        q.advance(1);
        assert_eq!(q.front_remaining(), Some(&[5u8, 6][..]));
        q.advance(2);
        assert!(q.is_empty());
        assert_eq!(q.front_remaining(), None);
    }

    #[test]
    fn test_desired_interest_follows_the_send_queue() {
        let (mut conn, _peer) = socket_pair();
        assert_eq!(conn.desired_interest(), Interest::READABLE);

        conn.enqueue_send(b"queued".to_vec());
        assert_eq!(
            conn.desired_interest(),
            Interest::READABLE | Interest::WRITABLE
        );

        assert!(matches!(conn.on_writable(), WriteOutcome::Flushed));
        assert_eq!(conn.desired_interest(), Interest::READABLE);
    }

    #[test]
    fn test_on_writable_delivers_queued_bytes_to_the_peer() {
        let (mut conn, mut peer) = socket_pair();
        conn.enqueue_send(b"hello".to_vec());
        conn.enqueue_send(b" world".to_vec());

        assert!(matches!(conn.on_writable(), WriteOutcome::Flushed));

        let mut buf = [0u8; 11];
        peer.read_exact(&mut buf).expect("read flushed bytes");
        assert_eq!(&buf, b"hello world");
    }

    // ── Reading and decoding ──────────────────────────────────────────────────

    #[test]
    fn test_on_readable_decodes_a_whole_frame() {
        let (mut conn, mut peer) = socket_pair();
        peer.write_all(&encode_frame(b"ping").unwrap()).unwrap();

        let outcome = collect_reads(&mut conn, |o| !o.frames.is_empty());

        assert_eq!(outcome.frames.len(), 1);
        assert_eq!(outcome.frames[0].payload(), b"ping");
        assert!(outcome.close.is_none());
        assert_eq!(conn.frames_decoded(), 1);
    }

    #[test]
    fn test_fragmented_frame_stays_buffered_until_complete() {
        let (mut conn, mut peer) = socket_pair();
        let wire = encode_frame(b"fragmented").unwrap();

        peer.write_all(&wire[..6]).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let early = conn.on_readable();
        assert!(early.frames.is_empty());
        assert!(early.close.is_none());

        peer.write_all(&wire[6..]).unwrap();
        let outcome = collect_reads(&mut conn, |o| !o.frames.is_empty());
        assert_eq!(outcome.frames.len(), 1);
        assert_eq!(outcome.frames[0].payload(), b"fragmented");
    }

    #[test]
    fn test_peer_disconnect_reports_peer_closed() {
        let (mut conn, peer) = socket_pair();
        drop(peer);

        let outcome = collect_reads(&mut conn, |o| o.close.is_some());

        assert!(matches!(outcome.close, Some(CloseCause::PeerClosed)));
    }

    #[test]
    fn test_oversized_declaration_is_a_protocol_violation() {
        let (mut conn, mut peer) = socket_pair();
        peer.write_all(&2048u32.to_be_bytes()).unwrap();

        let outcome = collect_reads(&mut conn, |o| o.close.is_some());

        match outcome.close {
            Some(CloseCause::Protocol(FrameError::FrameTooLarge { length, max })) => {
                assert_eq!(length, 2048);
                assert_eq!(max, TEST_MAX_FRAME);
            }
            other => panic!("expected a framing violation, got {other:?}"),
        }
    }

    #[test]
    fn test_frames_before_a_violation_still_decode() {
        let (mut conn, mut peer) = socket_pair();
        let mut burst = encode_frame(b"good").unwrap();
        burst.extend_from_slice(&2048u32.to_be_bytes());
        peer.write_all(&burst).unwrap();

        let outcome = collect_reads(&mut conn, |o| o.close.is_some());

        assert_eq!(outcome.frames.len(), 1);
        assert_eq!(outcome.frames[0].payload(), b"good");
        assert!(matches!(outcome.close, Some(CloseCause::Protocol(_))));
    }

    // ── Idle tracking ─────────────────────────────────────────────────────────

    #[test]
    fn test_is_idle_once_the_window_elapses() {
        let (conn, _peer) = socket_pair();
        assert!(!conn.is_idle(Duration::from_secs(60)));

        std::thread::sleep(Duration::from_millis(30));
        assert!(conn.is_idle(Duration::from_millis(10)));
    }

    #[test]
    fn test_reads_refresh_the_idle_clock() {
        let (mut conn, mut peer) = socket_pair();
        std::thread::sleep(Duration::from_millis(30));
        assert!(conn.is_idle(Duration::from_millis(20)));

        peer.write_all(&encode_frame(b"x").unwrap()).unwrap();
        let outcome = collect_reads(&mut conn, |o| !o.frames.is_empty());
        assert_eq!(outcome.frames.len(), 1);

        assert!(!conn.is_idle(Duration::from_millis(20)));
    }
}
