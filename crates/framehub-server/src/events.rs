//! Lifecycle and diagnostic events emitted by the reactor.
//!
//! Observers obtain a receiver through `Reactor::subscribe` and consume
//! events on their own thread; the reactor never blocks on a slow or
//! departed subscriber.

use std::net::SocketAddr;

use framehub_core::FrameError;
use uuid::Uuid;

/// Unique identifier for an accepted connection, derived from UUID v4.
///
/// Assigned once at accept time and never reused by a later connection.
pub type ConnectionId = Uuid;

/// Why a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its end of the stream.
    PeerClosed,
    /// A socket read or write failed.
    IoError,
    /// The inbound stream violated the framing protocol.
    ProtocolViolation,
    /// No bytes moved in either direction within the idle window.
    IdleTimeout,
    /// Closure was requested through a reactor handle.
    Requested,
    /// The server is shutting down.
    ServerShutdown,
}

/// Discrete events an external observer may subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ConnectionOpened {
        id: ConnectionId,
        peer: SocketAddr,
    },
    ConnectionClosed {
        id: ConnectionId,
        reason: CloseReason,
        frames_decoded: u64,
    },
    FrameDecoded {
        id: ConnectionId,
        length: usize,
    },
    FrameDecodeError {
        id: ConnectionId,
        error: FrameError,
    },
}
