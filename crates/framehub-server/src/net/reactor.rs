//! The single-threaded event loop that owns every socket.
//!
//! One [`Reactor`] holds the listening socket, the poll instance, and the
//! registry of live connections. Its thread is the only one that ever reads,
//! writes, accepts, or closes — other threads talk to it exclusively through
//! a [`ReactorHandle`], which pushes a command onto an mpsc channel and wakes
//! the poll.
//!
//! # Token scheme
//!
//! `Token(0)` is the listener, `Token(1)` the cross-thread waker. Accepted
//! sockets get monotonically increasing tokens from `Token(2)` and a token is
//! never reused, so a stale readiness event can never be mistaken for a newer
//! connection.
//!
//! # Event handling
//!
//! Sockets are registered edge-style: every readable connection is drained
//! until `WouldBlock`, and every accept burst likewise. `WRITABLE` interest
//! is armed only while a connection has queued output; reregistering rearms
//! the readiness state, so interest changes on an already-writable socket
//! still produce a fresh event.
//!
//! While a connection's own frames are being dispatched, that connection is
//! temporarily taken out of the registry. Broadcast delivery therefore
//! iterates the whole registry with the sender naturally absent, and nothing
//! ever holds two mutable borrows into the connection map.
//!
//! Closes requested while the registry is being iterated (a relay target
//! failing, an idle scan hit) are deferred into a pending list and performed
//! after the event batch, keeping iteration safe.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use framehub_core::{encode_frame, Frame};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::{ConfigError, ServerConfig};
use crate::events::{CloseReason, ConnectionId, ServerEvent};
use crate::net::connection::{CloseCause, Connection, WriteOutcome};
use crate::net::registry::ConnectionRegistry;
use crate::router::{Response, Router};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CONNECTION_TOKEN: usize = 2;
const EVENTS_CAPACITY: usize = 256;

/// How often the idle scan runs while an idle timeout is configured.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

/// Fatal server errors. Everything per-connection is handled inside the loop
/// and closes only the offending connection.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configuration failed validation or could not be interpreted.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The readiness poll itself failed.
    #[error("poll failure: {0}")]
    PollFailed(#[source] std::io::Error),

    /// The cross-thread waker could not be created.
    #[error("failed to create the reactor waker: {0}")]
    WakerFailed(#[source] std::io::Error),
}

/// Instructions other threads can hand to the reactor.
#[derive(Debug)]
enum Command {
    /// Queue a server-originated frame on every live connection.
    Broadcast { payload: Vec<u8> },
    /// Close one connection with reason `Requested`.
    Close { id: ConnectionId },
    /// Stop the loop, closing every connection first.
    Shutdown,
}

/// Cloneable remote control for a running [`Reactor`].
///
/// Sending is fire-and-forget: if the reactor has already stopped, commands
/// are dropped quietly.
#[derive(Clone)]
pub struct ReactorHandle {
    tx: Sender<Command>,
    waker: Arc<Waker>,
}

impl ReactorHandle {
    /// Queues `payload` as one frame to every live connection.
    pub fn broadcast(&self, payload: Vec<u8>) {
        self.send(Command::Broadcast { payload });
    }

    /// Asks the reactor to close one connection.
    pub fn close(&self, id: ConnectionId) {
        self.send(Command::Close { id });
    }

    /// Asks the reactor to stop; `run()` returns after teardown.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            debug!("reactor is gone; dropping command");
            return;
        }
        if let Err(err) = self.waker.wake() {
            warn!(?err, "failed to wake the reactor");
        }
    }
}

// ── Reactor ───────────────────────────────────────────────────────────────────

/// The event loop. See the module docs for the threading and token rules.
pub struct Reactor {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: ConnectionRegistry,
    /// Poll token → connection id, maintained in lockstep with the registry.
    tokens: HashMap<Token, ConnectionId>,
    next_token: usize,
    router: Router,
    max_frame_size: usize,
    idle_timeout: Option<Duration>,
    last_housekeeping: Instant,
    waker: Arc<Waker>,
    command_tx: Sender<Command>,
    command_rx: Receiver<Command>,
    events_tx: Option<Sender<ServerEvent>>,
    /// Closes requested mid-iteration, performed after the event batch.
    pending_close: Vec<(ConnectionId, CloseReason)>,
    shutdown_requested: bool,
}

impl Reactor {
    /// Validates `config`, binds the listening socket, and sets up the poll
    /// and waker. The loop does not run until [`run`](Reactor::run).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for invalid settings and
    /// [`ServerError::BindFailed`] / [`ServerError::PollFailed`] /
    /// [`ServerError::WakerFailed`] for startup I/O failures.
    pub fn bind(config: ServerConfig) -> Result<Reactor, ServerError> {
        config.validate()?;
        let addr = config.listen.socket_addr()?;

        let mut listener =
            TcpListener::bind(addr).map_err(|source| ServerError::BindFailed { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::BindFailed { addr, source })?;

        let poll = Poll::new().map_err(ServerError::PollFailed)?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(ServerError::PollFailed)?;
        let waker =
            Arc::new(Waker::new(poll.registry(), WAKER).map_err(ServerError::WakerFailed)?);
        let (command_tx, command_rx) = mpsc::channel();

        Ok(Reactor {
            poll,
            listener,
            local_addr,
            registry: ConnectionRegistry::new(),
            tokens: HashMap::new(),
            next_token: FIRST_CONNECTION_TOKEN,
            router: Router::new(config.router.mode),
            max_frame_size: config.limits.max_frame_size,
            idle_timeout: config.limits.idle_timeout(),
            last_housekeeping: Instant::now(),
            waker,
            command_tx,
            command_rx,
            events_tx: None,
            pending_close: Vec::new(),
            shutdown_requested: false,
        })
    }

    /// The bound address — useful when the configured port was `0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A cloneable handle for controlling the reactor from other threads.
    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            tx: self.command_tx.clone(),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Registers a lifecycle event subscriber, replacing any previous one.
    pub fn subscribe(&mut self) -> Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel();
        self.events_tx = Some(tx);
        rx
    }

    /// Runs the event loop until [`ReactorHandle::shutdown`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::PollFailed`] only if the poll itself breaks;
    /// connection-level failures close the affected connection and keep the
    /// loop running.
    pub fn run(&mut self) -> Result<(), ServerError> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        info!(addr = %self.local_addr, mode = ?self.router.mode(), "reactor running");

        loop {
            let timeout = self.poll_timeout();
            if let Err(err) = self.poll.poll(&mut events, timeout) {
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ServerError::PollFailed(err));
            }

            self.drain_commands();
            if self.shutdown_requested {
                break;
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_ready(),
                    // Nothing to drain here; commands were picked up above.
                    WAKER => {}
                    token => {
                        self.connection_ready(token, event.is_readable(), event.is_writable());
                    }
                }
            }

            self.process_pending_closes();
            self.run_housekeeping();
        }

        self.finish_shutdown();
        info!("reactor stopped");
        Ok(())
    }

    /// Without an idle timeout the loop can sleep indefinitely; with one it
    /// wakes at least every housekeeping interval to scan.
    fn poll_timeout(&self) -> Option<Duration> {
        self.idle_timeout.map(|_| HOUSEKEEPING_INTERVAL)
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                Command::Broadcast { payload } => self.broadcast_from_server(payload),
                Command::Close { id } => self.close_connection(id, CloseReason::Requested),
                Command::Shutdown => self.shutdown_requested = true,
            }
        }
    }

    /// Accepts until the listener reports `WouldBlock`. A failed accept never
    /// takes the server down; at worst it is logged and no connection exists.
    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer_addr)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(%peer_addr, ?err, "set_nodelay failed");
                    }

                    let token = Token(self.next_token);
                    self.next_token += 1;
                    if let Err(err) =
                        self.poll
                            .registry()
                            .register(&mut stream, token, Interest::READABLE)
                    {
                        warn!(%peer_addr, ?err, "failed to register accepted socket");
                        continue;
                    }

                    let id = Uuid::new_v4();
                    let conn = Connection::new(id, stream, token, peer_addr, self.max_frame_size);
                    self.tokens.insert(token, id);
                    self.registry.register(conn);
                    info!(%id, peer = %peer_addr, "connection opened");
                    self.emit(ServerEvent::ConnectionOpened { id, peer: peer_addr });
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(?err, "accept failed");
                    break;
                }
            }
        }
    }

    /// Handles readiness on one accepted socket.
    ///
    /// The connection is taken out of the registry for the duration, so frame
    /// dispatch can iterate the registry freely; it is reinserted afterwards
    /// unless the readiness handling decided it must close.
    fn connection_ready(&mut self, token: Token, readable: bool, writable: bool) {
        let Some(&id) = self.tokens.get(&token) else {
            trace!(?token, "event for unknown token");
            return;
        };
        let Some(mut conn) = self.registry.unregister(&id) else {
            self.tokens.remove(&token);
            trace!(%id, "event for untracked connection");
            return;
        };

        let mut close: Option<CloseCause> = None;

        if readable {
            let outcome = conn.on_readable();
            for frame in outcome.frames {
                self.dispatch_frame(&mut conn, frame);
            }
            close = outcome.close;
        }

        if close.is_none() && writable {
            if let WriteOutcome::Closed(cause) = conn.on_writable() {
                close = Some(cause);
            }
        }

        match close {
            Some(cause) => self.finish_close(conn, cause),
            None => {
                if let Err(err) = reconcile_interest(self.poll.registry(), &mut conn) {
                    warn!(id = %conn.id(), ?err, "reregister failed");
                    self.finish_close(conn, CloseCause::Io(err));
                } else {
                    self.registry.register(conn);
                }
            }
        }
    }

    /// Routes one decoded frame and queues whatever the router produced.
    ///
    /// `sender` is the taken-out connection the frame arrived on; the
    /// registry holds everyone else, which is exactly the broadcast audience.
    fn dispatch_frame(&mut self, sender: &mut Connection, frame: Frame) {
        trace!(id = %sender.id(), length = frame.len(), "frame decoded");
        self.emit(ServerEvent::FrameDecoded {
            id: sender.id(),
            length: frame.len(),
        });

        match self.router.route(sender.id(), &frame) {
            Response::Reply(payload) => match encode_frame(&payload) {
                Ok(wire) => sender.enqueue_send(wire),
                Err(err) => warn!(id = %sender.id(), ?err, "dropping undeliverable reply"),
            },
            Response::Relay(payload) => {
                let wire = match encode_frame(&payload) {
                    Ok(wire) => wire,
                    Err(err) => {
                        warn!(id = %sender.id(), ?err, "dropping undeliverable relay");
                        return;
                    }
                };

                let poll_registry = self.poll.registry();
                for conn in self.registry.iter_mut() {
                    conn.enqueue_send(wire.clone());
                    if let Err(err) = reconcile_interest(poll_registry, conn) {
                        warn!(id = %conn.id(), ?err, "failed to arm writable interest");
                        self.pending_close.push((conn.id(), CloseReason::IoError));
                    }
                }
            }
        }
    }

    /// Queues a server-originated frame on every live connection.
    fn broadcast_from_server(&mut self, payload: Vec<u8>) {
        let wire = match encode_frame(&payload) {
            Ok(wire) => wire,
            Err(err) => {
                warn!(?err, "dropping undeliverable server broadcast");
                return;
            }
        };

        let mut failed = Vec::new();
        let poll_registry = self.poll.registry();
        for conn in self.registry.iter_mut() {
            conn.enqueue_send(wire.clone());
            if let Err(err) = reconcile_interest(poll_registry, conn) {
                warn!(id = %conn.id(), ?err, "failed to arm writable interest");
                failed.push(conn.id());
            }
        }
        for id in failed {
            self.close_connection(id, CloseReason::IoError);
        }
    }

    /// Removes and tears down one connection by id. The single place a close
    /// decided outside readiness handling goes through.
    fn close_connection(&mut self, id: ConnectionId, reason: CloseReason) {
        let Some(conn) = self.registry.unregister(&id) else {
            debug!(%id, "close requested for unknown connection");
            return;
        };
        self.finish_close_with_reason(conn, reason);
    }

    /// Tears down a connection that failed during readiness handling.
    fn finish_close(&mut self, conn: Connection, cause: CloseCause) {
        match &cause {
            CloseCause::PeerClosed => {}
            CloseCause::Io(err) => {
                warn!(id = %conn.id(), peer = %conn.peer_addr(), ?err, "connection I/O failure");
            }
            CloseCause::Protocol(err) => {
                warn!(id = %conn.id(), peer = %conn.peer_addr(), %err, "framing violation");
                self.emit(ServerEvent::FrameDecodeError {
                    id: conn.id(),
                    error: *err,
                });
            }
        }
        self.finish_close_with_reason(conn, cause.reason());
    }

    /// Deregisters, logs, and drops a connection already out of the registry.
    fn finish_close_with_reason(&mut self, mut conn: Connection, reason: CloseReason) {
        self.tokens.remove(&conn.token());
        if let Err(err) = self.poll.registry().deregister(conn.stream_mut()) {
            debug!(id = %conn.id(), ?err, "deregister failed");
        }
        info!(
            id = %conn.id(),
            peer = %conn.peer_addr(),
            ?reason,
            frames = conn.frames_decoded(),
            "connection closed"
        );
        self.emit(ServerEvent::ConnectionClosed {
            id: conn.id(),
            reason,
            frames_decoded: conn.frames_decoded(),
        });
    }

    fn process_pending_closes(&mut self) {
        while let Some((id, reason)) = self.pending_close.pop() {
            self.close_connection(id, reason);
        }
    }

    /// Scans for idle connections at most once per housekeeping interval.
    fn run_housekeeping(&mut self) {
        let Some(window) = self.idle_timeout else {
            return;
        };
        if self.last_housekeeping.elapsed() < HOUSEKEEPING_INTERVAL {
            return;
        }
        self.last_housekeeping = Instant::now();

        let idle: Vec<ConnectionId> = self
            .registry
            .iter()
            .filter(|conn| conn.is_idle(window))
            .map(|conn| conn.id())
            .collect();
        for id in idle {
            self.close_connection(id, CloseReason::IdleTimeout);
        }
    }

    /// Closes every live connection and releases the listener.
    fn finish_shutdown(&mut self) {
        info!(connections = self.registry.len(), "shutting down");
        for conn in self.registry.drain() {
            self.finish_close_with_reason(conn, CloseReason::ServerShutdown);
        }
        if let Err(err) = self.poll.registry().deregister(&mut self.listener) {
            debug!(?err, "listener deregister failed");
        }
    }

    fn emit(&self, event: ServerEvent) {
        if let Some(tx) = &self.events_tx {
            // A dropped subscriber is not an error.
            let _ = tx.send(event);
        }
    }
}

/// Brings a connection's poll registration in line with what its send queue
/// requires. A no-op when the registered interest already matches.
fn reconcile_interest(
    poll_registry: &mio::Registry,
    conn: &mut Connection,
) -> std::io::Result<()> {
    let desired = conn.desired_interest();
    if desired == conn.registered_interest() {
        return Ok(());
    }
    let token = conn.token();
    poll_registry.reregister(conn.stream_mut(), token, desired)?;
    conn.set_registered_interest(desired);
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ServerConfig {
        let mut cfg = ServerConfig::default();
        cfg.listen.bind_address = "127.0.0.1".to_string();
        cfg.listen.port = 0;
        cfg
    }

    #[test]
    fn test_bind_assigns_an_ephemeral_port() {
        let reactor = Reactor::bind(test_config()).expect("bind on port 0");
        assert_ne!(reactor.local_addr().port(), 0);
        assert!(reactor.local_addr().ip().is_loopback());
    }

    #[test]
    fn test_bind_rejects_a_malformed_address() {
        let mut cfg = test_config();
        cfg.listen.bind_address = "not-an-address".to_string();

        assert!(matches!(Reactor::bind(cfg), Err(ServerError::Config(_))));
    }

    #[test]
    fn test_bind_rejects_a_zero_frame_limit() {
        let mut cfg = test_config();
        cfg.limits.max_frame_size = 0;

        assert!(matches!(Reactor::bind(cfg), Err(ServerError::Config(_))));
    }

    #[test]
    fn test_poll_timeout_mirrors_the_idle_setting() {
        let reactor = Reactor::bind(test_config()).expect("bind");
        assert_eq!(reactor.poll_timeout(), Some(HOUSEKEEPING_INTERVAL));

        let mut cfg = test_config();
        cfg.limits.idle_timeout_secs = 0;
        let reactor = Reactor::bind(cfg).expect("bind");
        assert_eq!(reactor.poll_timeout(), None);
    }
}
