//! Socket-facing layer: everything that touches a TCP stream lives here.
//!
//! # Sub-modules
//!
//! - **`connection`** – One accepted socket: inbound byte accumulation through
//!   the frame decoder, the outbound send queue with its partial-write cursor,
//!   and the readiness interest the socket should be armed with.
//!
//! - **`registry`** – The set of live connections, keyed by connection id.
//!
//! - **`reactor`** – The event loop. Binds the listener, polls for readiness,
//!   and drives accepts, reads, writes, routing, and closes from a single
//!   thread. No other code touches a socket.

pub mod connection;
pub mod reactor;
pub mod registry;
