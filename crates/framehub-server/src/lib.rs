//! framehub-server library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.

pub mod config;
pub mod events;
pub mod net;
pub mod router;

// Re-export the most-used types at the crate root so callers can write
// `framehub_server::Reactor` instead of `framehub_server::net::reactor::Reactor`.
pub use config::ServerConfig;
pub use events::{CloseReason, ConnectionId, ServerEvent};
pub use net::reactor::{Reactor, ReactorHandle, ServerError};
pub use router::RouterMode;
