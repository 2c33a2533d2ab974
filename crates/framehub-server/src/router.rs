//! Frame routing: decides what outbound traffic a decoded frame produces.
//!
//! The router is pure — it never blocks, never touches a socket, and never
//! looks inside the registry. It turns `(sender, frame)` into a [`Response`]
//! value; the reactor expands that value into actual deliveries.

use framehub_core::Frame;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::ConnectionId;

/// Routing behavior, selected at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterMode {
    /// Reply to the sender with a freshly generated token.
    #[default]
    Echo,
    /// Relay each frame to every other connection, tagged with the sender.
    Broadcast,
}

/// Outbound traffic produced by routing one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Payload to send back to the originating connection only.
    Reply(Vec<u8>),
    /// Payload to send to every connection except the originating one.
    Relay(Vec<u8>),
}

/// Maps decoded frames to responses according to the configured mode.
#[derive(Debug)]
pub struct Router {
    mode: RouterMode,
}

impl Router {
    pub fn new(mode: RouterMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> RouterMode {
        self.mode
    }

    /// Routes one decoded frame from `sender`.
    ///
    /// Echo mode ignores the frame contents and replies with a fresh opaque
    /// token (a hyphenated UUID, 36 ASCII characters). Broadcast mode prefixes
    /// the payload with a UTF-8 `"<sender-id>: "` tag and relays it; the
    /// payload bytes themselves stay untouched.
    pub fn route(&self, sender: ConnectionId, frame: &Frame) -> Response {
        match self.mode {
            RouterMode::Echo => Response::Reply(Uuid::new_v4().to_string().into_bytes()),
            RouterMode::Broadcast => {
                let tag = sender.to_string();
                let mut payload = Vec::with_capacity(tag.len() + 2 + frame.len());
                payload.extend_from_slice(tag.as_bytes());
                payload.extend_from_slice(b": ");
                payload.extend_from_slice(frame.payload());
                Response::Relay(payload)
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
