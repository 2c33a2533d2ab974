//! The set of live connections, keyed by connection id.
//!
//! Purely a container: registration, lookup, removal, iteration. All
//! lifecycle decisions (when to insert, when to remove, what to log) belong
//! to the reactor.

use std::collections::HashMap;

use crate::events::ConnectionId;
use crate::net::connection::Connection;

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a connection under its own id and returns that id.
    pub fn register(&mut self, conn: Connection) -> ConnectionId {
        let id = conn.id();
        let previous = self.connections.insert(id, conn);
        debug_assert!(previous.is_none(), "connection ids are never reused");
        id
    }

    /// Removes and returns the connection, if present.
    pub fn unregister(&mut self, id: &ConnectionId) -> Option<Connection> {
        self.connections.remove(id)
    }

    pub fn lookup(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn lookup_mut(&mut self, id: &ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Ids of every live connection, in no particular order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    /// Removes every connection, returning them for teardown.
    pub fn drain(&mut self) -> Vec<Connection> {
        self.connections.drain().map(|(_, conn)| conn).collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::TcpStream;
    use mio::Token;
    use std::net::{TcpListener as StdTcpListener, TcpStream as StdTcpStream};
    use uuid::Uuid;

    fn test_connection() -> (Connection, StdTcpStream) {
        let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        let peer = StdTcpStream::connect(addr).expect("connect");
        let (accepted, peer_addr) = listener.accept().expect("accept");
        accepted.set_nonblocking(true).expect("nonblocking");
        let conn = Connection::new(
            Uuid::new_v4(),
            TcpStream::from_std(accepted),
            Token(9),
            peer_addr,
            1024,
        );
        (conn, peer)
    }

    #[test]
    fn test_register_then_lookup_by_id() {
        let mut registry = ConnectionRegistry::new();
        let (conn, _peer) = test_connection();
        let token = conn.token();

        let id = registry.register(conn);

        assert!(registry.contains(&id));
        assert_eq!(registry.len(), 1);
        let found = registry.lookup(&id).expect("registered connection");
        assert_eq!(found.id(), id);
        assert_eq!(found.token(), token);
    }

    #[test]
    fn test_unregister_removes_the_connection() {
        let mut registry = ConnectionRegistry::new();
        let (conn, _peer) = test_connection();
        let id = registry.register(conn);

        let removed = registry.unregister(&id);

        assert!(removed.is_some());
        assert!(!registry.contains(&id));
        assert!(registry.is_empty());
        assert!(registry.unregister(&id).is_none());
    }

    #[test]
    fn test_ids_lists_every_live_connection() {
        let mut registry = ConnectionRegistry::new();
        let (first, _p1) = test_connection();
        let (second, _p2) = test_connection();
        let first_id = registry.register(first);
        let second_id = registry.register(second);

        let ids = registry.ids();

        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first_id));
        assert!(ids.contains(&second_id));
    }

    #[test]
    fn test_drain_empties_the_registry() {
        let mut registry = ConnectionRegistry::new();
        let (first, _p1) = test_connection();
        let (second, _p2) = test_connection();
        registry.register(first);
        registry.register(second);

        let drained = registry.drain();

        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }
}
