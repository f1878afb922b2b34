//! Transport layer for Parley.
//!
//! Accepts TCP connections, performs the WebSocket upgrade, and splits each
//! socket into a [`ConnectionReader`] and a [`ConnectionWriter`] so the read
//! pump and the write pump can run as independent tasks.
//!
//! Timing and size limits live in [`ConnectionConfig`]:
//!
//! ```text
//! read_timeout  60s   any inbound frame (pongs included) resets it
//! ping_period   54s   9/10 of read_timeout, keeps proxies and peer happy
//! write_timeout 10s   per outbound frame
//! ```
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod config;
mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use config::ConnectionConfig;
pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{
    ConnectionReader, ConnectionWriter, PendingConnection, WebSocketConnection,
    WebSocketTransport,
};

use std::fmt;

/// Opaque identifier for a live socket.
///
/// Unique for the lifetime of the process. Two connections from the same
/// user always have different ids, which is what lets the router tell a
/// stale connection from its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// What `accept` hands back: a connection that has not been upgraded yet.
    type Pending: Send + 'static;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Pending, Self::Error>;

    /// Returns the local address the transport is bound to.
    fn local_addr(&self) -> std::io::Result<std::net::SocketAddr>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ConnectionId::new(1), "alice");
        map.insert(ConnectionId::new(2), "alice-again");
        assert_eq!(map[&ConnectionId::new(1)], "alice");
        assert_eq!(map.len(), 2);
    }
}
