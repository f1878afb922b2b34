//! Per-connection timing, size, and queue limits.

use std::time::Duration;

/// Configuration shared by every connection a server accepts.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long the read side waits for any frame before giving up on the
    /// peer. Pongs count, so a live client answering pings never trips it.
    pub read_timeout: Duration,

    /// Upper bound on writing a single frame to the socket.
    pub write_timeout: Duration,

    /// Largest inbound frame accepted, in bytes. Anything bigger ends the
    /// connection.
    pub max_frame_size: usize,

    /// Capacity of the outbound message queue. When it is full the client
    /// is considered dead and evicted.
    pub outbound_capacity: usize,
}

impl ConnectionConfig {
    /// Interval between keepalive pings: nine tenths of the read timeout,
    /// so a ping always goes out before the peer's deadline expires.
    pub fn ping_period(&self) -> Duration {
        self.read_timeout * 9 / 10
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            max_frame_size: 512,
            outbound_capacity: 256,
        }
    }
}
