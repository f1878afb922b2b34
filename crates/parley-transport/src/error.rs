/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting TCP connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The WebSocket upgrade handshake failed at the protocol level.
    #[error("handshake failed: {0}")]
    HandshakeFailed(#[source] std::io::Error),

    /// The upgrade request was answered with HTTP 400.
    #[error("connect request rejected: {0}")]
    Rejected(String),

    /// No frame arrived within the read deadline, or a write did not
    /// complete within the write deadline.
    #[error("{0} timed out")]
    TimedOut(&'static str),

    /// The peer sent a frame larger than the configured limit.
    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },
}
