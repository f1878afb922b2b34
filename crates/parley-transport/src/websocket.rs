//! WebSocket transport implementation using `tokio-tungstenite`.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::error::CapacityError;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::{ConnectionConfig, ConnectionId, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Bound on the HTTP upgrade exchange, so a client that opens a TCP socket
/// and never speaks cannot hold a task forever.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// Protocol-level limits for an upgraded socket: frames and messages above
/// `max_frame_size` are refused from the frame header, before the payload
/// is buffered.
fn protocol_config(config: &ConnectionConfig) -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(config.max_frame_size))
        .max_frame_size(Some(config.max_frame_size))
}

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }
}

impl Transport for WebSocketTransport {
    type Pending = PendingConnection;
    type Error = TransportError;

    /// Accepts the TCP connection only. The upgrade runs later, inside the
    /// connection's own task, so one slow handshake never stalls the
    /// accept loop.
    async fn accept(&mut self) -> Result<Self::Pending, Self::Error> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, %peer, "accepted TCP connection");

        Ok(PendingConnection { id, peer, stream })
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// A TCP connection waiting for its WebSocket upgrade.
pub struct PendingConnection {
    id: ConnectionId,
    peer: SocketAddr,
    stream: TcpStream,
}

impl PendingConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Performs the WebSocket upgrade.
    ///
    /// The socket is configured with `config.max_frame_size` as its frame
    /// and message limit. `parse` receives the request's query string. If it fails, the client
    /// gets an HTTP 400 whose body is the error's `Display` text, and this
    /// returns [`TransportError::Rejected`]. On success the parsed value is
    /// returned with the upgraded connection.
    pub async fn upgrade<T, E, F>(
        self,
        config: &ConnectionConfig,
        parse: F,
    ) -> Result<(WebSocketConnection, T), TransportError>
    where
        F: FnOnce(Option<&str>) -> Result<T, E> + Send + Unpin,
        E: fmt::Display,
        T: Send,
    {
        let mut parsed: Option<T> = None;
        let mut rejection: Option<String> = None;

        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            match parse(req.uri().query()) {
                Ok(value) => {
                    parsed = Some(value);
                    Ok(resp)
                }
                Err(e) => {
                    let reason = e.to_string();
                    rejection = Some(reason.clone());
                    let mut err = ErrorResponse::new(Some(reason));
                    *err.status_mut() = StatusCode::BAD_REQUEST;
                    Err(err)
                }
            }
        };

        let upgraded = tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            tokio_tungstenite::accept_hdr_async_with_config(
                self.stream,
                callback,
                Some(protocol_config(config)),
            ),
        )
        .await;

        let ws = match upgraded {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                if let Some(reason) = rejection {
                    return Err(TransportError::Rejected(reason));
                }
                return Err(TransportError::HandshakeFailed(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    e,
                )));
            }
            Err(_) => return Err(TransportError::TimedOut("handshake")),
        };

        let value = parsed.ok_or_else(|| {
            TransportError::HandshakeFailed(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "upgrade completed without running the request callback",
            ))
        })?;

        tracing::debug!(id = %self.id, peer = %self.peer, "WebSocket upgrade complete");

        Ok((
            WebSocketConnection {
                id: self.id,
                peer: self.peer,
                ws,
            },
            value,
        ))
    }
}

/// An upgraded WebSocket connection, not yet split.
pub struct WebSocketConnection {
    id: ConnectionId,
    peer: SocketAddr,
    ws: WsStream,
}

impl WebSocketConnection {
    /// Returns the unique identifier for this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Splits the socket into independently owned read and write halves.
    pub fn split(self, config: &ConnectionConfig) -> (ConnectionReader, ConnectionWriter) {
        let (sink, stream) = self.ws.split();
        (
            ConnectionReader {
                id: self.id,
                stream,
                read_timeout: config.read_timeout,
                max_frame_size: config.max_frame_size,
            },
            ConnectionWriter {
                id: self.id,
                sink,
                write_timeout: config.write_timeout,
            },
        )
    }
}

/// The read half of a connection.
pub struct ConnectionReader {
    id: ConnectionId,
    stream: SplitStream<WsStream>,
    read_timeout: Duration,
    max_frame_size: usize,
}

impl ConnectionReader {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Receives the next data frame (text or binary) as bytes.
    ///
    /// Returns `Ok(None)` when the peer closed the connection gracefully
    /// (Close frame or end of stream). Control frames are consumed here:
    /// each one restarts the read deadline but is not returned.
    ///
    /// # Errors
    /// - [`TransportError::TimedOut`]: nothing arrived within `read_timeout`
    /// - [`TransportError::FrameTooLarge`]: frame above `max_frame_size`
    /// - [`TransportError::ReceiveFailed`]: socket or protocol error
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            let next = tokio::time::timeout(self.read_timeout, self.stream.next())
                .await
                .map_err(|_| TransportError::TimedOut("read"))?;

            let data: Vec<u8> = match next {
                Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                Some(Ok(Message::Binary(data))) => data.into(),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // ping/pong/raw frame: the peer is alive, wait again
                Some(Ok(_)) => continue,
                Some(Err(WsError::Capacity(CapacityError::MessageTooLong { size, .. }))) => {
                    return Err(TransportError::FrameTooLarge {
                        size,
                        limit: self.max_frame_size,
                    });
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            };

            // Connections upgraded with a different config still get the limit.
            if data.len() > self.max_frame_size {
                return Err(TransportError::FrameTooLarge {
                    size: data.len(),
                    limit: self.max_frame_size,
                });
            }
            return Ok(Some(data));
        }
    }
}

/// The write half of a connection.
pub struct ConnectionWriter {
    id: ConnectionId,
    sink: SplitSink<WsStream, Message>,
    write_timeout: Duration,
}

impl ConnectionWriter {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Sends one text frame.
    pub async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.send(Message::Text(text.into())).await
    }

    /// Sends a keepalive ping with an empty payload.
    pub async fn ping(&mut self) -> Result<(), TransportError> {
        self.send(Message::Ping(Default::default())).await
    }

    /// Starts the close handshake and flushes it. Best effort: the socket
    /// is going away regardless of the outcome.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        match tokio::time::timeout(self.write_timeout, self.sink.close()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))),
            Err(_) => Err(TransportError::TimedOut("close")),
        }
    }

    async fn send(&mut self, msg: Message) -> Result<(), TransportError> {
        match tokio::time::timeout(self.write_timeout, self.sink.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))),
            Err(_) => Err(TransportError::TimedOut("write")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_config_uses_frame_limit() {
        let config = ConnectionConfig {
            max_frame_size: 100,
            ..ConnectionConfig::default()
        };
        let ws = protocol_config(&config);
        assert_eq!(ws.max_frame_size, Some(100));
        assert_eq!(ws.max_message_size, Some(100));
    }
}
