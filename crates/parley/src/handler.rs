//! Per-connection handler: upgrade, register, and the two pumps.
//!
//! Each accepted socket gets its own Tokio task running this handler.
//! The flow is:
//!   1. Upgrade the socket, parsing the connect query → `ConnectParams`
//!   2. Register with the router (evicts any older connection of the user)
//!   3. Run the read pump here and the write pump in its own task
//!   4. Whichever pump stops first takes the other one down
//!   5. Unregister

use std::sync::Arc;

use parley_protocol::{
    Codec, ConnectParams, InboundFrame, JsonCodec, Message, MessageKind, RoomId, UserId,
};
use parley_router::{ClientHandle, ConnectionState, RouterHandle};
use parley_store::{MessageStore, RoomDirectory};
use parley_transport::{
    ConnectionId, ConnectionReader, ConnectionWriter, PendingConnection, TransportError,
};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

use crate::ParleyError;
use crate::server::ServerState;

/// Drop guard that unregisters the connection when the handler exits.
///
/// The normal exit path calls [`release`](Self::release) so that the
/// router closes the queue while the write pump is still around to send a
/// Close frame. If the handler is cancelled or panics instead, `Drop` spawns
/// a fire-and-forget unregister.
struct RegistrationGuard {
    conn_id: ConnectionId,
    router: RouterHandle,
    released: bool,
}

impl RegistrationGuard {
    async fn release(&mut self) {
        self.released = true;
        if let Err(e) = self.router.unregister(self.conn_id).await {
            tracing::debug!(conn_id = %self.conn_id, error = %e, "unregister failed");
        }
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let conn_id = self.conn_id;
        let router = self.router.clone();
        tokio::spawn(async move {
            let _ = router.unregister(conn_id).await;
        });
    }
}

/// Tracks this connection's lifecycle and logs each transition.
struct Lifecycle {
    conn_id: ConnectionId,
    state: ConnectionState,
}

impl Lifecycle {
    fn new(conn_id: ConnectionId) -> Self {
        Self {
            conn_id,
            state: ConnectionState::Connecting,
        }
    }

    fn advance(&mut self, to: ConnectionState) {
        if self.state.can_transition_to(to) {
            tracing::debug!(conn_id = %self.conn_id, from = %self.state, %to, "connection state");
            self.state = to;
        } else {
            tracing::warn!(
                conn_id = %self.conn_id,
                from = %self.state,
                %to,
                "invalid connection state transition ignored"
            );
        }
    }
}

/// Who is on the other end of this connection, as established at connect.
struct Identity {
    conn_id: ConnectionId,
    user_id: UserId,
    display_name: String,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<D, S>(
    pending: PendingConnection,
    state: Arc<ServerState<D, S>>,
) -> Result<(), ParleyError>
where
    D: RoomDirectory,
    S: MessageStore,
{
    let conn_id = pending.id();
    let peer = pending.peer_addr();
    let mut lifecycle = Lifecycle::new(conn_id);

    let (conn, params) = match pending.upgrade(&state.config, ConnectParams::from_query).await {
        Ok(upgraded) => upgraded,
        Err(TransportError::Rejected(reason)) => {
            tracing::info!(%conn_id, %peer, %reason, "connect request rejected");
            return Err(TransportError::Rejected(reason).into());
        }
        Err(e) => return Err(e.into()),
    };
    let ConnectParams {
        user_id,
        display_name,
        room_id,
    } = params;

    let (reader, writer) = conn.split(&state.config);
    let (client, outbound) = ClientHandle::new(
        conn_id,
        user_id.clone(),
        display_name.clone(),
        state.config.outbound_capacity,
    );

    let replaced = state.router.register(client, room_id.clone()).await?;
    let mut guard = RegistrationGuard {
        conn_id,
        router: state.router.clone(),
        released: false,
    };
    lifecycle.advance(ConnectionState::Registered);

    tracing::info!(
        %conn_id,
        %user_id,
        %peer,
        history_room = ?room_id.as_ref().map(RoomId::as_str),
        replaced = ?replaced,
        "client connected"
    );

    let identity = Identity {
        conn_id,
        user_id,
        display_name,
    };

    let mut write_task = tokio::spawn(write_pump(
        writer,
        outbound,
        state.codec,
        state.config.ping_period(),
        conn_id,
    ));
    lifecycle.advance(ConnectionState::Active);

    let read_finished_first = tokio::select! {
        result = read_pump(reader, &identity, &state) => {
            match result {
                Ok(()) => tracing::info!(%conn_id, "connection closed by client"),
                Err(e) => tracing::info!(%conn_id, error = %e, "connection read side ended"),
            }
            true
        }
        result = &mut write_task => {
            match result {
                Ok(Ok(())) => tracing::info!(%conn_id, "outbound queue closed"),
                Ok(Err(e)) => tracing::info!(%conn_id, error = %e, "connection write side ended"),
                Err(e) => tracing::error!(%conn_id, error = %e, "write pump task failed"),
            }
            false
        }
    };

    lifecycle.advance(ConnectionState::Unregistering);
    guard.release().await;

    // Unregistering closes the queue: give the write pump a moment to send
    // its Close frame before the socket goes away.
    if read_finished_first
        && tokio::time::timeout(state.config.write_timeout, &mut write_task)
            .await
            .is_err()
    {
        write_task.abort();
    }

    lifecycle.advance(ConnectionState::Gone);
    tracing::info!(%conn_id, user_id = %identity.user_id, "client disconnected");
    Ok(())
}

/// Reads frames until the socket closes, fails, or times out.
///
/// Returns `Ok(())` for a graceful close and the transport error otherwise.
/// Bad frames never end the loop: they are logged and dropped.
async fn read_pump<D, S>(
    mut reader: ConnectionReader,
    who: &Identity,
    state: &ServerState<D, S>,
) -> Result<(), TransportError>
where
    D: RoomDirectory,
    S: MessageStore,
{
    while let Some(data) = reader.recv().await? {
        handle_frame(&data, who, state).await;
    }
    Ok(())
}

/// Validates, persists, and forwards one client frame.
async fn handle_frame<D, S>(data: &[u8], who: &Identity, state: &ServerState<D, S>)
where
    D: RoomDirectory,
    S: MessageStore,
{
    let conn_id = who.conn_id;
    let user_id = &who.user_id;

    let frame: InboundFrame = match state.codec.decode(data) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(%conn_id, %user_id, error = %e, "undecodable frame, dropping");
            return;
        }
    };

    if frame.kind != MessageKind::Normal {
        tracing::warn!(%conn_id, %user_id, kind = %frame.kind, "clients may only send normal messages, dropping");
        return;
    }

    let Some(raw_room) = frame.room_id.filter(|r| !r.is_empty()) else {
        tracing::warn!(%conn_id, %user_id, "frame without room id, dropping");
        return;
    };
    let room_id = match RoomId::parse(raw_room) {
        Ok(room_id) => room_id,
        Err(e) => {
            tracing::warn!(%conn_id, %user_id, error = %e, "malformed room id, dropping");
            return;
        }
    };

    let room = match state.directory.resolve(&room_id).await {
        Ok(Some(room)) => room,
        Ok(None) => {
            tracing::warn!(%conn_id, %user_id, %room_id, "message for unknown room, dropping");
            return;
        }
        Err(e) => {
            tracing::error!(%conn_id, %room_id, error = %e, "room lookup failed, dropping");
            return;
        }
    };
    if !room.is_participant(user_id) {
        tracing::warn!(%conn_id, %user_id, %room_id, "sender is not a participant, dropping");
        return;
    }

    let message = Message::normal(
        user_id.clone(),
        who.display_name.clone(),
        room_id,
        room.room_name,
        frame.content,
    );

    // Persist first; only a durable message is broadcast.
    let stored = match state.store.insert(message).await {
        Ok(stored) => stored,
        Err(e) => {
            tracing::error!(%conn_id, %user_id, room_id = %room.room_id, error = %e, "failed to persist message, not broadcasting");
            return;
        }
    };

    tracing::debug!(
        %conn_id,
        %user_id,
        room_id = %stored.room_id(),
        id = ?stored.id().map(|id| id.as_str()),
        "message accepted"
    );

    if let Err(e) = state.router.broadcast(stored).await {
        tracing::warn!(%conn_id, error = %e, "router unavailable, message not broadcast");
    }
}

/// Drains the outbound queue onto the socket and keeps the peer alive.
///
/// Stops when the queue closes (sending a Close frame first) or when a
/// write fails or times out.
async fn write_pump(
    mut writer: ConnectionWriter,
    mut outbound: mpsc::Receiver<Message>,
    codec: JsonCodec,
    ping_period: Duration,
    conn_id: ConnectionId,
) -> Result<(), TransportError> {
    let mut ping = tokio::time::interval_at(Instant::now() + ping_period, ping_period);

    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(message) = next else {
                    if let Err(e) = writer.close().await {
                        tracing::debug!(%conn_id, error = %e, "close frame not sent");
                    }
                    return Ok(());
                };
                let text = match codec.encode(&message).map(String::from_utf8) {
                    Ok(Ok(text)) => text,
                    Ok(Err(e)) => {
                        tracing::error!(%conn_id, error = %e, "encoded message is not UTF-8, skipping");
                        continue;
                    }
                    Err(e) => {
                        tracing::error!(%conn_id, error = %e, "failed to encode message, skipping");
                        continue;
                    }
                };
                writer.send_text(text).await?;
            }
            _ = ping.tick() => {
                writer.ping().await?;
            }
        }
    }
}
