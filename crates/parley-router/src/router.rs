//! The router actor: one Tokio task that owns the registry.
//!
//! Every registry mutation and every fan-out goes through a single bounded
//! command channel, so they are totally ordered by arrival. Nothing else in
//! the process ever touches the registry.
//!
//! ```text
//! Connection ──Register/Unregister──┐
//! Connection ──Broadcast────────────┤
//! request handlers ──Broadcast──────┼──→ [ command channel ] ──→ Router task
//! Bootstrap ──HistoryReplayed───────┘                              │
//!                                                                  ▼
//!                                                    Registry ──try_send──→ queues
//! ```

use std::sync::Arc;

use parley_protocol::{Message, RoomId, UserId};
use parley_store::{MessageStore, RoomDirectory};
use parley_transport::ConnectionId;
use tokio::sync::{mpsc, oneshot};

use crate::bootstrap::Bootstrap;
use crate::{ClientHandle, ConnectionState, DeliveryError, Registry, RouterConfig, RouterError};

/// Commands sent to the router task through its channel.
pub(crate) enum RouterCommand {
    /// Add a connection, evicting any older one of the same user.
    Register {
        client: ClientHandle,
        history_room: Option<RoomId>,
        reply: oneshot::Sender<Option<ConnectionId>>,
    },

    /// Remove a connection. Unknown ids are ignored.
    Unregister { id: ConnectionId },

    /// Fan a persisted message out to the live members of its room.
    Broadcast { message: Message },

    /// Sent by a bootstrap task once history replay has finished.
    HistoryReplayed { id: ConnectionId },

    /// Ask who is connected as this user.
    LookupUser {
        user_id: UserId,
        reply: oneshot::Sender<Option<ClientInfo>>,
    },

    /// Request a counters snapshot.
    Stats { reply: oneshot::Sender<RouterStats> },

    /// Stop the router. Every queue closes as the registry is dropped.
    Shutdown,
}

/// A snapshot of one registered connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub display_name: String,
    pub state: ConnectionState,
}

/// Router counters, for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Live connections in the registry.
    pub connections: usize,
    /// Users with a live connection.
    pub users: usize,
    /// Broadcast commands processed.
    pub broadcasts: u64,
    /// Messages handed to a connection's queue (or held for it).
    pub delivered: u64,
    /// Connections removed by the router itself: replaced by a newer
    /// connection of the same user, or dead (queue full or closed).
    pub evicted: u64,
    /// Broadcasts dropped because the room could not be resolved.
    pub dropped: u64,
}

/// Handle to the running router. Cheap to clone.
#[derive(Clone)]
pub struct RouterHandle {
    sender: mpsc::Sender<RouterCommand>,
}

impl RouterHandle {
    /// Registers a connection and waits until the router has processed it.
    ///
    /// If `history_room` is set, the router starts replaying that room's
    /// recent history into the connection's queue. Live messages for the
    /// connection are held back until the replay finishes.
    ///
    /// Returns the id of the connection this one replaced, if any.
    pub async fn register(
        &self,
        client: ClientHandle,
        history_room: Option<RoomId>,
    ) -> Result<Option<ConnectionId>, RouterError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RouterCommand::Register {
                client,
                history_room,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RouterError::Unavailable)?;
        reply_rx.await.map_err(|_| RouterError::Unavailable)
    }

    /// Asks the router to forget a connection (fire-and-forget).
    pub async fn unregister(&self, id: ConnectionId) -> Result<(), RouterError> {
        self.sender
            .send(RouterCommand::Unregister { id })
            .await
            .map_err(|_| RouterError::Unavailable)
    }

    /// Delivers a message to every live participant of its room
    /// (fire-and-forget).
    ///
    /// The message should already be persisted. Request handlers outside
    /// the core use this to inject `system` and `room_state_update`
    /// messages.
    pub async fn broadcast(&self, message: Message) -> Result<(), RouterError> {
        self.sender
            .send(RouterCommand::Broadcast { message })
            .await
            .map_err(|_| RouterError::Unavailable)
    }

    /// Returns the live connection of a user, if any.
    pub async fn lookup_user(&self, user_id: UserId) -> Result<Option<ClientInfo>, RouterError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RouterCommand::LookupUser {
                user_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RouterError::Unavailable)?;
        reply_rx.await.map_err(|_| RouterError::Unavailable)
    }

    /// Returns a snapshot of the router's counters.
    pub async fn stats(&self) -> Result<RouterStats, RouterError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RouterCommand::Stats { reply: reply_tx })
            .await
            .map_err(|_| RouterError::Unavailable)?;
        reply_rx.await.map_err(|_| RouterError::Unavailable)
    }

    /// Tells the router to stop.
    pub async fn shutdown(&self) -> Result<(), RouterError> {
        self.sender
            .send(RouterCommand::Shutdown)
            .await
            .map_err(|_| RouterError::Unavailable)
    }

    /// Returns `true` once the router task has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// The internal router state. Runs inside a Tokio task.
struct Router<D, S> {
    registry: Registry,
    directory: Arc<D>,
    store: Arc<S>,
    config: RouterConfig,
    stats: RouterStats,
    receiver: mpsc::Receiver<RouterCommand>,
    /// Handed to bootstrap tasks. Weak, so the router never keeps its own
    /// channel open.
    weak_sender: mpsc::WeakSender<RouterCommand>,
}

impl<D, S> Router<D, S>
where
    D: RoomDirectory,
    S: MessageStore,
{
    /// Runs the actor loop until shutdown or until every handle is dropped.
    async fn run(mut self) {
        tracing::info!("router started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                RouterCommand::Register {
                    client,
                    history_room,
                    reply,
                } => {
                    let replaced = self.handle_register(client, history_room);
                    let _ = reply.send(replaced);
                }
                RouterCommand::Unregister { id } => {
                    self.handle_unregister(id);
                }
                RouterCommand::Broadcast { message } => {
                    self.handle_broadcast(message).await;
                }
                RouterCommand::HistoryReplayed { id } => {
                    self.handle_history_replayed(id);
                }
                RouterCommand::LookupUser { user_id, reply } => {
                    let info = self.registry.lookup_by_user(&user_id).map(|c| ClientInfo {
                        id: c.id,
                        user_id: c.user_id.clone(),
                        display_name: c.display_name.clone(),
                        state: c.state(),
                    });
                    let _ = reply.send(info);
                }
                RouterCommand::Stats { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                RouterCommand::Shutdown => {
                    tracing::info!(connections = self.registry.len(), "router shutting down");
                    break;
                }
            }
        }

        tracing::info!("router stopped");
    }

    fn handle_register(
        &mut self,
        client: ClientHandle,
        history_room: Option<RoomId>,
    ) -> Option<ConnectionId> {
        let id = client.id;
        let user_id = client.user_id.clone();
        let outbound = client.downgrade();

        let replaced = self.registry.register(client).map(|old| {
            tracing::info!(
                conn_id = %old.id,
                %user_id,
                replaced_by = %id,
                "connection replaced by newer one"
            );
            self.stats.evicted += 1;
            old.id
        });

        tracing::info!(
            conn_id = %id,
            %user_id,
            connections = self.registry.len(),
            "connection registered"
        );

        match history_room {
            Some(room_id) => {
                let bootstrap = Bootstrap {
                    id,
                    user_id,
                    room_id,
                    outbound,
                    router: self.weak_sender.clone(),
                    directory: Arc::clone(&self.directory),
                    store: Arc::clone(&self.store),
                    limit: self.config.history_limit,
                    item_timeout: self.config.history_item_timeout,
                };
                tokio::spawn(bootstrap.run());
            }
            None => self.handle_history_replayed(id),
        }

        replaced
    }

    fn handle_unregister(&mut self, id: ConnectionId) {
        match self.registry.unregister(id) {
            Some(client) => tracing::info!(
                conn_id = %id,
                user_id = %client.user_id,
                connections = self.registry.len(),
                "connection unregistered"
            ),
            None => tracing::debug!(conn_id = %id, "unregister for unknown connection"),
        }
    }

    fn handle_history_replayed(&mut self, id: ConnectionId) {
        let Some(client) = self.registry.get_mut(id) else {
            return;
        };
        match client.activate() {
            Ok(flushed) => {
                tracing::debug!(conn_id = %id, flushed, "connection active");
            }
            Err(reason) => self.evict(id, reason),
        }
    }

    async fn handle_broadcast(&mut self, message: Message) {
        self.stats.broadcasts += 1;
        let room_id = message.room_id().clone();

        // Membership is re-read on every broadcast, never cached.
        let room = match self.directory.resolve(&room_id).await {
            Ok(Some(room)) => room,
            Ok(None) => {
                tracing::warn!(%room_id, "broadcast to unknown room, dropping");
                self.stats.dropped += 1;
                return;
            }
            Err(e) => {
                tracing::error!(%room_id, error = %e, "room lookup failed, dropping broadcast");
                self.stats.dropped += 1;
                return;
            }
        };

        let mut dead = Vec::new();
        for user_id in &room.participants {
            let Some(client) = self.registry.lookup_by_user_mut(user_id) else {
                continue;
            };
            match client.deliver(message.clone()) {
                Ok(()) => self.stats.delivered += 1,
                Err(reason) => dead.push((client.id, reason)),
            }
        }

        tracing::debug!(
            %room_id,
            kind = %message.kind(),
            participants = room.participants.len(),
            evicted = dead.len(),
            "broadcast fanned out"
        );

        for (id, reason) in dead {
            self.evict(id, reason);
        }
    }

    /// Removes a dead connection. Dropping its handle closes the queue,
    /// which stops its write pump and, with it, the whole connection.
    fn evict(&mut self, id: ConnectionId, reason: DeliveryError) {
        if let Some(client) = self.registry.unregister(id) {
            tracing::warn!(
                conn_id = %id,
                user_id = %client.user_id,
                ?reason,
                "evicting unresponsive connection"
            );
            self.stats.evicted += 1;
        }
    }

    fn snapshot(&self) -> RouterStats {
        RouterStats {
            connections: self.registry.len(),
            users: self.registry.user_count(),
            ..self.stats
        }
    }
}

/// Spawns the router task and returns a handle to it.
///
/// `channel_size` in `config` controls backpressure: when the command
/// channel is full, senders wait.
pub fn spawn_router<D, S>(config: RouterConfig, directory: Arc<D>, store: Arc<S>) -> RouterHandle
where
    D: RoomDirectory,
    S: MessageStore,
{
    let (tx, rx) = mpsc::channel(config.channel_size);

    let router = Router {
        registry: Registry::new(),
        directory,
        store,
        config,
        stats: RouterStats::default(),
        receiver: rx,
        weak_sender: tx.downgrade(),
    };

    tokio::spawn(router.run());

    RouterHandle { sender: tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_store::{InMemoryMessageStore, InMemoryRoomDirectory};

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn rid(s: &str) -> RoomId {
        RoomId::parse(s).unwrap()
    }

    fn spawn() -> RouterHandle {
        spawn_router(
            RouterConfig::default(),
            Arc::new(InMemoryRoomDirectory::new()),
            Arc::new(InMemoryMessageStore::new()),
        )
    }

    #[tokio::test]
    async fn test_register_without_history_is_active_immediately() {
        let router = spawn();
        let (client, _rx) = ClientHandle::new(ConnectionId::new(1), uid("alice"), "Alice", 8);
        assert_eq!(router.register(client, None).await.unwrap(), None);

        let info = router.lookup_user(uid("alice")).await.unwrap().unwrap();
        assert_eq!(info.id, ConnectionId::new(1));
        assert_eq!(info.display_name, "Alice");
        assert_eq!(info.state, ConnectionState::Active);
    }

    #[tokio::test]
    async fn test_register_reports_replaced_connection() {
        let router = spawn();
        let (first, _rx1) = ClientHandle::new(ConnectionId::new(1), uid("alice"), "Alice", 8);
        let (second, _rx2) = ClientHandle::new(ConnectionId::new(2), uid("alice"), "Alice", 8);
        router.register(first, None).await.unwrap();

        let replaced = router.register(second, None).await.unwrap();
        assert_eq!(replaced, Some(ConnectionId::new(1)));

        let stats = router.stats().await.unwrap();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.users, 1);
        assert_eq!(stats.evicted, 1);
    }

    #[tokio::test]
    async fn test_unregister_then_lookup_is_none() {
        let router = spawn();
        let (client, _rx) = ClientHandle::new(ConnectionId::new(1), uid("alice"), "Alice", 8);
        router.register(client, None).await.unwrap();
        router.unregister(ConnectionId::new(1)).await.unwrap();

        assert!(router.lookup_user(uid("alice")).await.unwrap().is_none());
        assert_eq!(router.stats().await.unwrap().connections, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_queues_and_handle() {
        let router = spawn();
        let (client, mut rx) = ClientHandle::new(ConnectionId::new(1), uid("alice"), "Alice", 8);
        router.register(client, None).await.unwrap();

        router.shutdown().await.unwrap();
        assert!(rx.recv().await.is_none());
        assert!(matches!(router.stats().await, Err(RouterError::Unavailable)));
        assert!(router.is_closed());
    }

    #[tokio::test]
    async fn test_broadcast_to_unknown_room_is_counted_as_dropped() {
        let router = spawn();
        router
            .broadcast(Message::system(rid("ghost"), "Ghost", "hello?"))
            .await
            .unwrap();
        let stats = router.stats().await.unwrap();
        assert_eq!(stats.broadcasts, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.delivered, 0);
    }
}
