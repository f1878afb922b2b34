//! The registry: which connection belongs to which user.
//!
//! Owned by the router task and never shared, so it is a pair of plain
//! `HashMap`s with no locking. Two maps are kept in sync:
//!
//! ```text
//! clients: ConnectionId → ClientHandle   (every live connection)
//! users:   UserId       → ConnectionId   (the one live connection per user)
//! ```

use std::collections::HashMap;

use parley_protocol::{Message, UserId};
use parley_transport::ConnectionId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::ConnectionState;

/// Why a message could not be handed to a connection.
///
/// Both cases mean the same thing to the router: the client is dead and
/// gets evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The outbound queue is at capacity.
    Full,
    /// The write side has gone away.
    Closed,
}

/// The router's view of one connection.
///
/// Holds the only strong [`mpsc::Sender`] for the connection's outbound
/// queue. Dropping the handle closes the queue, which is how the write pump
/// learns it has to stop. For that reason the handle is deliberately not
/// `Clone`.
#[derive(Debug)]
pub struct ClientHandle {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub display_name: String,
    outbound: mpsc::Sender<Message>,
    state: ConnectionState,
    /// Live messages that arrived while history replay was still running.
    held: Vec<Message>,
}

impl ClientHandle {
    /// Creates a handle plus the receiving end of its outbound queue. The
    /// receiver belongs to the connection's write pump.
    pub fn new(
        id: ConnectionId,
        user_id: UserId,
        display_name: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (outbound, rx) = mpsc::channel(capacity);
        let handle = Self {
            id,
            user_id,
            display_name: display_name.into(),
            outbound,
            state: ConnectionState::Registered,
            held: Vec::new(),
        };
        (handle, rx)
    }

    /// A sender that does not keep the queue open, for history replay.
    pub(crate) fn downgrade(&self) -> mpsc::WeakSender<Message> {
        self.outbound.downgrade()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of live messages waiting for history replay to finish.
    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// Hands a live message to the connection without waiting.
    ///
    /// While the connection is still `Registered` the message is held back
    /// instead, so that replayed history always comes first. The holding
    /// area shares the queue's capacity: overflowing it is the same failure
    /// as overflowing the queue.
    pub fn deliver(&mut self, message: Message) -> Result<(), DeliveryError> {
        if self.state.is_live() {
            return self.try_send(message);
        }
        if self.outbound.is_closed() {
            return Err(DeliveryError::Closed);
        }
        if self.held.len() >= self.outbound.max_capacity() {
            return Err(DeliveryError::Full);
        }
        self.held.push(message);
        Ok(())
    }

    /// Moves the connection to `Active` and flushes held messages into the
    /// queue in arrival order. Returns how many were flushed.
    ///
    /// Calling this on a connection that is already `Active` is a no-op.
    pub fn activate(&mut self) -> Result<usize, DeliveryError> {
        if !self.state.can_transition_to(ConnectionState::Active) {
            return Ok(0);
        }
        self.state = ConnectionState::Active;
        let held = std::mem::take(&mut self.held);
        let count = held.len();
        for message in held {
            self.try_send(message)?;
        }
        Ok(count)
    }

    fn try_send(&self, message: Message) -> Result<(), DeliveryError> {
        self.outbound.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Tracks every live connection and enforces one connection per user.
#[derive(Debug, Default)]
pub struct Registry {
    clients: HashMap<ConnectionId, ClientHandle>,
    users: HashMap<UserId, ConnectionId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection. Last connection wins: any existing connection of
    /// the same user is removed from both maps and returned. Dropping the
    /// returned handle closes that connection's queue.
    pub fn register(&mut self, client: ClientHandle) -> Option<ClientHandle> {
        let evicted = self
            .users
            .insert(client.user_id.clone(), client.id)
            .and_then(|old| self.clients.remove(&old));

        self.clients.insert(client.id, client);
        evicted
    }

    /// Removes a connection by id. Idempotent.
    ///
    /// The user index entry is only cleared if it still points at this
    /// connection, so a late unregister from a replaced connection never
    /// removes its successor.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<ClientHandle> {
        let client = self.clients.remove(&id)?;
        if self.users.get(&client.user_id) == Some(&id) {
            self.users.remove(&client.user_id);
        }
        Some(client)
    }

    pub fn lookup_by_user(&self, user_id: &UserId) -> Option<&ClientHandle> {
        self.users.get(user_id).and_then(|id| self.clients.get(id))
    }

    pub(crate) fn lookup_by_user_mut(&mut self, user_id: &UserId) -> Option<&mut ClientHandle> {
        let id = self.users.get(user_id)?;
        self.clients.get_mut(id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ClientHandle> {
        self.clients.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ConnectionId) -> Option<&mut ClientHandle> {
        self.clients.get_mut(&id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Number of users with a live connection. Always equal to `len()`;
    /// kept separate so tests can assert the two maps agree.
    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}
