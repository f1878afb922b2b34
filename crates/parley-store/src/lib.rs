//! Storage collaborators for Parley.
//!
//! The routing core never owns data. It asks two collaborators:
//!
//! 1. **Room directory** ([`RoomDirectory`]): who is in a room right now.
//! 2. **Message store** ([`MessageStore`]): make a message durable, fetch
//!    recent history, flip read flags.
//!
//! ```text
//! Router / Connection  ── resolve(room) ──→  RoomDirectory
//!                      ── insert(msg)   ──→  MessageStore
//!                      ── recent(room)  ──→  MessageStore
//! ```
//!
//! Production deployments implement these traits over their database. The
//! in-memory implementations here ([`InMemoryRoomDirectory`],
//! [`InMemoryMessageStore`]) back the demo server and the test suites.
//!
//! # Why `impl Future + Send` instead of `async fn`?
//!
//! The core spawns calls to these traits on a multi-threaded runtime, so the
//! returned futures must be `Send`. Spelling the return type out states that
//! bound once for every implementor; implementors can still write the body
//! as an `async fn` or an `async move` block.

mod directory;
mod error;
mod memory;

pub use directory::{InMemoryRoomDirectory, RoomMembership};
pub use error::StoreError;
pub use memory::{DEFAULT_MESSAGE_TTL, InMemoryMessageStore};

use std::future::Future;

use parley_protocol::{Message, MessageId, RoomId};

/// Answers "which users belong to this room?".
///
/// Queried on every inbound chat message and every broadcast. The core
/// never caches the answer, so membership changes take effect on the very
/// next message.
pub trait RoomDirectory: Send + Sync + 'static {
    /// Returns a snapshot of the room's metadata and participants, or
    /// `Ok(None)` if the room does not exist.
    fn resolve(
        &self,
        room_id: &RoomId,
    ) -> impl Future<Output = Result<Option<RoomMembership>, StoreError>> + Send;
}

/// Durable message storage.
pub trait MessageStore: Send + Sync + 'static {
    /// Persists a message and returns it with its store-assigned id. Every
    /// other field comes back exactly as given.
    fn insert(
        &self,
        message: Message,
    ) -> impl Future<Output = Result<Message, StoreError>> + Send;

    /// Returns up to `limit` of the room's most recent messages, ordered
    /// oldest to newest.
    fn recent(
        &self,
        room_id: &RoomId,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send;

    /// Sets `isRead` on the given messages. Returns how many messages
    /// actually changed; ids that are unknown or already read are skipped.
    fn mark_read(
        &self,
        ids: &[MessageId],
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;
}
