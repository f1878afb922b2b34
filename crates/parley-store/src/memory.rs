//! In-memory message store with time-based expiry.
//!
//! Messages live in one `Vec` per room, in insertion order. Anything older
//! than the TTL is purged lazily on the next write or read of that room, the
//! same observable behavior as a TTL index on the timestamp field.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use parley_protocol::{Message, MessageId, RoomId};
use rand::Rng;
use tokio::sync::Mutex;

use crate::{MessageStore, StoreError};

/// How long a message is kept: 30 minutes.
pub const DEFAULT_MESSAGE_TTL: Duration = Duration::from_secs(30 * 60);

/// A [`MessageStore`] that keeps messages in process memory.
///
/// Clones share the same storage.
#[derive(Debug, Clone)]
pub struct InMemoryMessageStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    rooms: Mutex<HashMap<RoomId, Vec<Message>>>,
    ttl: TimeDelta,
    available: AtomicBool,
}

impl InMemoryMessageStore {
    /// Creates an empty store with [`DEFAULT_MESSAGE_TTL`].
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_MESSAGE_TTL)
    }

    /// Creates an empty store that expires messages after `ttl`.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                rooms: Mutex::new(HashMap::new()),
                ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Switches the store on or off. While off, every operation fails with
    /// [`StoreError::Unavailable`]. Lets tests exercise the "persistence
    /// failed" path against a real store.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Number of unexpired messages stored for a room.
    pub async fn len(&self, room_id: &RoomId) -> usize {
        let mut rooms = self.inner.rooms.lock().await;
        match rooms.get_mut(room_id) {
            Some(messages) => {
                self.purge_expired(messages);
                messages.len()
            }
            None => 0,
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store switched off".into()))
        }
    }

    fn purge_expired(&self, messages: &mut Vec<Message>) {
        let Some(cutoff) = Utc::now().checked_sub_signed(self.inner.ttl) else {
            return;
        };
        let before = messages.len();
        messages.retain(|m| m.timestamp() >= cutoff);
        let purged = before - messages.len();
        if purged > 0 {
            tracing::debug!(purged, "expired messages purged");
        }
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, message: Message) -> Result<Message, StoreError> {
        self.check_available()?;

        let stored = message.with_id(generate_message_id());
        let mut rooms = self.inner.rooms.lock().await;
        let messages = rooms.entry(stored.room_id().clone()).or_default();
        self.purge_expired(messages);
        messages.push(stored.clone());
        Ok(stored)
    }

    async fn recent(&self, room_id: &RoomId, limit: usize) -> Result<Vec<Message>, StoreError> {
        self.check_available()?;

        let mut rooms = self.inner.rooms.lock().await;
        let Some(messages) = rooms.get_mut(room_id) else {
            return Ok(Vec::new());
        };
        self.purge_expired(messages);

        let mut recent: Vec<Message> = messages.clone();
        // Stable: messages with equal timestamps keep insertion order.
        recent.sort_by_key(Message::timestamp);
        let skip = recent.len().saturating_sub(limit);
        Ok(recent.split_off(skip))
    }

    async fn mark_read(&self, ids: &[MessageId]) -> Result<usize, StoreError> {
        self.check_available()?;
        if ids.is_empty() {
            return Ok(0);
        }

        let wanted: HashSet<&MessageId> = ids.iter().collect();
        let mut changed = 0;
        let mut rooms = self.inner.rooms.lock().await;
        for message in rooms.values_mut().flat_map(|messages| messages.iter_mut()) {
            let hit = message.id().is_some_and(|id| wanted.contains(id));
            if hit && !message.is_read() {
                *message = message.clone().with_read(true);
                changed += 1;
            }
        }
        Ok(changed)
    }
}

/// Generates a 24-character lowercase hex id (96 random bits), the same
/// shape as a document-store object id.
fn generate_message_id() -> MessageId {
    let mut rng = rand::rng();
    let bytes: [u8; 12] = rng.random();
    MessageId::new(bytes.iter().map(|b| format!("{b:02x}")).collect::<String>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::UserId;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn rid(s: &str) -> RoomId {
        RoomId::parse(s).unwrap()
    }

    fn chat(room: &str, content: &str) -> Message {
        Message::normal(uid("alice"), "Alice", rid(room), "Room", content)
    }

    #[test]
    fn test_generate_message_id_shape() {
        let id = generate_message_id();
        assert_eq!(id.as_str().len(), 24);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, generate_message_id());
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_preserves_fields() {
        let store = InMemoryMessageStore::new();
        let original = chat("r1", "hi");
        let stored = store.insert(original.clone()).await.unwrap();

        assert!(stored.id().is_some());
        assert_eq!(stored.content(), "hi");
        assert_eq!(stored.sender_id(), original.sender_id());
        assert_eq!(stored.timestamp(), original.timestamp());
        assert!(!stored.is_read());
    }

    #[tokio::test]
    async fn test_insert_keeps_read_flag_of_room_state_update() {
        let store = InMemoryMessageStore::new();
        let stored = store
            .insert(Message::room_state_update(rid("r1"), "Room"))
            .await
            .unwrap();
        assert!(stored.is_read());
    }

    #[tokio::test]
    async fn test_recent_returns_oldest_first_and_caps() {
        let store = InMemoryMessageStore::new();
        let base = Utc::now();
        for i in 0..5 {
            let msg = chat("r1", &format!("m{i}")).with_timestamp(base + TimeDelta::seconds(i));
            store.insert(msg).await.unwrap();
        }

        let recent = store.recent(&rid("r1"), 3).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(Message::content).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_recent_unknown_room_is_empty() {
        let store = InMemoryMessageStore::new();
        assert!(store.recent(&rid("r1"), 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_is_scoped_to_room() {
        let store = InMemoryMessageStore::new();
        store.insert(chat("r1", "one")).await.unwrap();
        store.insert(chat("r2", "two")).await.unwrap();

        let recent = store.recent(&rid("r1"), 50).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content(), "one");
    }

    #[tokio::test]
    async fn test_expired_messages_are_purged() {
        let store = InMemoryMessageStore::with_ttl(Duration::from_secs(60));
        let old = chat("r1", "old").with_timestamp(Utc::now() - TimeDelta::minutes(5));
        store.insert(old).await.unwrap();
        store.insert(chat("r1", "fresh")).await.unwrap();

        let recent = store.recent(&rid("r1"), 50).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content(), "fresh");
        assert_eq!(store.len(&rid("r1")).await, 1);
    }

    #[tokio::test]
    async fn test_mark_read_counts_only_changes() {
        let store = InMemoryMessageStore::new();
        let a = store.insert(chat("r1", "a")).await.unwrap();
        let b = store.insert(chat("r1", "b")).await.unwrap();
        let a_id = a.id().unwrap().clone();
        let b_id = b.id().unwrap().clone();

        let changed = store
            .mark_read(&[a_id.clone(), MessageId::new("unknown")])
            .await
            .unwrap();
        assert_eq!(changed, 1);

        // Already read: no change the second time.
        assert_eq!(store.mark_read(&[a_id, b_id]).await.unwrap(), 1);

        let recent = store.recent(&rid("r1"), 50).await.unwrap();
        assert!(recent.iter().all(Message::is_read));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_operation() {
        let store = InMemoryMessageStore::new();
        store.set_available(false);

        assert!(matches!(
            store.insert(chat("r1", "x")).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.recent(&rid("r1"), 1).await.is_err());
        assert!(store.mark_read(&[MessageId::new("x")]).await.is_err());

        store.set_available(true);
        assert!(store.insert(chat("r1", "x")).await.is_ok());
    }
}
