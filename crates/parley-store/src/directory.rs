//! Room membership snapshots and the in-memory directory.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parley_protocol::{RoomId, UserId};
use tokio::sync::RwLock;

use crate::{RoomDirectory, StoreError};

/// A point-in-time view of one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMembership {
    pub room_id: RoomId,
    pub room_name: String,
    pub participants: HashSet<UserId>,
}

impl RoomMembership {
    /// Creates a room with no participants.
    pub fn new(room_id: RoomId, room_name: impl Into<String>) -> Self {
        Self {
            room_id,
            room_name: room_name.into(),
            participants: HashSet::new(),
        }
    }

    /// Builder-style helper that adds participants.
    pub fn with_participants(mut self, users: impl IntoIterator<Item = UserId>) -> Self {
        self.participants.extend(users);
        self
    }

    pub fn is_participant(&self, user_id: &UserId) -> bool {
        self.participants.contains(user_id)
    }
}

/// A [`RoomDirectory`] that keeps every room in a shared map.
///
/// Cloning is cheap and every clone sees the same rooms, so a test (or the
/// code that creates rooms) can keep a handle after giving one to the
/// server.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRoomDirectory {
    rooms: Arc<RwLock<HashMap<RoomId, RoomMembership>>>,
}

impl InMemoryRoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces a room.
    pub async fn upsert_room(
        &self,
        room_id: RoomId,
        room_name: impl Into<String>,
        participants: impl IntoIterator<Item = UserId>,
    ) {
        let membership = RoomMembership::new(room_id.clone(), room_name)
            .with_participants(participants);
        tracing::debug!(%room_id, members = membership.participants.len(), "room upserted");
        self.rooms.write().await.insert(room_id, membership);
    }

    /// Adds a user to an existing room. Returns `false` if the room does
    /// not exist or the user was already a member.
    pub async fn add_participant(&self, room_id: &RoomId, user_id: UserId) -> bool {
        let mut rooms = self.rooms.write().await;
        match rooms.get_mut(room_id) {
            Some(room) => room.participants.insert(user_id),
            None => false,
        }
    }

    /// Removes a user from a room. Returns `false` if nothing changed.
    pub async fn remove_participant(&self, room_id: &RoomId, user_id: &UserId) -> bool {
        let mut rooms = self.rooms.write().await;
        match rooms.get_mut(room_id) {
            Some(room) => room.participants.remove(user_id),
            None => false,
        }
    }

    /// Renames a room. Returns `false` if the room does not exist.
    pub async fn rename_room(&self, room_id: &RoomId, room_name: impl Into<String>) -> bool {
        let mut rooms = self.rooms.write().await;
        match rooms.get_mut(room_id) {
            Some(room) => {
                room.room_name = room_name.into();
                true
            }
            None => false,
        }
    }

    /// Deletes a room and returns its last snapshot.
    pub async fn remove_room(&self, room_id: &RoomId) -> Option<RoomMembership> {
        self.rooms.write().await.remove(room_id)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl RoomDirectory for InMemoryRoomDirectory {
    async fn resolve(&self, room_id: &RoomId) -> Result<Option<RoomMembership>, StoreError> {
        Ok(self.rooms.read().await.get(room_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn rid(s: &str) -> RoomId {
        RoomId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_unknown_room_returns_none() {
        let directory = InMemoryRoomDirectory::new();
        assert!(directory.resolve(&rid("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_then_resolve() {
        let directory = InMemoryRoomDirectory::new();
        directory
            .upsert_room(rid("general"), "General", [uid("alice"), uid("bob")])
            .await;

        let room = directory.resolve(&rid("general")).await.unwrap().unwrap();
        assert_eq!(room.room_name, "General");
        assert!(room.is_participant(&uid("alice")));
        assert!(room.is_participant(&uid("bob")));
        assert!(!room.is_participant(&uid("carol")));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let directory = InMemoryRoomDirectory::new();
        let handle = directory.clone();
        handle.upsert_room(rid("r1"), "R1", [uid("alice")]).await;

        assert_eq!(directory.room_count().await, 1);
        assert!(directory.add_participant(&rid("r1"), uid("bob")).await);

        let room = handle.resolve(&rid("r1")).await.unwrap().unwrap();
        assert!(room.is_participant(&uid("bob")));
    }

    #[tokio::test]
    async fn test_add_participant_twice_reports_no_change() {
        let directory = InMemoryRoomDirectory::new();
        directory.upsert_room(rid("r1"), "R1", [uid("alice")]).await;
        assert!(!directory.add_participant(&rid("r1"), uid("alice")).await);
        assert!(!directory.add_participant(&rid("missing"), uid("alice")).await);
    }

    #[tokio::test]
    async fn test_remove_participant_and_room() {
        let directory = InMemoryRoomDirectory::new();
        directory
            .upsert_room(rid("r1"), "R1", [uid("alice"), uid("bob")])
            .await;

        assert!(directory.remove_participant(&rid("r1"), &uid("bob")).await);
        let room = directory.resolve(&rid("r1")).await.unwrap().unwrap();
        assert_eq!(room.participants.len(), 1);

        let removed = directory.remove_room(&rid("r1")).await.unwrap();
        assert_eq!(removed.room_id, rid("r1"));
        assert!(directory.resolve(&rid("r1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rename_room() {
        let directory = InMemoryRoomDirectory::new();
        directory.upsert_room(rid("r1"), "Old", Vec::new()).await;
        assert!(directory.rename_room(&rid("r1"), "New").await);
        let room = directory.resolve(&rid("r1")).await.unwrap().unwrap();
        assert_eq!(room.room_name, "New");
    }
}
