//! Core protocol types for Parley's wire format.
//!
//! Everything in this module travels on the wire as JSON. Field names are
//! camelCase because the browser client reads them directly.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Longest identifier we accept, in bytes.
const MAX_ID_LEN: usize = 64;

/// Checks the shared identifier rules: non-empty, bounded, and made only
/// of ASCII letters, digits, `-` and `_`.
fn validate_id(kind: &'static str, value: &str) -> Result<(), ProtocolError> {
    if value.is_empty() {
        return Err(ProtocolError::InvalidIdentifier {
            kind,
            reason: "empty".into(),
        });
    }
    if value.len() > MAX_ID_LEN {
        return Err(ProtocolError::InvalidIdentifier {
            kind,
            reason: format!("longer than {MAX_ID_LEN} bytes"),
        });
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(ProtocolError::InvalidIdentifier {
            kind,
            reason: format!("unexpected character {bad:?}"),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Stable identifier of a user, issued by the authentication collaborator.
///
/// Serialized as a plain JSON string. Deserialization runs the same
/// validation as [`UserId::parse`], so a malformed id never makes it past
/// the codec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Validates and wraps a user identifier.
    pub fn parse(value: impl Into<String>) -> Result<Self, ProtocolError> {
        let value = value.into();
        validate_id("user id", &value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a room, owned by the room directory collaborator.
///
/// Same rules and wire shape as [`UserId`]. A one-to-one conversation is
/// just a room with two participants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Validates and wraps a room identifier.
    pub fn parse(value: impl Into<String>) -> Result<Self, ProtocolError> {
        let value = value.into();
        validate_id("room id", &value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier assigned to a message by the message store.
///
/// Opaque to the core: it is never parsed, only carried and compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// What a message is for.
///
/// Only [`Normal`](Self::Normal) messages come from clients. The other two
/// are synthesized by request handlers outside the routing core (room
/// created, member invited, room renamed) and injected into the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A chat message typed by a participant.
    #[default]
    Normal,
    /// A human-readable notice shown in the transcript ("alice invited bob").
    System,
    /// A control signal telling clients to refresh room state. Never shown.
    RoomStateUpdate,
}

impl MessageKind {
    /// Returns `true` if a client should render this message in the
    /// transcript.
    pub fn is_displayable(self) -> bool {
        match self {
            Self::Normal | Self::System => true,
            Self::RoomStateUpdate => false,
        }
    }

    /// Returns `true` if this message should count toward a client's
    /// unread badge.
    pub fn counts_as_unread(self) -> bool {
        match self {
            Self::Normal => true,
            Self::System | Self::RoomStateUpdate => false,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::System => write!(f, "system"),
            Self::RoomStateUpdate => write!(f, "room_state_update"),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Display name used as the sender of server-synthesized messages.
pub const SYSTEM_SENDER_NAME: &str = "system";

/// A fully stamped chat message, as persisted and as delivered.
///
/// Fields are private: once built, a message is only ever replaced by a new
/// value (see [`with_id`](Self::with_id)), never edited in place. That keeps
/// the copy the router fans out identical to the copy the store holds.
///
/// ```text
/// {
///   "id": "65f0c0ffee...",         ← absent until persisted
///   "type": "normal",
///   "senderId": "u-alice",         ← null for server-synthesized messages
///   "senderUsername": "Alice",
///   "roomId": "r-general",
///   "roomName": "General",
///   "content": "hi",
///   "timestamp": "2026-10-14T09:30:00Z",
///   "isRead": false
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<MessageId>,
    #[serde(rename = "type", default)]
    kind: MessageKind,
    #[serde(default)]
    sender_id: Option<UserId>,
    sender_username: String,
    room_id: RoomId,
    room_name: String,
    content: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    is_read: bool,
}

impl Message {
    /// Builds a chat message from a participant, stamped with the current
    /// time.
    pub fn normal(
        sender_id: UserId,
        sender_username: impl Into<String>,
        room_id: RoomId,
        room_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            kind: MessageKind::Normal,
            sender_id: Some(sender_id),
            sender_username: sender_username.into(),
            room_id,
            room_name: room_name.into(),
            content: content.into(),
            timestamp: Utc::now(),
            is_read: false,
        }
    }

    /// Builds a transcript notice for a room ("alice renamed the room").
    pub fn system(
        room_id: RoomId,
        room_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            kind: MessageKind::System,
            sender_id: None,
            sender_username: SYSTEM_SENDER_NAME.to_string(),
            room_id,
            room_name: room_name.into(),
            content: content.into(),
            timestamp: Utc::now(),
            is_read: false,
        }
    }

    /// Builds the hidden control message that tells clients a room's
    /// metadata or membership changed.
    ///
    /// Created already read: it must never light up an unread badge.
    pub fn room_state_update(room_id: RoomId, room_name: impl Into<String>) -> Self {
        Self {
            id: None,
            kind: MessageKind::RoomStateUpdate,
            sender_id: None,
            sender_username: SYSTEM_SENDER_NAME.to_string(),
            room_id,
            room_name: room_name.into(),
            content: String::new(),
            timestamp: Utc::now(),
            is_read: true,
        }
    }

    /// Returns this message with the store-assigned id.
    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }

    /// Returns this message with its read flag replaced.
    pub fn with_read(mut self, is_read: bool) -> Self {
        self.is_read = is_read;
        self
    }

    /// Returns this message with an explicit timestamp. Used by stores
    /// replaying data and by tests that need a fixed clock.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn id(&self) -> Option<&MessageId> {
        self.id.as_ref()
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The sending user, or `None` for server-synthesized messages.
    pub fn sender_id(&self) -> Option<&UserId> {
        self.sender_id.as_ref()
    }

    pub fn sender_username(&self) -> &str {
        &self.sender_username
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn room_name(&self) -> &str {
        &self.room_name
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_read(&self) -> bool {
        self.is_read
    }
}

// ---------------------------------------------------------------------------
// InboundFrame
// ---------------------------------------------------------------------------

/// What a client sends: a message stub addressed to a room.
///
/// Server-populated fields (`senderId`, `senderUsername`, `timestamp`,
/// `id`) are not part of this type, so serde ignores them if a client sends
/// them anyway. The client cannot forge who it is.
///
/// `room_id` stays a raw string here: a missing or malformed room id is a
/// routing decision (drop the frame), not a decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
}
