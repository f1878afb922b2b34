//! Codec trait and implementations for serializing/deserializing messages.
//!
//! The router and connection handler never call `serde_json` directly; they
//! go through a [`Codec`]. JSON is what the browser client speaks today, and
//! the seam leaves room for a binary codec without touching the core.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes Rust values to bytes and decodes bytes back.
///
/// `Send + Sync + 'static` because a single codec value is shared by every
/// connection task for the lifetime of the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or do not
    /// match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] backed by `serde_json`.
///
/// ```rust
/// use parley_protocol::{Codec, InboundFrame, JsonCodec};
///
/// let frame: InboundFrame = JsonCodec
///     .decode(br#"{"roomId":"r1","content":"hi"}"#)
///     .unwrap();
/// assert_eq!(frame.content, "hi");
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{InboundFrame, Message, MessageId, RoomId, UserId};

    #[test]
    fn test_json_codec_decodes_inbound_frame() {
        let frame: InboundFrame = JsonCodec
            .decode(br#"{"roomId":"r1","content":"hello"}"#)
            .unwrap();
        assert_eq!(frame.room_id.as_deref(), Some("r1"));
        assert_eq!(frame.content, "hello");
    }

    #[test]
    fn test_json_codec_rejects_non_json() {
        let result: Result<InboundFrame, _> = JsonCodec.decode(b"just text");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_json_codec_rejects_non_object() {
        let result: Result<InboundFrame, _> = JsonCodec.decode(b"[1,2,3]");
        assert!(result.is_err());
    }

    #[test]
    fn test_json_codec_encodes_message_as_json_text() {
        let msg = Message::normal(
            UserId::parse("alice").unwrap(),
            "Alice",
            RoomId::parse("r1").unwrap(),
            "General",
            "hi",
        )
        .with_id(MessageId::new("m1"));

        let bytes = JsonCodec.encode(&msg).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains(r#""roomId":"r1""#));

        let back: Message = JsonCodec.decode(&bytes).unwrap();
        assert_eq!(back, msg);
    }
}
