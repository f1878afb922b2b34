//! Error types for the protocol layer.
//!
//! Each crate in Parley defines its own error enum. A `ProtocolError` always
//! means the bytes or identifiers were wrong, never that a socket or a room
//! lookup failed.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing required fields, or
    /// a field that failed validation.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// An identifier did not pass validation.
    #[error("invalid {kind}: {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        reason: String,
    },
}
