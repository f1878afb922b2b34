//! Error types for the storage collaborators.

/// Errors returned by a [`RoomDirectory`](crate::RoomDirectory) or a
/// [`MessageStore`](crate::MessageStore).
///
/// The router treats every variant the same way: the operation failed, the
/// message is not delivered, and the connection stays up. The variants exist
/// so that logs say what went wrong.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached at all.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A write was attempted and rejected.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// A read was attempted and rejected.
    #[error("read failed: {0}")]
    ReadFailed(String),
}
