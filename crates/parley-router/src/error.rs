//! Error types for the router layer.

use parley_store::StoreError;

/// Errors that can occur while talking to the router.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The router task has stopped: its command channel is closed, or it
    /// dropped a reply without answering.
    #[error("router is not running")]
    Unavailable,

    /// A storage collaborator failed while the router was using it.
    #[error(transparent)]
    Store(#[from] StoreError),
}
