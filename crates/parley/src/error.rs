//! Unified error type for Parley.

use parley_protocol::ProtocolError;
use parley_router::RouterError;
use parley_store::StoreError;
use parley_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impl, so
/// `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    /// Socket, upgrade, or timeout failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encode, decode, or identifier validation failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A storage collaborator failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The router task is gone.
    #[error(transparent)]
    Router(#[from] RouterError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let parley_err: ParleyError = err.into();
        assert!(matches!(parley_err, ParleyError::Transport(_)));
        assert!(parley_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = parley_protocol::UserId::parse("").unwrap_err();
        let parley_err: ParleyError = err.into();
        assert!(matches!(parley_err, ParleyError::Protocol(_)));
        assert!(parley_err.to_string().contains("user id"));
    }

    #[test]
    fn test_from_store_error() {
        let err = StoreError::Unavailable("db down".into());
        let parley_err: ParleyError = err.into();
        assert!(matches!(parley_err, ParleyError::Store(_)));
        assert!(parley_err.to_string().contains("db down"));
    }

    #[test]
    fn test_from_router_error() {
        let parley_err: ParleyError = RouterError::Unavailable.into();
        assert!(matches!(parley_err, ParleyError::Router(_)));
        assert_eq!(parley_err.to_string(), "router is not running");
    }
}
