//! Wire protocol for Parley.
//!
//! This crate defines what clients and the server exchange:
//!
//! - **Identifiers** ([`UserId`], [`RoomId`], [`MessageId`]): validated
//!   newtypes so a room id can never be passed where a user id is expected.
//! - **Messages** ([`Message`], [`MessageKind`], [`InboundFrame`]): the
//!   stamped chat message the server fans out, and the stub a client sends.
//! - **Connect parameters** ([`ConnectParams`]): who is connecting, parsed
//!   from the upgrade request's query string.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how messages become bytes.
//!
//! The protocol layer knows nothing about sockets or registries:
//!
//! ```text
//! Transport (bytes) → Protocol (Message) → Router (who receives it)
//! ```

mod codec;
mod connect;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use connect::{ConnectParams, ConnectParamsError};
pub use error::ProtocolError;
pub use types::{InboundFrame, Message, MessageId, MessageKind, RoomId, SYSTEM_SENDER_NAME, UserId};
