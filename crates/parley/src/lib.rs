//! # Parley
//!
//! Real-time chat message routing over WebSocket.
//!
//! Clients connect with their identity in the query string, send messages
//! addressed to a room, and receive every message of every room they
//! belong to. Parley persists each message before delivering it, replays
//! recent history on connect, and keeps at most one live connection per
//! user (the newest wins).
//!
//! Who belongs to which room, and where messages are stored, is up to you:
//! implement [`RoomDirectory`](parley_store::RoomDirectory) and
//! [`MessageStore`](parley_store::MessageStore), or start with the
//! in-memory versions.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parley::prelude::*;
//!
//! # async fn start() -> Result<(), ParleyError> {
//! parley::init_tracing("info");
//!
//! let directory = InMemoryRoomDirectory::new();
//! let server = ParleyServerBuilder::new()
//!     .bind("0.0.0.0:8080")
//!     .build(directory, InMemoryMessageStore::new())
//!     .await?;
//! server.run().await
//! # }
//! ```

mod error;
mod handler;
mod server;

pub use error::ParleyError;
pub use server::{ParleyServer, ParleyServerBuilder};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs a `tracing` subscriber that prints to stdout.
///
/// `RUST_LOG` wins when set; otherwise `default_directive` (for example
/// `"info"` or `"parley=debug"`) is used. Calling this twice is harmless:
/// the second call leaves the first subscriber in place.
pub fn init_tracing(default_directive: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Everything needed to run a server and talk to it from request handlers.
pub mod prelude {
    pub use crate::{ParleyError, ParleyServer, ParleyServerBuilder};
    pub use parley_protocol::{
        Codec, ConnectParams, InboundFrame, JsonCodec, Message, MessageId, MessageKind, RoomId,
        UserId,
    };
    pub use parley_router::{ClientInfo, ConnectionState, RouterConfig, RouterHandle, RouterStats};
    pub use parley_store::{
        InMemoryMessageStore, InMemoryRoomDirectory, MessageStore, RoomDirectory, RoomMembership,
        StoreError,
    };
    pub use parley_transport::{ConnectionConfig, ConnectionId};
}
