//! Message routing for Parley.
//!
//! A single router task owns the [`Registry`] of live connections and fans
//! every persisted message out to the connected members of its room.
//!
//! # Key types
//!
//! - [`RouterHandle`]: send commands to the running router
//! - [`Registry`]: connection/user maps, one live connection per user
//! - [`ClientHandle`]: the router's side of a connection's outbound queue
//! - [`ConnectionState`]: connection lifecycle state machine
//! - [`RouterConfig`]: channel size and history replay settings
//!
//! # Delivery policy
//!
//! Fan-out never waits on a slow client. A message that does not fit in a
//! connection's queue gets that connection evicted on the spot, and the
//! other participants still receive it.

mod bootstrap;
mod config;
mod error;
mod registry;
mod router;

pub use config::{ConnectionState, RouterConfig};
pub use error::RouterError;
pub use registry::{ClientHandle, DeliveryError, Registry};
pub use router::{ClientInfo, RouterHandle, RouterStats, spawn_router};
