//! `ParleyServer` builder and server loop.
//!
//! This is the entry point for running a Parley chat server. It ties
//! together all the layers: transport → protocol → store → router.

use std::sync::Arc;

use parley_protocol::JsonCodec;
use parley_router::{RouterConfig, RouterHandle, spawn_router};
use parley_store::{MessageStore, RoomDirectory};
use parley_transport::{ConnectionConfig, Transport, WebSocketTransport};

use crate::ParleyError;
use crate::handler::handle_connection;

/// Shared server state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. Nothing in
/// here is mutable: registry state lives inside the router task.
pub(crate) struct ServerState<D, S> {
    pub(crate) directory: Arc<D>,
    pub(crate) store: Arc<S>,
    pub(crate) router: RouterHandle,
    pub(crate) codec: JsonCodec,
    pub(crate) config: ConnectionConfig,
}

/// Builder for configuring and starting a Parley server.
///
/// # Example
///
/// ```rust,no_run
/// use parley::prelude::*;
///
/// # async fn start() -> Result<(), ParleyError> {
/// let server = ParleyServerBuilder::new()
///     .bind("0.0.0.0:8080")
///     .build(InMemoryRoomDirectory::new(), InMemoryMessageStore::new())
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct ParleyServerBuilder {
    bind_addr: String,
    connection_config: ConnectionConfig,
    router_config: RouterConfig,
}

impl ParleyServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            connection_config: ConnectionConfig::default(),
            router_config: RouterConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets per-connection timeouts and limits.
    pub fn connection_config(mut self, config: ConnectionConfig) -> Self {
        self.connection_config = config;
        self
    }

    /// Sets the router channel size and history replay settings.
    pub fn router_config(mut self, config: RouterConfig) -> Self {
        self.router_config = config;
        self
    }

    /// Binds the listener and starts the router.
    ///
    /// Must be called from inside a Tokio runtime, since the router task
    /// is spawned here.
    pub async fn build<D, S>(self, directory: D, store: S) -> Result<ParleyServer<D, S>, ParleyError>
    where
        D: RoomDirectory,
        S: MessageStore,
    {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let directory = Arc::new(directory);
        let store = Arc::new(store);
        let router = spawn_router(
            self.router_config,
            Arc::clone(&directory),
            Arc::clone(&store),
        );

        let state = Arc::new(ServerState {
            directory,
            store,
            router,
            codec: JsonCodec,
            config: self.connection_config,
        });

        Ok(ParleyServer { transport, state })
    }
}

impl Default for ParleyServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Parley server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct ParleyServer<D, S> {
    transport: WebSocketTransport,
    state: Arc<ServerState<D, S>>,
}

impl<D, S> ParleyServer<D, S>
where
    D: RoomDirectory,
    S: MessageStore,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Returns a handle to the router.
    ///
    /// Request handlers outside the core (room created, member invited)
    /// use it to inject `system` and `room_state_update` messages.
    pub fn router(&self) -> RouterHandle {
        self.state.router.clone()
    }

    /// Runs the server accept loop.
    ///
    /// Each accepted socket gets its own task, which performs the upgrade
    /// and then runs the connection until it closes. Runs until the
    /// process is terminated.
    pub async fn run(mut self) -> Result<(), ParleyError> {
        tracing::info!("Parley server running");

        loop {
            match self.transport.accept().await {
                Ok(pending) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(pending, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
