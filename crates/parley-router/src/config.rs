//! Router configuration and the connection lifecycle state machine.

use std::time::Duration;

// ---------------------------------------------------------------------------
// RouterConfig
// ---------------------------------------------------------------------------

/// Configuration for the router task and the history replay it spawns.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Capacity of the router's command channel. When full, callers of
    /// [`RouterHandle`](crate::RouterHandle) wait.
    pub channel_size: usize,

    /// How many past messages a new connection is sent on connect.
    pub history_limit: usize,

    /// How long to wait for room in a connection's queue for one history
    /// item before skipping it.
    pub history_item_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            channel_size: 1024,
            history_limit: 50,
            history_item_timeout: Duration::from_secs(1),
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// The lifecycle state of a connection.
///
/// Transitions are strictly ordered, no skipping:
///
/// ```text
/// Connecting → Registered → Active → Unregistering → Gone
/// ```
///
/// - **Connecting**: Socket upgraded, not yet known to the router.
/// - **Registered**: In the registry. History replay may still be running;
///   live messages for this connection are held back until it finishes.
/// - **Active**: Live messages flow straight into the outbound queue.
/// - **Unregistering**: One of the pumps stopped; removal is in flight.
/// - **Gone**: Removed from the registry, queue closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Registered,
    Active,
    Unregistering,
    Gone,
}

impl ConnectionState {
    /// Returns `true` if live broadcasts may be written to the queue
    /// directly.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns the state that follows this one, or `None` for `Gone`.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Connecting => Some(Self::Registered),
            Self::Registered => Some(Self::Active),
            Self::Active => Some(Self::Unregistering),
            Self::Unregistering => Some(Self::Gone),
            Self::Gone => None,
        }
    }

    /// Returns `true` if transitioning to `target` is valid.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Registered => write!(f, "Registered"),
            Self::Active => write!(f, "Active"),
            Self::Unregistering => write!(f, "Unregistering"),
            Self::Gone => write!(f, "Gone"),
        }
    }
}
