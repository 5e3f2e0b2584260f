//! Link model: identity and liveness record for one remote peer

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};
use uuid::Uuid;

use super::MessageRoot;
use crate::net::Transport;

/// Link lifecycle event reported by the session layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Down,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Up => write!(f, "up"),
            LinkState::Down => write!(f, "down"),
        }
    }
}

/// A peer link.
///
/// The link never owns its transport. Resolving [`Link::transport`] fails
/// once the session layer has dropped the session.
#[derive(Clone)]
pub struct Link {
    id: Uuid,
    description: String,
    net: Weak<dyn Transport>,
}

/// Transport stand-in for links that have no session (e.g. the hub's own identity)
struct Detached;

impl Transport for Detached {
    fn write(&self, _message: Arc<MessageRoot>) {}
}

impl Link {
    /// Create a link bound to a transport
    pub fn new(id: Uuid, description: impl Into<String>, net: Weak<dyn Transport>) -> Self {
        Self {
            id,
            description: description.into(),
            net,
        }
    }

    /// Create a link with no transport behind it
    pub fn detached(id: Uuid, description: impl Into<String>) -> Self {
        let net: Weak<dyn Transport> = Weak::<Detached>::new();
        Self::new(id, description, net)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Resolve the transport for a single use
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.net.upgrade()
    }

    /// Whether the transport is still resolvable
    pub fn is_alive(&self) -> bool {
        self.net.strong_count() > 0
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Link {}

impl Hash for Link {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description, self.id)
    }
}
