//! Handler interface and registration modes

use serde::{Deserialize, Serialize};

use crate::models::{Link, LinkState, MessageRoot};

/// Which side of a service a registration applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Consumers of the service
    Client,
    /// Providers of the service
    Server,
    Both,
}

impl Mode {
    pub fn includes_client(&self) -> bool {
        matches!(self, Mode::Client | Mode::Both)
    }

    pub fn includes_server(&self) -> bool {
        matches!(self, Mode::Server | Mode::Both)
    }
}

/// Message processor for one service.
///
/// Both entry points may be called concurrently from different sessions and
/// must not block.
pub trait EventHandler: Send + Sync {
    fn handle_message(&self, link: &Link, message: &MessageRoot);

    fn handle_event(&self, link: &Link, state: LinkState);

    /// Stop producing traffic. Called once per hub shutdown.
    fn shutdown(&self) {}
}
