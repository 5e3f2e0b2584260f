//! Mesh Hub - Peer Link Management and Message Routing
//!
//! The control plane of an inter-process messaging fabric, providing:
//! - Peer link negotiation over length-delimited TCP sessions
//! - Service-based dispatch of inbound messages to registered handlers
//! - Send, tracked send and mode-filtered broadcast
//! - Heartbeat pings with round-trip measurement

pub mod config;
pub mod models;
pub mod registry;
pub mod services;
pub mod net;
pub mod metrics;

// Re-export commonly used types
pub use config::Settings;
pub use models::{HubError, HubResult, Link, LinkState, MessageRoot, Payload, ServiceType};
pub use registry::{EventDispatcher, EventHandler, Mode, ServicesMap};
pub use services::{CoreHandler, Hub, HubConfig, PeerInfo, TrackingHandler, TrackingService};
pub use net::{Listener, NetworkSession, SessionManager, Transport};

/// Version of the mesh-hub
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
