//! Session layer
//!
//! Length-delimited TCP sessions, link negotiation and the listener.

mod listener;
mod message_handler;
mod session;
mod session_manager;
mod transport;

pub use listener::*;
pub use message_handler::*;
pub use session::*;
pub use session_manager::*;
pub use transport::*;
