//! Data models for the mesh hub
//!
//! Links, service identifiers and the message envelope.

mod error;
mod link;
mod message;
mod service;

pub use error::*;
pub use link::*;
pub use message::*;
pub use service::*;
