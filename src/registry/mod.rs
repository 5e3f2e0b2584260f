//! Service and handler registries
//!
//! Lookup structures consulted by the hub for dispatch and broadcast.

mod dispatcher;
mod handler;
mod services_map;

pub use dispatcher::*;
pub use handler::*;
pub use services_map::*;
