//! Hub services: message routing, heartbeat and request tracking

mod core_handler;
mod hub;
mod tracking_service;

pub use core_handler::*;
pub use hub::*;
pub use tracking_service::*;
