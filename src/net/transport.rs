//! Transport interface consumed by the hub

use std::sync::Arc;

use crate::models::MessageRoot;

/// Write side of a peer connection.
///
/// `write` queues the message and returns immediately. Delivery failures
/// surface later as a link-down event, never to the caller.
pub trait Transport: Send + Sync {
    fn write(&self, message: Arc<MessageRoot>);
}
