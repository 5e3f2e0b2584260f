//! Handler registry keyed by service

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use super::{EventHandler, Mode};
use crate::models::ServiceType;

type Handlers = HashMap<ServiceType, Arc<dyn EventHandler>>;

#[derive(Default)]
struct Inner {
    client: Handlers,
    server: Handlers,
}

/// Maps services to the handler responsible for them
#[derive(Default)]
pub struct EventDispatcher {
    inner: RwLock<Inner>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a service.
    ///
    /// A later registration for the same service and mode replaces the
    /// earlier one.
    pub fn register_handler(
        &self,
        handler: Arc<dyn EventHandler>,
        service: ServiceType,
        mode: Mode,
    ) {
        let mut inner = self.inner.write();

        if mode.includes_client() && inner.client.insert(service, Arc::clone(&handler)).is_some() {
            warn!("Replaced client handler for service {}", service);
        }

        if mode.includes_server() && inner.server.insert(service, handler).is_some() {
            warn!("Replaced server handler for service {}", service);
        }
    }

    /// Handler registered for a service in the given mode
    pub fn handler(&self, service: ServiceType, mode: Mode) -> Option<Arc<dyn EventHandler>> {
        let inner = self.inner.read();
        let client = inner.client.get(&service).filter(|_| mode.includes_client());
        let server = inner.server.get(&service).filter(|_| mode.includes_server());
        server.or(client).cloned()
    }

    /// Handler for an inbound message: server-side registration first, then client-side
    pub fn handler_for(&self, service: ServiceType) -> Option<Arc<dyn EventHandler>> {
        self.handler(service, Mode::Both)
    }

    /// Every distinct registered handler, each once
    pub fn handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        let inner = self.inner.read();
        let mut handlers: Vec<Arc<dyn EventHandler>> = Vec::new();

        for handler in inner.server.values().chain(inner.client.values()) {
            if !handlers.iter().any(|h| Arc::ptr_eq(h, handler)) {
                handlers.push(Arc::clone(handler));
            }
        }

        handlers
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("EventDispatcher")
            .field("client", &inner.client.keys().collect::<Vec<_>>())
            .field("server", &inner.server.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Link, LinkState, MessageRoot};

    struct Nop;

    impl EventHandler for Nop {
        fn handle_message(&self, _link: &Link, _message: &MessageRoot) {}
        fn handle_event(&self, _link: &Link, _state: LinkState) {}
    }

    #[test]
    fn test_lookup_by_mode() {
        let dispatcher = EventDispatcher::new();
        let handler: Arc<dyn EventHandler> = Arc::new(Nop);
        dispatcher.register_handler(Arc::clone(&handler), ServiceType::Tracking, Mode::Client);

        assert!(dispatcher.handler(ServiceType::Tracking, Mode::Client).is_some());
        assert!(dispatcher.handler(ServiceType::Tracking, Mode::Server).is_none());
        assert!(dispatcher.handler_for(ServiceType::Tracking).is_some());
        assert!(dispatcher.handler_for(ServiceType::Core).is_none());
    }

    #[test]
    fn test_server_handler_wins_for_inbound() {
        let dispatcher = EventDispatcher::new();
        let client: Arc<dyn EventHandler> = Arc::new(Nop);
        let server: Arc<dyn EventHandler> = Arc::new(Nop);
        let service = ServiceType::Custom(256);

        dispatcher.register_handler(Arc::clone(&client), service, Mode::Client);
        dispatcher.register_handler(Arc::clone(&server), service, Mode::Server);

        let resolved = dispatcher.handler_for(service).unwrap();
        assert!(Arc::ptr_eq(&resolved, &server));
        assert_eq!(dispatcher.handlers().len(), 2);
    }

    #[test]
    fn test_handler_registered_for_both_listed_once() {
        let dispatcher = EventDispatcher::new();
        let handler: Arc<dyn EventHandler> = Arc::new(Nop);

        dispatcher.register_handler(Arc::clone(&handler), ServiceType::Core, Mode::Both);

        assert_eq!(dispatcher.handlers().len(), 1);
        assert!(dispatcher.handler(ServiceType::Core, Mode::Client).is_some());
        assert!(dispatcher.handler(ServiceType::Core, Mode::Server).is_some());
    }
}
