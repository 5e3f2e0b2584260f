//! Per-session link negotiation and dispatch

use std::sync::{Arc, Weak};
use tracing::{debug, info};

use super::Transport;
use crate::models::{
    underlying_to_services, HubError, HubResult, Link, LinkState, MessageRoot, Payload,
};
use crate::services::Hub;

enum State {
    /// Waiting for the peer's banner
    Negotiating,
    Established(Link),
    Closed,
}

/// Turns a session's inbound messages into hub events.
///
/// Both sides send a banner first. Once the peer's banner arrives the link
/// is announced to the hub and every later message is dispatched on it.
pub struct MessageHandler {
    hub: Weak<Hub>,
    transport: Option<Weak<dyn Transport>>,
    state: State,
}

impl MessageHandler {
    pub fn new(hub: Weak<Hub>) -> Self {
        Self {
            hub,
            transport: None,
            state: State::Negotiating,
        }
    }

    fn hub(&self) -> HubResult<Arc<Hub>> {
        self.hub
            .upgrade()
            .ok_or_else(|| HubError::Internal("Hub dropped".to_string()))
    }

    /// Bind to the session's transport and send our banner
    pub fn start(&mut self, transport: Weak<dyn Transport>) -> HubResult<()> {
        let hub = self.hub()?;
        let net = transport.upgrade().ok_or(HubError::LinkGone)?;

        net.write(Arc::new(MessageRoot::banner(hub.banner())));
        self.transport = Some(transport);
        Ok(())
    }

    /// Handle one inbound message. An error closes the session.
    pub fn handle_message(&mut self, message: MessageRoot) -> HubResult<()> {
        match &self.state {
            State::Negotiating => self.negotiate(message),
            State::Established(link) => {
                if let Payload::Banner(_) = message.data {
                    return Err(HubError::protocol(format!(
                        "Unexpected banner from established link {}",
                        link
                    )));
                }

                self.hub()?.dispatch(link, &message);
                Ok(())
            }
            State::Closed => Err(HubError::protocol("Message on closed session")),
        }
    }

    fn negotiate(&mut self, message: MessageRoot) -> HubResult<()> {
        let banner = match message.data {
            Payload::Banner(banner) => banner,
            other => {
                return Err(HubError::protocol(format!(
                    "Expected banner, peer sent {}",
                    other.kind()
                )))
            }
        };

        let hub = self.hub()?;
        if banner.id == hub.link().id() {
            return Err(HubError::protocol("Connected to self"));
        }

        let transport = self
            .transport
            .clone()
            .ok_or_else(|| HubError::Internal("Session not started".to_string()))?;

        let link = Link::new(banner.id, banner.description, transport);
        let client_services = underlying_to_services(&banner.client_services);
        let server_services = underlying_to_services(&banner.server_services);

        debug!(
            "Negotiated link {} (client: {:?}, server: {:?})",
            link, client_services, server_services
        );

        hub.link_up(&link, &client_services, &server_services)?;
        self.state = State::Established(link);
        Ok(())
    }

    /// Report link-down if the link was ever established
    pub fn close(&mut self) {
        if let State::Established(link) = std::mem::replace(&mut self.state, State::Closed) {
            info!("Link {} closed", link);
            if let Some(hub) = self.hub.upgrade() {
                hub.handle_event(&link, LinkState::Down);
            }
        }
    }
}

impl Drop for MessageHandler {
    fn drop(&mut self) {
        self.close();
    }
}
