//! Messaging hub: owner of peer state and message routing

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CoreHandler, TrackingHandler, TrackingService};
use crate::config::Settings;
use crate::metrics;
use crate::models::{
    services_to_underlying, Banner, HubError, HubResult, Link, LinkState, MessageRoot,
    ServiceType,
};
use crate::net::{Listener, MessageHandler, NetworkSession, SessionManager};
use crate::registry::{EventDispatcher, EventHandler, Mode, ServicesMap};

/// A live peer as seen by the hub
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub link: Link,
    pub connected_at: DateTime<Utc>,
}

/// Hub construction options
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub description: String,
    pub client_services: Vec<ServiceType>,
    pub server_services: Vec<ServiceType>,
    pub ping_interval: Duration,
    pub tracking_timeout: Duration,
}

impl HubConfig {
    pub fn from_settings(settings: &Settings) -> HubResult<Self> {
        Ok(Self {
            description: settings.node.description.clone(),
            client_services: settings.node.client_services()?,
            server_services: settings.node.server_services()?,
            ping_interval: settings.heartbeat.ping_interval(),
            tracking_timeout: settings.tracking.timeout(),
        })
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            description: "mesh-hub".to_string(),
            client_services: Vec::new(),
            server_services: vec![ServiceType::Core],
            ping_interval: super::PING_FREQUENCY,
            tracking_timeout: super::DEFAULT_TRACKING_TIMEOUT,
        }
    }
}

/// Messaging hub.
///
/// Owns the registries, the heartbeat and tracking services, the listener
/// and every session. Links handed out by the hub only hold weak
/// references to their sessions.
pub struct Hub {
    link: Link,
    config: HubConfig,
    handlers: EventDispatcher,
    services: ServicesMap,
    peers: RwLock<HashMap<Uuid, PeerInfo>>,
    core: Arc<CoreHandler>,
    tracking: Arc<TrackingService>,
    sessions: SessionManager,
    listener: Mutex<Option<Listener>>,
    draining: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
    this: Weak<Hub>,
}

impl Hub {
    /// Create a hub. Must be called from within a Tokio runtime.
    pub fn new(config: HubConfig) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Hub>| {
            let core = Arc::new(CoreHandler::new(this.clone(), config.ping_interval));
            let tracking = Arc::new(TrackingService::new());

            let handlers = EventDispatcher::new();
            handlers.register_handler(core.clone(), ServiceType::Core, Mode::Both);
            handlers.register_handler(tracking.clone(), ServiceType::Tracking, Mode::Client);

            Hub {
                link: Link::detached(Uuid::new_v4(), config.description.clone()),
                config,
                handlers,
                services: ServicesMap::new(),
                peers: RwLock::new(HashMap::new()),
                core,
                tracking,
                sessions: SessionManager::new(),
                listener: Mutex::new(None),
                draining: Mutex::new(Vec::new()),
                stopped: AtomicBool::new(false),
                this: this.clone(),
            }
        })
    }

    /// Create a hub from loaded settings
    pub fn from_settings(settings: &Settings) -> HubResult<Arc<Self>> {
        Ok(Self::new(HubConfig::from_settings(settings)?))
    }

    /// This hub's own identity
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Banner announced to every new peer
    pub fn banner(&self) -> Banner {
        Banner {
            id: self.link.id(),
            description: self.link.description().to_string(),
            client_services: services_to_underlying(&self.config.client_services),
            server_services: services_to_underlying(&self.config.server_services),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Start accepting inbound connections
    pub async fn listen(&self, host: &str, port: u16) -> HubResult<SocketAddr> {
        if self.is_shutdown() {
            return Err(HubError::ShutDown);
        }

        let listener = Listener::bind(host, port, self.this.clone()).await?;
        let addr = listener.local_addr();

        if let Some(previous) = self.listener.lock().replace(listener) {
            previous.shutdown();
        }

        Ok(addr)
    }

    /// Wrap a connected stream into a session owned by the session manager.
    ///
    /// After shutdown the stream is dropped and `ShutDown` is returned.
    pub fn start_session(&self, stream: TcpStream) -> HubResult<()> {
        if self.is_shutdown() {
            debug!("Hub shutting down, dropping new connection");
            return Err(HubError::ShutDown);
        }

        let handler = MessageHandler::new(self.this.clone());
        let session = NetworkSession::new(stream, handler);
        self.sessions.start(session);
        Ok(())
    }

    /// Connect to a peer in the background.
    ///
    /// Failures are logged; awaiting the returned handle is optional. A
    /// connection that completes after shutdown resolves to `ShutDown`.
    pub fn connect(&self, host: impl Into<String>, port: u16) -> JoinHandle<HubResult<()>> {
        let host = host.into();
        let hub = self.this.clone();

        tokio::spawn(async move {
            match TcpStream::connect((host.as_str(), port)).await {
                Ok(stream) => {
                    let Some(hub) = hub.upgrade() else {
                        return Err(HubError::ShutDown);
                    };
                    hub.start_session(stream).map_err(|e| {
                        debug!("Connection to {}:{} dropped: {}", host, port, e);
                        e
                    })?;
                    info!("Established connection to {}:{}", host, port);
                    Ok(())
                }
                Err(e) => {
                    warn!("Unable to establish connection to {}:{}: {}", host, port, e);
                    Err(HubError::connection_failed(host, port, e))
                }
            }
        })
    }

    // ========================================================================
    // Outbound messages
    // ========================================================================

    /// Queue a message on a link.
    ///
    /// Returns `LinkGone` without side effects if the link's session has
    /// already been torn down.
    pub fn send(&self, link: &Link, message: impl Into<Arc<MessageRoot>>) -> HubResult<()> {
        match link.transport() {
            Some(net) => {
                net.write(message.into());
                metrics::record_message_sent();
                Ok(())
            }
            None => {
                metrics::record_link_gone();
                Err(HubError::LinkGone)
            }
        }
    }

    /// Send a message whose reply is delivered to `handler`, using the default timeout
    pub fn send_tracked(
        &self,
        link: &Link,
        id: Uuid,
        message: MessageRoot,
        handler: TrackingHandler,
    ) -> HubResult<()> {
        self.send_tracked_with_timeout(link, id, message, handler, self.config.tracking_timeout)
    }

    /// Send a tracked message with an explicit timeout.
    ///
    /// The request is registered before the send. If the link is gone the
    /// request stays pending and resolves by timeout.
    ///
    /// After shutdown nothing is sent: the call fails with
    /// `TrackingCancelled` and the continuation is dropped uncalled. A
    /// shutdown racing with the call resolves the continuation through the
    /// tracking service instead, and the message is still withheld.
    pub fn send_tracked_with_timeout(
        &self,
        link: &Link,
        id: Uuid,
        message: MessageRoot,
        handler: TrackingHandler,
        timeout: Duration,
    ) -> HubResult<()> {
        if self.is_shutdown() {
            return Err(HubError::TrackingCancelled);
        }

        self.tracking.register_tracked(link, id, handler, timeout)?;
        if self.is_shutdown() {
            return Ok(());
        }

        self.send(link, message.with_conversation(id))
    }

    /// Send to every link registered for a service.
    ///
    /// Links that have gone away are skipped; the call always succeeds.
    pub fn broadcast(
        &self,
        service: ServiceType,
        mode: Mode,
        message: impl Into<Arc<MessageRoot>>,
    ) -> HubResult<()> {
        let message = message.into();
        let mut delivered = 0usize;
        let mut gone = 0usize;

        self.services.for_each_peer(service, mode, |link| match link.transport() {
            Some(net) => {
                net.write(Arc::clone(&message));
                metrics::record_message_sent();
                delivered += 1;
            }
            None => {
                metrics::record_link_gone();
                gone += 1;
            }
        });

        debug!(
            "Broadcast {} to {} ({:?}): {} delivered, {} gone",
            message.kind(),
            service,
            mode,
            delivered,
            gone
        );

        Ok(())
    }

    // ========================================================================
    // Inbound messages and link events
    // ========================================================================

    /// Route an inbound message to its tracked request or service handler
    pub fn dispatch(&self, link: &Link, message: &MessageRoot) {
        metrics::record_message_received();

        if message.conversation_id.is_some() && self.tracking.on_reply(link, message) {
            return;
        }

        match self.handlers.handler_for(message.service) {
            Some(handler) => handler.handle_message(link, message),
            None => self.default_handler(link, message),
        }
    }

    /// Fallback for messages with no registered handler
    pub fn default_handler(&self, link: &Link, message: &MessageRoot) {
        debug!(
            "Peer {} sent an unknown service type, ID: {} ({})",
            link,
            message.service,
            message.kind()
        );
        metrics::record_unhandled_message();
    }

    /// Register an application handler
    pub fn register_handler(
        &self,
        handler: Arc<dyn EventHandler>,
        service: ServiceType,
        mode: Mode,
    ) {
        self.handlers.register_handler(handler, service, mode);
    }

    /// Record the services a link declared
    pub fn register_services(
        &self,
        link: &Link,
        client_services: &[ServiceType],
        server_services: &[ServiceType],
    ) {
        self.services
            .register_peer_services(link, client_services, server_services);
    }

    /// Announce a negotiated link; rejects a second link with the same id
    pub fn link_up(
        &self,
        link: &Link,
        client_services: &[ServiceType],
        server_services: &[ServiceType],
    ) -> HubResult<()> {
        {
            let mut peers = self.peers.write();
            if peers.contains_key(&link.id()) {
                return Err(HubError::protocol(format!("Link {} already connected", link)));
            }
            peers.insert(link.id(), PeerInfo::new(link));
            metrics::set_links_active(peers.len());
        }

        self.register_services(link, client_services, server_services);
        self.notify(link, LinkState::Up);
        Ok(())
    }

    /// Apply a link-up or link-down event
    pub fn handle_event(&self, link: &Link, state: LinkState) {
        {
            let mut peers = self.peers.write();
            match state {
                LinkState::Up => {
                    peers.insert(link.id(), PeerInfo::new(link));
                }
                LinkState::Down => {
                    self.services.remove_peer(link);
                    peers.remove(&link.id());
                }
            }
            metrics::set_links_active(peers.len());
        }

        self.notify(link, state);
    }

    fn notify(&self, link: &Link, state: LinkState) {
        info!("Link {} is {}", link, state);

        for handler in self.handlers.handlers() {
            handler.handle_event(link, state);
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Every live peer
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers.read().values().cloned().collect()
    }

    pub fn peer(&self, id: &Uuid) -> Option<Link> {
        self.peers.read().get(id).map(|peer| peer.link.clone())
    }

    /// Links registered for a service in a mode
    pub fn peer_services(&self, service: ServiceType, mode: Mode) -> Vec<Link> {
        self.services.peer_services(service, mode)
    }

    /// Peers currently targeted by the heartbeat
    pub fn heartbeat_peers(&self) -> Vec<Link> {
        self.core.peers()
    }

    /// Tracked requests still waiting for a reply
    pub fn pending_tracked(&self) -> usize {
        self.tracking.pending()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().as_ref().map(Listener::local_addr)
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop the hub: handlers first, then the listener, then every session.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!("Hub shutting down...");

        self.tracking.shutdown();
        self.core.shutdown();

        let tracking: Arc<dyn EventHandler> = self.tracking.clone();
        let core: Arc<dyn EventHandler> = self.core.clone();
        for handler in self.handlers.handlers() {
            if !Arc::ptr_eq(&handler, &tracking) && !Arc::ptr_eq(&handler, &core) {
                handler.shutdown();
            }
        }

        if let Some(listener) = self.listener.lock().take() {
            listener.shutdown();
        }

        let handles = self.sessions.stop_all();
        self.draining.lock().extend(handles);
    }

    /// Wait for sessions stopped by [`Hub::shutdown`] to finish
    pub async fn wait_for_sessions(&self, timeout: Duration) {
        let handles: Vec<_> = self.draining.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }

        info!(session_count = handles.len(), "waiting for sessions to close");

        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("Sessions still open after {:?}", timeout);
        }
    }
}

impl PeerInfo {
    fn new(link: &Link) -> Self {
        Self {
            link: link.clone(),
            connected_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("link", &self.link)
            .field("peers", &self.peers.read().len())
            .field("stopped", &self.is_shutdown())
            .finish()
    }
}
