//! End-to-end tests: two hubs talking over loopback TCP

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use mesh_hub::models::{HubError, Link, LinkState, MessageRoot, Payload, ServiceType};
use mesh_hub::registry::{EventHandler, Mode};
use mesh_hub::services::{Hub, HubConfig};
use parking_lot::Mutex;
use uuid::Uuid;

const ACCOUNTS: ServiceType = ServiceType::Custom(300);

async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn config(description: &str, client: Vec<ServiceType>, server: Vec<ServiceType>) -> HubConfig {
    HubConfig {
        description: description.to_string(),
        client_services: client,
        server_services: server,
        ..Default::default()
    }
}

/// Answers every accounts request with a reply carrying the same conversation id
struct AccountsServer {
    hub: Weak<Hub>,
    requests: AtomicUsize,
}

impl EventHandler for AccountsServer {
    fn handle_message(&self, link: &Link, message: &MessageRoot) {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let Some(hub) = self.hub.upgrade() else { return };
        let mut reply =
            MessageRoot::custom(ACCOUNTS, "balance", serde_json::json!({ "cents": 1200 }));
        reply.conversation_id = message.conversation_id;
        let _ = hub.send(link, reply);
    }

    fn handle_event(&self, _link: &Link, _state: LinkState) {}
}

async fn connected_pair() -> (Arc<Hub>, Arc<Hub>) {
    let server = Hub::new(config("accounts", vec![], vec![ServiceType::Core, ACCOUNTS]));
    let client = Hub::new(config(
        "frontend",
        vec![ServiceType::Tracking, ACCOUNTS],
        vec![ServiceType::Core],
    ));

    let addr = server.listen("127.0.0.1", 0).await.unwrap();
    client.connect("127.0.0.1", addr.port()).await.unwrap().unwrap();

    wait_until(|| server.peers().len() == 1 && client.peers().len() == 1).await;
    (server, client)
}

#[tokio::test]
async fn test_hubs_negotiate_links_and_services() {
    let (server, client) = connected_pair().await;

    let client_link = server.peer(&client.link().id()).unwrap();
    assert_eq!(client_link.description(), "frontend");

    // Scenario: a Tracking client shows up in client mode only
    assert_eq!(
        server.peer_services(ServiceType::Tracking, Mode::Client),
        vec![client_link.clone()]
    );
    assert!(server.peer_services(ServiceType::Tracking, Mode::Server).is_empty());

    let server_link = client.peer(&server.link().id()).unwrap();
    assert_eq!(client.peer_services(ACCOUNTS, Mode::Server), vec![server_link]);
    assert_eq!(server.heartbeat_peers(), vec![client_link]);

    client.shutdown();
    wait_until(|| server.peers().is_empty()).await;

    assert!(server.peer_services(ServiceType::Tracking, Mode::Client).is_empty());
    assert!(server.peer_services(ServiceType::Tracking, Mode::Server).is_empty());
    assert!(server.heartbeat_peers().is_empty());
    server.shutdown();
}

#[tokio::test]
async fn test_tracked_request_over_tcp() {
    let (server, client) = connected_pair().await;

    let accounts = Arc::new(AccountsServer {
        hub: Arc::downgrade(&server),
        requests: AtomicUsize::new(0),
    });
    server.register_handler(accounts.clone(), ACCOUNTS, Mode::Server);

    let replies = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&replies);
    let server_link = client.peer(&server.link().id()).unwrap();

    client
        .send_tracked(
            &server_link,
            Uuid::new_v4(),
            MessageRoot::custom(ACCOUNTS, "get_balance", serde_json::json!({ "account": 7 })),
            Box::new(move |_, result| {
                let body = match result {
                    Ok(message) => match &message.data {
                        Payload::Custom { body, .. } => body.clone(),
                        other => serde_json::json!({ "unexpected": other.kind() }),
                    },
                    Err(e) => serde_json::json!({ "error": e.to_string() }),
                };
                seen.lock().push(body);
            }),
        )
        .unwrap();

    wait_until(|| !replies.lock().is_empty()).await;
    assert_eq!(*replies.lock(), vec![serde_json::json!({ "cents": 1200 })]);
    assert_eq!(accounts.requests.load(Ordering::SeqCst), 1);
    assert_eq!(client.pending_tracked(), 0);

    client.shutdown();
    server.shutdown();
}

#[tokio::test]
async fn test_send_after_link_down_reports_link_gone() {
    let (server, client) = connected_pair().await;
    let client_link = server.peer(&client.link().id()).unwrap();

    assert!(server.send(&client_link, MessageRoot::ping(1)).is_ok());

    client.shutdown();
    wait_until(|| server.peers().is_empty()).await;

    assert!(matches!(
        server.send(&client_link, MessageRoot::ping(2)),
        Err(HubError::LinkGone)
    ));
    assert!(server.broadcast(ServiceType::Tracking, Mode::Both, MessageRoot::ping(3)).is_ok());
    server.shutdown();
}

/// Sends on a link from inside its own link-down event
struct SendOnDown {
    hub: Weak<Hub>,
    results: Mutex<Vec<Result<(), String>>>,
}

impl EventHandler for SendOnDown {
    fn handle_message(&self, _link: &Link, _message: &MessageRoot) {}

    fn handle_event(&self, link: &Link, state: LinkState) {
        if state != LinkState::Down {
            return;
        }
        let Some(hub) = self.hub.upgrade() else { return };
        let result = hub.send(link, MessageRoot::ping(1)).map_err(|e| e.to_string());
        self.results.lock().push(result);
    }
}

#[tokio::test]
async fn test_send_inside_link_down_reports_link_gone() {
    let (server, client) = connected_pair().await;

    let watcher = Arc::new(SendOnDown {
        hub: Arc::downgrade(&server),
        results: Mutex::new(Vec::new()),
    });
    server.register_handler(watcher.clone(), ServiceType::Custom(301), Mode::Server);

    client.shutdown();
    wait_until(|| !watcher.results.lock().is_empty()).await;

    assert_eq!(
        *watcher.results.lock(),
        vec![Err(HubError::LinkGone.to_string())]
    );
    server.shutdown();
}

#[tokio::test]
async fn test_broadcast_reaches_declared_peers() {
    let server = Hub::new(config("hub", vec![], vec![ServiceType::Core]));
    let addr = server.listen("127.0.0.1", 0).await.unwrap();

    let received = Arc::new(AtomicUsize::new(0));
    let mut clients = Vec::new();

    struct Counter(Arc<AtomicUsize>);
    impl EventHandler for Counter {
        fn handle_message(&self, _link: &Link, _message: &MessageRoot) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn handle_event(&self, _link: &Link, _state: LinkState) {}
    }

    for (name, client_services) in [("a", vec![ACCOUNTS]), ("b", vec![ACCOUNTS]), ("c", vec![])] {
        let hub = Hub::new(config(name, client_services, vec![ServiceType::Core]));
        hub.register_handler(Arc::new(Counter(Arc::clone(&received))), ACCOUNTS, Mode::Client);
        hub.connect("127.0.0.1", addr.port()).await.unwrap().unwrap();
        clients.push(hub);
    }

    wait_until(|| server.peers().len() == 3).await;

    let rates = MessageRoot::custom(ACCOUNTS, "rates", serde_json::Value::Null);
    server.broadcast(ACCOUNTS, Mode::Client, rates).unwrap();

    wait_until(|| received.load(Ordering::SeqCst) == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(received.load(Ordering::SeqCst), 2);

    for hub in &clients {
        hub.shutdown();
    }
    server.shutdown();
}

#[tokio::test]
async fn test_heartbeat_pings_peers() {
    let server = Hub::new(HubConfig {
        ping_interval: Duration::from_millis(20),
        ..config("hub", vec![], vec![ServiceType::Core])
    });
    let addr = server.listen("127.0.0.1", 0).await.unwrap();

    struct PongWatcher(Arc<AtomicUsize>);
    impl EventHandler for PongWatcher {
        fn handle_message(&self, _link: &Link, message: &MessageRoot) {
            if let Payload::Pong { timestamp } = message.data {
                assert!(timestamp > 0);
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        fn handle_event(&self, _link: &Link, _state: LinkState) {}
    }

    // Pongs reach the watcher instead of the core handler
    let pongs = Arc::new(AtomicUsize::new(0));
    server.register_handler(
        Arc::new(PongWatcher(Arc::clone(&pongs))),
        ServiceType::Core,
        Mode::Server,
    );

    let client = Hub::new(config("peer", vec![], vec![ServiceType::Core]));
    client.connect("127.0.0.1", addr.port()).await.unwrap().unwrap();

    wait_until(|| pongs.load(Ordering::SeqCst) >= 2).await;

    client.shutdown();
    server.shutdown();
}

#[tokio::test]
async fn test_connect_failure_is_reported_not_raised() {
    let hub = Hub::new(HubConfig::default());

    // Bind then drop to get a port with nothing listening
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let result = hub.connect("127.0.0.1", port).await.unwrap();
    assert!(matches!(result, Err(HubError::ConnectionFailed { .. })));
    assert!(hub.peers().is_empty());
    hub.shutdown();
}

#[tokio::test]
async fn test_connect_after_shutdown_is_refused() {
    let hub = Hub::new(HubConfig::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    hub.shutdown();

    let result = hub.connect("127.0.0.1", port).await.unwrap();
    assert!(matches!(result, Err(HubError::ShutDown)));
    assert_eq!(hub.session_count(), 0);
}

#[tokio::test]
async fn test_shutdown_stops_listener_and_sessions() {
    let (server, client) = connected_pair().await;
    let addr = server.local_addr().unwrap();

    server.shutdown();
    server.shutdown();
    server.wait_for_sessions(Duration::from_secs(2)).await;

    assert_eq!(server.session_count(), 0);
    wait_until(|| client.peers().is_empty()).await;

    // New connections are no longer turned into sessions
    let _ = client.connect("127.0.0.1", addr.port()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(server.peers().is_empty());
    client.shutdown();
}
