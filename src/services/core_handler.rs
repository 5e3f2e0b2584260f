//! Heartbeat: periodic pings to every peer and round-trip measurement

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Hub;
use crate::metrics;
use crate::models::{Link, LinkState, MessageRoot, Payload};
use crate::registry::EventHandler;

/// Default interval between ping rounds
pub const PING_FREQUENCY: Duration = Duration::from_secs(30);

static CLOCK_BASE: Lazy<Instant> = Lazy::new(Instant::now);

/// Milliseconds on a process-local monotonic clock.
///
/// Never zero; a zero timestamp in a pong means "no timestamp".
pub fn monotonic_millis() -> u64 {
    CLOCK_BASE.elapsed().as_millis() as u64 + 1
}

/// Elapsed milliseconds since an echoed timestamp, `None` for the zero sentinel
pub fn round_trip(now: u64, timestamp: u64) -> Option<u64> {
    if timestamp == 0 {
        None
    } else {
        Some(now.saturating_sub(timestamp))
    }
}

/// Handler for the core service.
///
/// Answers pings, measures pongs, and pings every known peer once per
/// interval.
pub struct CoreHandler {
    peers: Arc<Mutex<Vec<Link>>>,
    hub: Weak<Hub>,
    cancel: CancellationToken,
}

impl CoreHandler {
    /// Create the handler and arm the ping timer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(hub: Weak<Hub>, interval: Duration) -> Self {
        let handler = Self {
            peers: Arc::new(Mutex::new(Vec::new())),
            hub,
            cancel: CancellationToken::new(),
        };
        handler.set_timer(interval);
        handler
    }

    fn set_timer(&self, interval: Duration) {
        let peers = Arc::clone(&self.peers);
        let hub = self.hub.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = time::sleep(interval) => {}
                }

                if !trigger_pings(&peers, &hub, &cancel) {
                    return;
                }
            }
        });
    }

    /// Snapshot of the peers currently pinged
    pub fn peers(&self) -> Vec<Link> {
        self.peers.lock().clone()
    }

    fn handle_ping(&self, link: &Link, timestamp: u64) {
        self.send(link, MessageRoot::pong(timestamp));
    }

    /// Record the round trip of an echoed ping, if it carries a timestamp
    fn handle_pong(&self, link: &Link, timestamp: u64) -> Option<u64> {
        let elapsed = round_trip(monotonic_millis(), timestamp)?;
        debug!("Ping time to {}: {}ms", link, elapsed);
        metrics::record_ping_rtt(elapsed);
        Some(elapsed)
    }

    fn send(&self, link: &Link, message: MessageRoot) {
        if let Some(hub) = self.hub.upgrade() {
            if let Err(e) = hub.send(link, message) {
                debug!("Heartbeat message to {} not sent: {}", link, e);
            }
        }
    }

    /// Cancel the ping timer
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Ping every peer; returns `false` once the timer should stop
fn trigger_pings(peers: &Mutex<Vec<Link>>, hub: &Weak<Hub>, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }

    let Some(hub) = hub.upgrade() else {
        return false;
    };

    let peers = peers.lock();
    for link in peers.iter() {
        if let Err(e) = hub.send(link, MessageRoot::ping(monotonic_millis())) {
            debug!("Ping to {} not sent: {}", link, e);
        }
    }

    true
}

impl EventHandler for CoreHandler {
    fn handle_message(&self, link: &Link, message: &MessageRoot) {
        match message.data {
            Payload::Ping { timestamp } => self.handle_ping(link, timestamp),
            Payload::Pong { timestamp } => {
                self.handle_pong(link, timestamp);
            }
            _ => warn!(
                "Unhandled message received by core from {}: {}",
                link,
                message.kind()
            ),
        }
    }

    fn handle_event(&self, link: &Link, state: LinkState) {
        let mut peers = self.peers.lock();

        match state {
            LinkState::Up => {
                if !peers.contains(link) {
                    peers.push(link.clone());
                }
            }
            LinkState::Down => peers.retain(|peer| peer != link),
        }
    }

    fn shutdown(&self) {
        CoreHandler::shutdown(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_round_trip() {
        assert_eq!(round_trip(1250, 1000), Some(250));
        assert_eq!(round_trip(1000, 1000), Some(0));
        assert_eq!(round_trip(500, 0), None);
        // A timestamp from the future never yields a negative time
        assert_eq!(round_trip(900, 1000), Some(0));
    }

    #[test]
    fn test_monotonic_clock_never_zero() {
        let first = monotonic_millis();
        let second = monotonic_millis();
        assert!(first > 0);
        assert!(second >= first);
    }

    #[tokio::test]
    async fn test_link_events_maintain_peer_set() {
        let core = CoreHandler::new(Weak::new(), PING_FREQUENCY);
        let a = Link::detached(Uuid::new_v4(), "a");
        let b = Link::detached(Uuid::new_v4(), "b");

        core.handle_event(&a, LinkState::Up);
        core.handle_event(&b, LinkState::Up);
        core.handle_event(&a, LinkState::Up);
        assert_eq!(core.peers().len(), 2);

        core.handle_event(&a, LinkState::Down);
        assert_eq!(core.peers(), vec![b]);

        core.shutdown();
        core.shutdown();
    }

    #[tokio::test]
    async fn test_pong_with_zero_timestamp_is_ignored() {
        let core = CoreHandler::new(Weak::new(), PING_FREQUENCY);
        let peer = Link::detached(Uuid::new_v4(), "peer");

        assert_eq!(core.handle_pong(&peer, 0), None);
        assert!(core.handle_pong(&peer, monotonic_millis()).is_some());

        core.shutdown();
    }
}
