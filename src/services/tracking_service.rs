//! Correlation of tracked requests with their replies

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::metrics;
use crate::models::{HubError, HubResult, Link, LinkState, MessageRoot};
use crate::registry::EventHandler;

/// Default wait for a tracked reply
pub const DEFAULT_TRACKING_TIMEOUT: Duration = Duration::from_secs(5);

/// Continuation for a tracked request.
///
/// Receives the reply, [`HubError::TrackingTimeout`] or
/// [`HubError::TrackingCancelled`]. Called exactly once.
pub type TrackingHandler = Box<dyn FnOnce(&Link, HubResult<&MessageRoot>) + Send + 'static>;

struct Request {
    link: Link,
    deadline: Instant,
    handler: TrackingHandler,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    requests: HashMap<Uuid, Request>,
    stopped: bool,
}

/// Pending tracked requests keyed by correlation id.
///
/// Every resolution path removes the entry under the map lock before calling
/// the continuation, so only the first of reply, timeout or shutdown wins.
#[derive(Default)]
pub struct TrackingService {
    inner: Arc<Mutex<Inner>>,
}

impl TrackingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a continuation for `id`, resolved by timeout if no reply arrives.
    ///
    /// Must be called from within a Tokio runtime. After shutdown the
    /// continuation is resolved immediately with `TrackingCancelled`.
    pub fn register_tracked(
        &self,
        link: &Link,
        id: Uuid,
        handler: TrackingHandler,
        timeout: Duration,
    ) -> HubResult<()> {
        let mut inner = self.inner.lock();

        if inner.stopped {
            drop(inner);
            metrics::record_tracking_cancelled();
            handler(link, Err(HubError::TrackingCancelled));
            return Ok(());
        }

        if inner.requests.contains_key(&id) {
            warn!("Tracking id {} already pending", id);
            return Err(HubError::DuplicateTrackingId(id));
        }

        let weak = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            time::sleep(timeout).await;
            expire(&weak, id);
        });

        inner.requests.insert(
            id,
            Request {
                link: link.clone(),
                deadline: Instant::now() + timeout,
                handler,
                timer,
            },
        );

        Ok(())
    }

    /// Resolve a pending request with its reply.
    ///
    /// Returns `false` if the message carries no pending id or came from a
    /// link other than the one the request was sent on.
    pub fn on_reply(&self, link: &Link, message: &MessageRoot) -> bool {
        let Some(id) = message.conversation_id else {
            return false;
        };

        let request = {
            let mut inner = self.inner.lock();
            let from_origin = match inner.requests.get(&id) {
                Some(request) if request.link != *link => {
                    warn!(
                        "Reply for {} arrived from {} instead of {}",
                        id, link, request.link
                    );
                    false
                }
                Some(_) => true,
                None => false,
            };

            if from_origin {
                inner.requests.remove(&id)
            } else {
                None
            }
        };

        match request {
            Some(request) => {
                request.timer.abort();
                (request.handler)(link, Ok(message));
                true
            }
            None => false,
        }
    }

    /// Number of requests still waiting
    pub fn pending(&self) -> usize {
        self.inner.lock().requests.len()
    }

    /// Resolve every pending request with `TrackingCancelled`
    pub fn shutdown(&self) {
        let drained: Vec<Request> = {
            let mut inner = self.inner.lock();
            inner.stopped = true;
            inner.requests.drain().map(|(_, request)| request).collect()
        };

        if !drained.is_empty() {
            debug!("Cancelling {} tracked requests", drained.len());
        }

        for request in drained {
            request.timer.abort();
            metrics::record_tracking_cancelled();
            (request.handler)(&request.link, Err(HubError::TrackingCancelled));
        }
    }
}

fn expire(inner: &Weak<Mutex<Inner>>, id: Uuid) {
    let Some(inner) = inner.upgrade() else {
        return;
    };

    let request = inner.lock().requests.remove(&id);

    if let Some(request) = request {
        debug!(
            "Tracked request {} to {} timed out ({:?} past deadline)",
            id,
            request.link,
            Instant::now().saturating_duration_since(request.deadline)
        );
        metrics::record_tracking_timeout();
        (request.handler)(&request.link, Err(HubError::TrackingTimeout));
    }
}

impl EventHandler for TrackingService {
    fn handle_message(&self, link: &Link, message: &MessageRoot) {
        if !self.on_reply(link, message) {
            debug!(
                "Dropping tracking message from {} with no pending request ({:?})",
                link, message.conversation_id
            );
        }
    }

    fn handle_event(&self, _link: &Link, _state: LinkState) {}

    fn shutdown(&self) {
        TrackingService::shutdown(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn link() -> Link {
        Link::detached(Uuid::new_v4(), "peer")
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn() -> TrackingHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let make = move || -> TrackingHandler {
            let seen = Arc::clone(&seen2);
            Box::new(move |_link: &Link, result: HubResult<&MessageRoot>| {
                let entry = match result {
                    Ok(message) => format!("reply:{}", message.kind()),
                    Err(e) => format!("error:{}", e),
                };
                seen.lock().push(entry);
            })
        };
        (seen, make)
    }

    #[tokio::test]
    async fn test_reply_resolves_once_and_cancels_timeout() {
        let tracking = TrackingService::new();
        let peer = link();
        let id = Uuid::new_v4();
        let (seen, make) = recorder();

        tracking
            .register_tracked(&peer, id, make(), Duration::from_millis(50))
            .unwrap();
        assert_eq!(tracking.pending(), 1);

        let reply = MessageRoot::pong(7).with_conversation(id);
        assert!(tracking.on_reply(&peer, &reply));
        assert!(!tracking.on_reply(&peer, &reply));
        assert_eq!(tracking.pending(), 0);

        time::sleep(Duration::from_millis(120)).await;
        assert_eq!(*seen.lock(), vec!["reply:pong".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_resolves_once() {
        let tracking = TrackingService::new();
        let peer = link();
        let id = Uuid::new_v4();
        let (seen, make) = recorder();

        tracking
            .register_tracked(&peer, id, make(), DEFAULT_TRACKING_TIMEOUT)
            .unwrap();

        time::sleep(Duration::from_secs(4)).await;
        assert!(seen.lock().is_empty());

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(
            *seen.lock(),
            vec![format!("error:{}", HubError::TrackingTimeout)]
        );

        let late = MessageRoot::pong(1).with_conversation(id);
        assert!(!tracking.on_reply(&peer, &late));
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let tracking = TrackingService::new();
        let peer = link();
        let id = Uuid::new_v4();
        let (seen, make) = recorder();

        tracking
            .register_tracked(&peer, id, make(), Duration::from_secs(5))
            .unwrap();
        let err = tracking
            .register_tracked(&peer, id, make(), Duration::from_secs(5))
            .unwrap_err();

        assert!(matches!(err, HubError::DuplicateTrackingId(dup) if dup == id));
        assert_eq!(tracking.pending(), 1);
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_reply_from_other_link_ignored() {
        let tracking = TrackingService::new();
        let peer = link();
        let impostor = link();
        let id = Uuid::new_v4();
        let (seen, make) = recorder();

        tracking
            .register_tracked(&peer, id, make(), Duration::from_secs(5))
            .unwrap();

        let reply = MessageRoot::pong(1).with_conversation(id);
        assert!(!tracking.on_reply(&impostor, &reply));
        assert_eq!(tracking.pending(), 1);
        assert!(tracking.on_reply(&peer, &reply));
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_and_is_idempotent() {
        let tracking = TrackingService::new();
        let peer = link();
        let (seen, make) = recorder();

        for _ in 0..3 {
            tracking
                .register_tracked(&peer, Uuid::new_v4(), make(), Duration::from_secs(5))
                .unwrap();
        }

        tracking.shutdown();
        tracking.shutdown();

        assert_eq!(tracking.pending(), 0);
        let cancelled = format!("error:{}", HubError::TrackingCancelled);
        assert_eq!(*seen.lock(), vec![cancelled.clone(); 3]);

        // Registration after shutdown never leaves an entry behind
        tracking
            .register_tracked(&peer, Uuid::new_v4(), make(), Duration::from_secs(5))
            .unwrap();
        assert_eq!(tracking.pending(), 0);
        assert_eq!(seen.lock().len(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reply_timeout_race_invokes_once() {
        let tracking = Arc::new(TrackingService::new());
        let peer = link();
        let mut counters = Vec::new();

        for i in 0..200u64 {
            let id = Uuid::new_v4();
            let count = Arc::new(AtomicUsize::new(0));
            let c = Arc::clone(&count);
            tracking
                .register_tracked(
                    &peer,
                    id,
                    Box::new(move |_, _| {
                        c.fetch_add(1, Ordering::SeqCst);
                    }),
                    Duration::from_millis(i % 5),
                )
                .unwrap();

            let tracking = Arc::clone(&tracking);
            let peer = peer.clone();
            let reply = tokio::spawn(async move {
                time::sleep(Duration::from_millis(2)).await;
                tracking.on_reply(&peer, &MessageRoot::pong(1).with_conversation(id));
            });
            counters.push((count, reply));
        }

        for (_, reply) in counters.iter_mut() {
            reply.await.unwrap();
        }
        time::sleep(Duration::from_millis(50)).await;

        assert_eq!(tracking.pending(), 0);
        for (count, _) in &counters {
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    }
}
