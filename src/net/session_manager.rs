//! Lifetime management for active sessions

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::NetworkSession;

/// Owns every active session.
///
/// A session is dropped from the manager as soon as its task finishes, which
/// is what expires the weak transport references held by links.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<Uuid, Arc<NetworkSession>>>>,
    tasks: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a session and start driving it
    pub fn start(&self, session: Arc<NetworkSession>) {
        let id = session.id();
        self.sessions.lock().insert(id, Arc::clone(&session));

        let sessions = Arc::clone(&self.sessions);
        let tasks = Arc::clone(&self.tasks);

        // Task map stays locked across spawn: insertion precedes the task's own removal
        let mut guard = self.tasks.lock();
        let handle = tokio::spawn(async move {
            session.run().await;
            sessions.lock().remove(&id);
            tasks.lock().remove(&id);
        });
        guard.insert(id, handle);

        debug!("Session {} started", id);
    }

    /// Stop one session
    pub fn stop(&self, id: &Uuid) {
        if let Some(session) = self.sessions.lock().remove(id) {
            session.stop();
        }
    }

    /// Stop every session, returning their tasks so callers can wait for them
    pub fn stop_all(&self) -> Vec<JoinHandle<()>> {
        let sessions: Vec<_> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.stop();
        }

        let handles: Vec<_> = self.tasks.lock().drain().map(|(_, h)| h).collect();
        debug!("Stopping {} sessions", sessions.len());
        handles
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
