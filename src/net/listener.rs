//! Accept loop for inbound peer connections

use std::net::SocketAddr;
use std::sync::Weak;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::HubResult;
use crate::services::Hub;

/// Pause after a failed accept (e.g. file descriptor exhaustion)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Inbound connection listener
#[derive(Debug)]
pub struct Listener {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Listener {
    /// Bind and start accepting; every accepted stream becomes a hub session
    pub async fn bind(host: &str, port: u16, hub: Weak<Hub>) -> HubResult<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        info!("Listening for peers on {}", local_addr);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, addr)) => {
                            debug!("Accepted connection from {}", addr);
                            match hub.upgrade() {
                                Some(hub) => {
                                    if let Err(e) = hub.start_session(stream) {
                                        debug!("Dropped connection from {}: {}", addr, e);
                                    }
                                }
                                None => break,
                            }
                        }
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    },
                }
            }
            debug!("Listener on {} stopped", local_addr);
        });

        Ok(Self {
            local_addr,
            cancel,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting new connections
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
