//! Framed TCP session for one peer connection

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{MessageHandler, Transport};
use crate::models::{HubResult, MessageRoot};

/// Largest frame accepted from a peer
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// Write queue of a running session.
///
/// Only the session's task holds it strongly; links see it through a
/// `Weak<dyn Transport>` that stops resolving before link-down is raised.
struct Outbound {
    tx: mpsc::UnboundedSender<Arc<MessageRoot>>,
}

impl Transport for Outbound {
    fn write(&self, message: Arc<MessageRoot>) {
        // A closed queue means the session is going down; link-down follows.
        let _ = self.tx.send(message);
    }
}

struct Pending {
    stream: TcpStream,
    outbound: Arc<Outbound>,
    queue: mpsc::UnboundedReceiver<Arc<MessageRoot>>,
    handler: MessageHandler,
}

/// One peer connection.
///
/// The session is owned by the [`SessionManager`](super::SessionManager);
/// links only hold a weak reference to its write queue through [`Transport`].
pub struct NetworkSession {
    id: Uuid,
    peer_addr: Option<SocketAddr>,
    cancel: CancellationToken,
    pending: Mutex<Option<Pending>>,
}

impl NetworkSession {
    pub fn new(stream: TcpStream, handler: MessageHandler) -> Arc<Self> {
        let (tx, queue) = mpsc::unbounded_channel();
        let peer_addr = stream.peer_addr().ok();

        Arc::new(Self {
            id: Uuid::new_v4(),
            peer_addr,
            cancel: CancellationToken::new(),
            pending: Mutex::new(Some(Pending {
                stream,
                outbound: Arc::new(Outbound { tx }),
                queue,
                handler,
            })),
        })
    }

    /// Session id, distinct from the peer's link id
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Ask the session to close
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive the connection until the peer disconnects or the session is stopped
    pub async fn run(self: Arc<Self>) {
        let Some(Pending {
            stream,
            outbound,
            mut queue,
            mut handler,
        }) = self.pending.lock().take()
        else {
            warn!("Session {} started twice", self.id);
            return;
        };

        let codec = || {
            LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LENGTH)
                .new_codec()
        };
        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, codec());
        let mut writer = FramedWrite::new(write_half, codec());

        let transport: Arc<dyn Transport> = outbound;
        let weak: Weak<dyn Transport> = Arc::downgrade(&transport);

        if let Err(e) = handler.start(weak) {
            warn!("Session {} failed to start: {}", self.id, e);
            return;
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                message = queue.recv() => {
                    let Some(message) = message else { break };
                    if let Err(e) = write_frame(&mut writer, &message).await {
                        debug!("Session {} write failed: {}", self.id, e);
                        break;
                    }
                }
                frame = reader.next() => match frame {
                    Some(Ok(frame)) => {
                        let message: MessageRoot = match serde_json::from_slice(&frame) {
                            Ok(message) => message,
                            Err(e) => {
                                debug!("Session {} dropped undecodable message: {}", self.id, e);
                                continue;
                            }
                        };

                        if let Err(e) = handler.handle_message(message) {
                            warn!("Session {} closing: {}", self.id, e);
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("Session {} read failed: {}", self.id, e);
                        break;
                    }
                    None => break,
                },
            }
        }

        self.cancel.cancel();
        // Links must stop resolving before anyone hears about link-down
        drop(transport);
        handler.close();
        debug!("Session {} closed ({:?})", self.id, self.peer_addr);
    }
}

async fn write_frame<W>(writer: &mut W, message: &MessageRoot) -> HubResult<()>
where
    W: futures::Sink<Bytes, Error = std::io::Error> + Unpin,
{
    let body = serde_json::to_vec(message)?;
    writer.send(Bytes::from(body)).await?;
    Ok(())
}

impl std::fmt::Debug for NetworkSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkSession")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
