//! Single-peer replication fan-out (§4.7 of the spec).
//!
//! At most one outbound peer connection per process, dialed lazily and
//! reused. A `DAEMON <non-self-hostname>` received on any connection
//! suppresses further outbound replication for the life of the process —
//! the anti-broadcast-loop invariant — so the flag is process-wide
//! (`Arc`-shared), matching the source's single `int replicate`.

use std::{net::SocketAddr, sync::Arc};

use tokio::{net::TcpStream, sync::Mutex};
use tracing::warn;

use crate::protocol::transport::{LineTransport, COMMAND_READ_TIMEOUT};

struct Inner {
    peer_addr: Option<SocketAddr>,
    replicate: std::sync::atomic::AtomicBool,
    conn: Mutex<Option<LineTransport<TcpStream>>>,
}

/// Shared handle to the process's single outbound replication peer.
#[derive(Clone)]
pub struct ReplicationPeer {
    inner: Arc<Inner>,
}

impl ReplicationPeer {
    pub fn new(peer_addr: Option<SocketAddr>) -> Self {
        Self {
            inner: Arc::new(Inner {
                peer_addr,
                replicate: std::sync::atomic::AtomicBool::new(true),
                conn: Mutex::new(None),
            }),
        }
    }

    /// Whether outbound replication is still permitted.
    pub fn is_active(&self) -> bool {
        self.inner.peer_addr.is_some()
            && self.inner.replicate.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Permanently suppresses outbound replication for this process, per a
    /// valid `DAEMON <non-self-hostname>` received from upstream.
    pub fn suppress(&self) {
        self.inner
            .replicate
            .store(false, std::sync::atomic::Ordering::SeqCst);
    }

    /// Forwards `line` to the peer on a best-effort basis. A local mutation
    /// always succeeds regardless of whether this returns ok; failures are
    /// logged and the (possibly stale) connection is dropped so the next
    /// call redials.
    pub async fn forward(&self, line: &str) {
        if !self.is_active() {
            return;
        }
        let Some(addr) = self.inner.peer_addr else {
            return;
        };

        let mut guard = self.inner.conn.lock().await;
        if guard.is_none() {
            match TcpStream::connect(addr).await {
                Ok(stream) => *guard = Some(LineTransport::new(stream)),
                Err(err) => {
                    warn!(%addr, error = %err, "replication peer unreachable");
                    return;
                }
            }
        }

        let failed = if let Some(transport) = guard.as_mut() {
            transport.write_line(line).await.is_err()
        } else {
            true
        };

        if failed {
            warn!(%addr, "replication peer write failed, dropping connection");
            *guard = None;
        }
    }
}
