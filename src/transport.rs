//! Point-to-point transport between nodes
//!
//! Every connection is a TCP stream carrying one JSON envelope per line. Each
//! connection gets its own read loop and writer task, so slow peers never
//! stall each other. A connection moves through
//! `Connecting -> Connected -> Handshaking -> Established`: the handshake is
//! sent as soon as the stream is up, and the connection is bound to a peer
//! address once that peer's own `DISCOVERY` arrives.

use crate::{
    error::{NetworkError, Result},
    message::{Envelope, MessageKind},
    network::PeerAddress,
    MAX_FRAME_LENGTH,
};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Outbound side of the network, as seen by the node
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bind the listener and return the bound address. Nothing is accepted
    /// until [`Transport::accept_connections`].
    async fn listen(&self, bind: &PeerAddress) -> Result<PeerAddress>;

    /// Start accepting on the listener bound by `listen`
    async fn accept_connections(&self) -> Result<()>;

    /// Open an outbound connection unless one to `peer` already exists
    async fn connect(&self, peer: &PeerAddress) -> Result<()>;

    /// Send to every live connection; returns how many were reached
    async fn broadcast(&self, envelope: &Envelope) -> Result<usize>;

    /// Send to one peer
    async fn send_to(&self, peer: &PeerAddress, envelope: &Envelope) -> Result<()>;

    /// Addresses of peers with a live connection
    async fn connected_peers(&self) -> Vec<PeerAddress>;

    /// Close every connection and stop accepting
    async fn shutdown(&self);
}

/// Inbound side of the network, implemented by the node
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    /// Handshake sent on every freshly connected stream
    async fn handshake(&self) -> Result<Envelope>;

    /// Dispatch a decoded inbound envelope
    async fn receive_envelope(&self, envelope: Envelope);
}

/// Identifier of one TCP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Handshaking,
    Established,
}

#[derive(Debug)]
struct Connection {
    peer: Option<PeerAddress>,
    state: ConnectionState,
    outbound: mpsc::UnboundedSender<String>,
}

struct TransportInner {
    handler: Weak<dyn EnvelopeHandler>,
    connections: DashMap<ConnectionId, Connection>,
    /// Peer address -> the one connection used to reach it
    routes: DashMap<PeerAddress, ConnectionId>,
    /// Bound but not yet accepting
    listener: Mutex<Option<TcpListener>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
}

/// TCP implementation of [`Transport`]
pub struct TcpTransport {
    inner: Arc<TransportInner>,
}

impl TcpTransport {
    /// Every listener and read loop stops when `cancel` fires.
    pub fn new(handler: Weak<dyn EnvelopeHandler>, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                handler,
                connections: DashMap::new(),
                routes: DashMap::new(),
                listener: Mutex::new(None),
                next_id: AtomicU64::new(0),
                cancel,
            }),
        }
    }
}

impl TransportInner {
    fn allocate_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn set_state(&self, id: ConnectionId, state: ConnectionState) {
        if let Some(mut connection) = self.connections.get_mut(&id) {
            connection.state = state;
        }
    }

    /// Bind a connection to the address its peer announced.
    fn bind(&self, id: ConnectionId, peer: PeerAddress) {
        let dialled_as = match self.connections.get_mut(&id) {
            Some(mut connection) => {
                connection.state = ConnectionState::Established;
                connection.peer.replace(peer.clone())
            },
            None => return,
        };
        if let Some(dialled_as) = dialled_as.filter(|dialled| *dialled != peer) {
            self.routes.remove_if(&dialled_as, |_, routed| *routed == id);
        }

        // Guards on the two maps are never held at the same time.
        let routed = self.routes.get(&peer).map(|route| *route.value());
        let live_route = routed.is_some_and(|other| self.connections.contains_key(&other));
        // Keep an existing live route; this connection becomes a spare.
        if !live_route {
            self.routes.insert(peer, id);
        }
    }

    fn remove(&self, id: ConnectionId) {
        if let Some((_, connection)) = self.connections.remove(&id) {
            if let Some(peer) = connection.peer {
                self.routes.remove_if(&peer, |_, routed| *routed == id);
                tracing::debug!("Disconnected from {} ({})", peer, id);
            }
        }
    }

    fn queue(&self, id: ConnectionId, line: String) -> bool {
        match self.connections.get(&id) {
            Some(connection) => connection.outbound.send(line).is_ok(),
            None => false,
        }
    }

    fn spawn_accept_loop(self: &Arc<Self>, listener: TcpListener) {
        let inner = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote)) => {
                            tracing::debug!("Inbound connection from {}", remote);
                            let id = inner.allocate_id();
                            let (outbound, queued) = mpsc::unbounded_channel();
                            inner.connections.insert(id, Connection {
                                peer: None,
                                state: ConnectionState::Connected,
                                outbound,
                            });
                            tokio::spawn(inner.clone().run_connection(id, stream, queued));
                        },
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        },
                    },
                }
            }
            tracing::debug!("Listener stopped");
        });
    }

    async fn run_connection(
        self: Arc<Self>,
        id: ConnectionId,
        stream: TcpStream,
        mut queued: mpsc::UnboundedReceiver<String>,
    ) {
        let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH));
        let (mut sink, mut lines) = framed.split();

        let writer = tokio::spawn(async move {
            while let Some(line) = queued.recv().await {
                if let Err(e) = sink.send(line).await {
                    tracing::debug!("Write failed: {}", e);
                    break;
                }
            }
        });

        if let Some(handler) = self.handler.upgrade() {
            match handler.handshake().await.and_then(|envelope| envelope.to_json()) {
                Ok(line) => {
                    if self.queue(id, line) {
                        self.set_state(id, ConnectionState::Handshaking);
                    }
                },
                Err(e) => tracing::warn!("Could not build handshake for {}: {}", id, e),
            }
        }

        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => break,
                frame = lines.next() => frame,
            };

            let line = match frame {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    tracing::warn!("Dropping {} after unreadable frame: {}", id, e);
                    break;
                },
                None => break,
            };

            let envelope = match Envelope::from_json(&line) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!("Dropping {} after malformed message: {}", id, e);
                    break;
                },
            };

            if envelope.kind == MessageKind::Discovery {
                self.bind(id, envelope.sender.clone());
            }

            match self.handler.upgrade() {
                Some(handler) => handler.receive_envelope(envelope).await,
                None => break,
            }
        }

        self.remove(id);
        writer.abort();
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn listen(&self, bind: &PeerAddress) -> Result<PeerAddress> {
        let listener = TcpListener::bind(bind.to_connect_string())
            .await
            .map_err(|source| NetworkError::BindFailed {
                addr: bind.to_string(),
                source,
            })?;
        let local = listener.local_addr()?;
        let bound = PeerAddress::new(bind.host.clone(), local.port());
        tracing::info!("Listening on {}", bound);
        *self.inner.listener.lock().await = Some(listener);
        Ok(bound)
    }

    async fn accept_connections(&self) -> Result<()> {
        let listener = self
            .inner
            .listener
            .lock()
            .await
            .take()
            .ok_or(NetworkError::NotListening)?;
        self.inner.spawn_accept_loop(listener);
        Ok(())
    }

    async fn connect(&self, peer: &PeerAddress) -> Result<()> {
        // Drop a route left behind by a connection that is already gone.
        if let Some(existing) = self.inner.routes.get(peer).map(|route| *route.value()) {
            if self.inner.connections.contains_key(&existing) {
                return Ok(());
            }
            self.inner.routes.remove_if(peer, |_, routed| *routed == existing);
        }

        let id = self.inner.allocate_id();
        let (outbound, queued) = mpsc::unbounded_channel();

        // Register the connection, then reserve the route before dialling, so
        // concurrent discoveries of the same peer cannot open a second one.
        self.inner.connections.insert(
            id,
            Connection {
                peer: Some(peer.clone()),
                state: ConnectionState::Connecting,
                outbound,
            },
        );
        let reserved = match self.inner.routes.entry(peer.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(id);
                true
            },
        };
        if !reserved {
            self.inner.connections.remove(&id);
            return Ok(());
        }

        let dialled = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(peer.to_connect_string()))
            .await
            .unwrap_or_else(|_| {
                Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))
            });

        match dialled {
            Ok(stream) => {
                tracing::debug!("Connected to {} ({})", peer, id);
                self.inner.set_state(id, ConnectionState::Connected);
                tokio::spawn(self.inner.clone().run_connection(id, stream, queued));
                Ok(())
            },
            Err(source) => {
                self.inner.remove(id);
                Err(NetworkError::ConnectionFailed {
                    addr: peer.to_string(),
                    source,
                }
                .into())
            },
        }
    }

    async fn broadcast(&self, envelope: &Envelope) -> Result<usize> {
        let line = envelope.to_json()?;
        let targets: Vec<_> = self
            .inner
            .connections
            .iter()
            .filter(|entry| entry.state != ConnectionState::Connecting)
            .map(|entry| (*entry.key(), entry.peer.clone(), entry.outbound.clone()))
            .collect();

        let mut reached = 0;
        for (id, peer, outbound) in targets {
            // Spare connections to an already routed peer are skipped.
            if let Some(peer) = peer {
                let routed = self.inner.routes.get(&peer).map(|route| *route.value());
                if routed != Some(id) {
                    continue;
                }
            }
            if outbound.send(line.clone()).is_ok() {
                reached += 1;
            }
        }
        Ok(reached)
    }

    async fn send_to(&self, peer: &PeerAddress, envelope: &Envelope) -> Result<()> {
        let id = self
            .inner
            .routes
            .get(peer)
            .map(|routed| *routed.value())
            .ok_or_else(|| NetworkError::PeerNotConnected {
                addr: peer.to_string(),
            })?;
        if self.inner.queue(id, envelope.to_json()?) {
            Ok(())
        } else {
            Err(NetworkError::ConnectionClosed {
                addr: peer.to_string(),
            }
            .into())
        }
    }

    async fn connected_peers(&self) -> Vec<PeerAddress> {
        let routes: Vec<(PeerAddress, ConnectionId)> = self
            .inner
            .routes
            .iter()
            .map(|route| (route.key().clone(), *route.value()))
            .collect();
        routes
            .into_iter()
            .filter(|(_, id)| {
                self.inner
                    .connections
                    .get(id)
                    .is_some_and(|connection| connection.state != ConnectionState::Connecting)
            })
            .map(|(peer, _)| peer)
            .collect()
    }

    async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.listener.lock().await.take();
        self.inner.connections.clear();
        self.inner.routes.clear();
    }
}
