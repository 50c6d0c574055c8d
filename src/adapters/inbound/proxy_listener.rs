//! Proxy Listener
//!
//! Owns one bound host port and forwards every accepted connection to the
//! backend configured at the moment it was accepted.

use crate::domain::entities::{backend_address, Destination};
use crate::domain::ports::ConnectionStore;
use crate::domain::value_objects::PortMapping;
use crate::infrastructure::shutdown::{ConnectionGuard, ConnectionTracker};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::Instrument;

/// Back-off after a failed accept, so persistent errors don't spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// A TCP listener bound to one host port.
///
/// The destination is an immutable snapshot swapped atomically, so
/// connections never see a backend id paired with another backend's
/// address.
pub struct ProxyListener {
    mapping: PortMapping,
    local_addr: SocketAddr,
    /// Taken by the accept loop; dropped by `stop` if the loop never ran.
    socket: Mutex<Option<TcpListener>>,
    destination: ArcSwap<Destination>,
    stop_tx: watch::Sender<bool>,
    connections: Arc<dyn ConnectionStore>,
    tracker: ConnectionTracker,
}

impl ProxyListener {
    /// Bind `source_addr:host_port`.
    pub async fn bind(
        source_addr: &str,
        mapping: PortMapping,
        connections: Arc<dyn ConnectionStore>,
        tracker: ConnectionTracker,
    ) -> io::Result<Self> {
        let socket = TcpListener::bind((source_addr, mapping.host_port)).await?;
        let local_addr = socket.local_addr()?;
        let (stop_tx, _) = watch::channel(false);

        tracing::debug!(%local_addr, container_port = mapping.container_port, "listener bound");

        Ok(Self {
            mapping,
            local_addr,
            socket: Mutex::new(Some(socket)),
            destination: ArcSwap::from_pointee(Destination::default()),
            stop_tx,
            connections,
            tracker,
        })
    }

    pub fn mapping(&self) -> PortMapping {
        self.mapping
    }

    /// Address actually bound (differs from the mapping when it asked for port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current destination snapshot.
    pub fn destination(&self) -> Arc<Destination> {
        self.destination.load_full()
    }

    /// Point new connections at `backend_ip`, returning the previous backend id.
    ///
    /// The previous id is empty if no backend was configured. Connections
    /// already accepted keep the destination they started with.
    pub fn reconfigure(&self, backend_id: &str, backend_ip: &str) -> String {
        let next = Destination::new(
            backend_id,
            backend_address(backend_ip, self.mapping.container_port),
        );
        let previous = self.destination.swap(Arc::new(next));
        previous.backend_id.clone()
    }

    /// Close the listening socket. In-flight connections are left alone.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
        // Not yet running: release the socket here.
        drop(self.socket.lock().take());
    }

    /// Accept connections until `stop` is called.
    pub async fn run(self: Arc<Self>) {
        let mut stop_rx = self.stop_tx.subscribe();
        let socket = match self.socket.lock().take() {
            Some(socket) => socket,
            None => return,
        };
        if *stop_rx.borrow() {
            return;
        }

        tracing::info!(
            local_addr = %self.local_addr,
            container_port = self.mapping.container_port,
            "listener started"
        );

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                accepted = socket.accept() => match accepted {
                    Ok((stream, peer)) => {
                        // Snapshot at accept time; later reconfigures don't apply.
                        let destination = self.destination.load_full();
                        let listener = Arc::clone(&self);
                        let span = tracing::info_span!(
                            "connection",
                            %peer,
                            host_port = self.local_addr.port()
                        );
                        tokio::spawn(
                            async move { listener.handle_connection(stream, destination).await }
                                .instrument(span),
                        );
                    }
                    Err(e) => {
                        tracing::error!(local_addr = %self.local_addr, error = %e, "failed to accept connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            }
        }

        drop(socket);
        tracing::info!(local_addr = %self.local_addr, "listener stopped");
    }

    /// Dial the destination and forward bytes both ways until both
    /// directions are done.
    pub async fn handle_connection(&self, inbound: TcpStream, destination: Arc<Destination>) {
        if !destination.is_set() {
            tracing::warn!("no backend configured yet, closing connection");
            return;
        }

        let outbound = match TcpStream::connect(&destination.address).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(
                    backend_id = %destination.backend_id,
                    address = %destination.address,
                    error = %e,
                    "failed to dial backend"
                );
                return;
            }
        };

        let _tracked = TrackedConnection::new(
            self.connections.clone(),
            &destination.backend_id,
            self.tracker.track(),
        );

        tracing::info!(
            backend_id = %destination.backend_id,
            address = %destination.address,
            "forwarding connection"
        );

        forward(inbound, outbound).await;

        tracing::debug!(backend_id = %destination.backend_id, "connection finished");
    }
}

/// Counts a live connection against its backend until dropped.
struct TrackedConnection {
    connections: Arc<dyn ConnectionStore>,
    backend_id: String,
    _guard: ConnectionGuard,
}

impl TrackedConnection {
    fn new(connections: Arc<dyn ConnectionStore>, backend_id: &str, guard: ConnectionGuard) -> Self {
        connections.increment_connections(backend_id);
        Self {
            connections,
            backend_id: backend_id.to_string(),
            _guard: guard,
        }
    }
}

impl Drop for TrackedConnection {
    fn drop(&mut self) {
        self.connections.decrement_connections(&self.backend_id);
    }
}

/// Copy bytes in both directions on independent tasks.
///
/// Each direction half-closes its writer on EOF so the peer sees the end
/// of stream, and a failure in one direction leaves the other running.
/// Returns once both directions have finished; the sockets close on drop.
pub async fn forward(inbound: TcpStream, outbound: TcpStream) {
    let (mut inbound_read, mut inbound_write) = inbound.into_split();
    let (mut outbound_read, mut outbound_write) = outbound.into_split();

    let upstream = tokio::spawn(async move {
        let result = tokio::io::copy(&mut inbound_read, &mut outbound_write).await;
        let _ = outbound_write.shutdown().await;
        result
    });

    let downstream = tokio::spawn(async move {
        let result = tokio::io::copy(&mut outbound_read, &mut inbound_write).await;
        let _ = inbound_write.shutdown().await;
        result
    });

    let (up, down) = tokio::join!(upstream, downstream);
    report_direction("client->backend", up);
    report_direction("backend->client", down);
}

fn report_direction(direction: &str, result: Result<io::Result<u64>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(bytes)) => tracing::trace!(direction, bytes, "direction finished"),
        Ok(Err(e)) => tracing::warn!(direction, error = %e, "failed to forward traffic"),
        Err(e) => tracing::error!(direction, error = %e, "forwarding task failed"),
    }
}
