//! Proxy Server
//!
//! Owns every listener bound for a port specification and fans
//! reconfiguration out to all of them.

use crate::adapters::inbound::proxy_listener::ProxyListener;
use crate::adapters::outbound::DashMapConnectionStore;
use crate::domain::ports::ConnectionStore;
use crate::domain::value_objects::{parse_port_spec, PortMapping, PortSpecError};
use crate::infrastructure::shutdown::ConnectionTracker;
use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Errors raised while building a proxy server.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error(transparent)]
    PortSpec(#[from] PortSpecError),
    #[error("could not listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// A set of listeners sharing one source address.
///
/// Listeners are kept in mapping order; a listener's index is its
/// identity, since container ports may repeat across mappings.
pub struct ProxyServer {
    source_addr: String,
    listeners: Vec<Arc<ProxyListener>>,
    connections: Arc<DashMapConnectionStore>,
    tracker: ConnectionTracker,
}

impl ProxyServer {
    /// Parse `port_spec` and bind one listener per mapping on `source_addr`.
    pub async fn bind(source_addr: &str, port_spec: &str) -> Result<Self, ProxyError> {
        let mappings = parse_port_spec(port_spec)?;
        Self::bind_mappings(source_addr, mappings).await
    }

    /// Bind one listener per mapping.
    ///
    /// Fails as a whole if any bind fails; listeners bound before the
    /// failure are dropped, releasing their sockets.
    pub async fn bind_mappings(
        source_addr: &str,
        mappings: Vec<PortMapping>,
    ) -> Result<Self, ProxyError> {
        let connections = Arc::new(DashMapConnectionStore::new());
        let tracker = ConnectionTracker::new();
        let mut listeners = Vec::with_capacity(mappings.len());

        for mapping in mappings {
            let listener = ProxyListener::bind(
                source_addr,
                mapping,
                connections.clone() as Arc<dyn ConnectionStore>,
                tracker.clone(),
            )
            .await
            .map_err(|source| ProxyError::Bind {
                addr: format!("{}:{}", source_addr, mapping.host_port),
                source,
            })?;
            listeners.push(Arc::new(listener));
        }

        tracing::info!(
            source_addr,
            listeners = listeners.len(),
            "proxy server bound"
        );

        Ok(Self {
            source_addr: source_addr.to_string(),
            listeners,
            connections,
            tracker,
        })
    }

    pub fn source_addr(&self) -> &str {
        &self.source_addr
    }

    pub fn listeners(&self) -> &[Arc<ProxyListener>] {
        &self.listeners
    }

    /// Listener bound for a host port, if any.
    pub fn listener(&self, host_port: u16) -> Option<&Arc<ProxyListener>> {
        self.listeners
            .iter()
            .find(|l| l.mapping().host_port == host_port || l.local_addr().port() == host_port)
    }

    /// Spawn every listener's accept loop and return immediately.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.listeners
            .iter()
            .map(|listener| tokio::spawn(Arc::clone(listener).run()))
            .collect()
    }

    /// Close every listening socket without waiting for connections.
    pub fn stop(&self) {
        for listener in &self.listeners {
            listener.stop();
        }
    }

    /// Point every listener at a new backend.
    ///
    /// Returns the distinct, non-empty backend ids that were displaced. A
    /// backend that served several ports appears once.
    pub fn reconfigure_all(&self, backend_id: &str, backend_ip: &str) -> BTreeSet<String> {
        self.listeners
            .iter()
            .map(|listener| listener.reconfigure(backend_id, backend_ip))
            .filter(|previous| !previous.is_empty())
            .collect()
    }

    /// Open connections currently forwarded to a backend.
    pub fn active_connections(&self, backend_id: &str) -> usize {
        self.connections.get_connection_count(backend_id)
    }

    /// In-flight connections across every listener.
    pub fn connection_tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn ephemeral(container_ports: &[u16]) -> Vec<PortMapping> {
        container_ports
            .iter()
            .map(|&port| PortMapping::new(0, port))
            .collect()
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_spec() {
        let result = ProxyServer::bind("127.0.0.1", "8000-8009=80-84").await;
        assert!(matches!(
            result,
            Err(ProxyError::PortSpec(PortSpecError::RangeMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_bind_one_listener_per_mapping() {
        let server = ProxyServer::bind_mappings("127.0.0.1", ephemeral(&[80, 80, 443]))
            .await
            .unwrap();
        assert_eq!(server.listeners().len(), 3);
        assert_eq!(server.source_addr(), "127.0.0.1");

        let ports: BTreeSet<u16> = server
            .listeners()
            .iter()
            .map(|l| l.local_addr().port())
            .collect();
        assert_eq!(ports.len(), 3);
    }

    #[tokio::test]
    async fn test_bind_failure_releases_bound_sockets() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken_port = taken.local_addr().unwrap().port();

        let free_port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };

        let result = ProxyServer::bind_mappings(
            "127.0.0.1",
            vec![PortMapping::new(free_port, 80), PortMapping::new(taken_port, 81)],
        )
        .await;

        match result {
            Err(ProxyError::Bind { addr, .. }) => {
                assert_eq!(addr, format!("127.0.0.1:{}", taken_port));
            }
            other => panic!("expected bind error, got {:?}", other.map(|_| ())),
        }

        // The first listener was released along with the failed server.
        assert!(TcpListener::bind(("127.0.0.1", free_port)).await.is_ok());
    }

    #[tokio::test]
    async fn test_reconfigure_all_dedups_displaced() {
        let server = ProxyServer::bind_mappings("127.0.0.1", ephemeral(&[80, 81, 82]))
            .await
            .unwrap();

        assert!(server.reconfigure_all("first", "10.0.0.2").is_empty());

        let displaced = server.reconfigure_all("second", "10.0.0.3");
        assert_eq!(displaced, BTreeSet::from(["first".to_string()]));

        for listener in server.listeners() {
            assert_eq!(listener.destination().backend_id, "second");
        }
    }

    #[tokio::test]
    async fn test_reconfigure_all_reports_each_distinct_backend() {
        let server = ProxyServer::bind_mappings("127.0.0.1", ephemeral(&[80, 81]))
            .await
            .unwrap();
        server.listeners()[0].reconfigure("a", "10.0.0.2");
        server.listeners()[1].reconfigure("b", "10.0.0.3");

        let displaced = server.reconfigure_all("c", "10.0.0.4");
        assert_eq!(
            displaced,
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
    }

    #[tokio::test]
    async fn test_listener_lookup_by_port() {
        let server = ProxyServer::bind_mappings("127.0.0.1", ephemeral(&[80]))
            .await
            .unwrap();
        let port = server.listeners()[0].local_addr().port();
        assert!(server.listener(port).is_some());
    }

    #[tokio::test]
    async fn test_stop_ends_all_accept_loops() {
        let server = ProxyServer::bind_mappings("127.0.0.1", ephemeral(&[80, 81, 82]))
            .await
            .unwrap();
        let handles = server.start();
        tokio::time::sleep(Duration::from_millis(20)).await;

        server.stop();

        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("accept loop did not exit")
                .unwrap();
        }
    }
}
