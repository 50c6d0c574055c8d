//! Docker Orchestrator
//!
//! Implements Orchestrator against the Docker Engine HTTP API. The daemon
//! must be reachable over TCP (`tcp://host:port` or `http(s)://...`).
//!
//! See: https://docs.docker.com/engine/api/

use crate::domain::entities::{Backend, BackendEvent, EventStatus};
use crate::domain::ports::{Orchestrator, OrchestratorError};
use crate::domain::value_objects::WatchTag;
use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;

/// Buffered lifecycle events before the reader waits on the consumer.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Entry from `GET /containers/json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerSummary {
    id: String,
    image: String,
    created: i64,
    #[serde(default)]
    network_settings: Option<NetworkSettings>,
}

/// Response from `GET /containers/{id}/json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    #[serde(default)]
    network_settings: Option<NetworkSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct NetworkSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
    #[serde(rename = "Networks", default)]
    networks: BTreeMap<String, EndpointSettings>,
}

impl NetworkSettings {
    /// Default bridge address, else the first attached network with one.
    fn address(&self) -> Option<String> {
        if !self.ip_address.is_empty() {
            return Some(self.ip_address.clone());
        }
        self.networks
            .values()
            .map(|n| n.ip_address.as_str())
            .find(|ip| !ip.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Deserialize)]
struct EndpointSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

/// One line of the `GET /events` stream.
///
/// Older daemons fill `status`/`id`/`from`; newer ones only `Action`/`Actor`.
#[derive(Debug, Deserialize)]
struct DockerEvent {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(rename = "Type", default)]
    kind: Option<String>,
    #[serde(rename = "Action", default)]
    action: Option<String>,
    #[serde(rename = "Actor", default)]
    actor: Option<DockerActor>,
}

#[derive(Debug, Deserialize)]
struct DockerActor {
    #[serde(rename = "ID", default)]
    id: Option<String>,
    #[serde(rename = "Attributes", default)]
    attributes: HashMap<String, String>,
}

impl DockerEvent {
    fn into_backend_event(self) -> Option<BackendEvent> {
        if matches!(self.kind.as_deref(), Some(kind) if kind != "container") {
            return None;
        }

        let status = self.status.or(self.action)?;
        let (actor_id, actor_image) = match self.actor {
            Some(mut actor) => (actor.id, actor.attributes.remove("image")),
            None => (None, None),
        };
        let backend_id = self.id.or(actor_id)?;
        let tag = self.from.or(actor_image).unwrap_or_default();

        Some(BackendEvent::new(
            backend_id,
            tag,
            EventStatus::from_status(&status),
        ))
    }
}

/// Docker Engine API client.
pub struct DockerOrchestrator {
    base_url: String,
    client: reqwest::Client,
}

impl DockerOrchestrator {
    /// Create a client for a daemon endpoint such as `tcp://127.0.0.1:2375`.
    pub fn new(endpoint: &str) -> Result<Self, OrchestratorError> {
        Ok(Self {
            base_url: Self::base_url(endpoint)?,
            client: reqwest::Client::new(),
        })
    }

    /// Normalize a daemon endpoint into an HTTP base URL.
    fn base_url(endpoint: &str) -> Result<String, OrchestratorError> {
        let endpoint = endpoint.trim().trim_end_matches('/');
        if let Some(rest) = endpoint.strip_prefix("tcp://") {
            return Ok(format!("http://{}", rest));
        }
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Ok(endpoint.to_string());
        }
        if endpoint.contains("://") {
            return Err(OrchestratorError::Unsupported(format!(
                "{} (expose the daemon over tcp://)",
                endpoint
            )));
        }
        if endpoint.is_empty() {
            return Err(OrchestratorError::Unsupported("empty endpoint".to_string()));
        }
        Ok(format!("http://{}", endpoint))
    }

    /// Check that the daemon answers.
    pub async fn ping(&self) -> Result<(), OrchestratorError> {
        let response = self
            .client
            .get(format!("{}/_ping", self.base_url))
            .send()
            .await?;
        Self::check_status("ping", response).await?;
        Ok(())
    }

    async fn check_status(
        operation: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, OrchestratorError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Err(OrchestratorError::Status {
            operation: operation.to_string(),
            status,
            message: message.trim().to_string(),
        })
    }

    fn to_backend(summary: ContainerSummary) -> Result<Backend, OrchestratorError> {
        let created_at = Utc
            .timestamp_opt(summary.created, 0)
            .single()
            .ok_or_else(|| {
                OrchestratorError::Decode(format!(
                    "container {} has invalid creation time {}",
                    summary.id, summary.created
                ))
            })?;

        Ok(Backend {
            ip_address: summary
                .network_settings
                .and_then(|n| n.address())
                .unwrap_or_default(),
            id: summary.id,
            tag: summary.image,
            created_at,
        })
    }
}

/// Decode one event line; blank or foreign lines yield None.
fn decode_event_line(line: &[u8]) -> Option<BackendEvent> {
    let line = std::str::from_utf8(line).ok()?.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<DockerEvent>(line) {
        Ok(event) => event.into_backend_event(),
        Err(e) => {
            tracing::warn!(error = %e, "skipping undecodable docker event");
            None
        }
    }
}

#[async_trait]
impl Orchestrator for DockerOrchestrator {
    async fn list_running(&self, tag: &WatchTag) -> Result<Vec<Backend>, OrchestratorError> {
        let response = self
            .client
            .get(format!("{}/containers/json", self.base_url))
            .send()
            .await?;
        let response = Self::check_status("list containers", response).await?;
        let containers: Vec<ContainerSummary> = response
            .json()
            .await
            .map_err(|e| OrchestratorError::Decode(e.to_string()))?;

        containers
            .into_iter()
            .filter(|c| tag.matches(&c.image))
            .map(Self::to_backend)
            .collect()
    }

    async fn inspect(&self, id: &str) -> Result<String, OrchestratorError> {
        let response = self
            .client
            .get(format!("{}/containers/{}/json", self.base_url, id))
            .send()
            .await?;
        let response = Self::check_status("inspect container", response).await?;
        let container: ContainerInspect = response
            .json()
            .await
            .map_err(|e| OrchestratorError::Decode(e.to_string()))?;

        Ok(container
            .network_settings
            .and_then(|n| n.address())
            .unwrap_or_default())
    }

    async fn terminate(&self, id: &str) -> Result<(), OrchestratorError> {
        let response = self
            .client
            .post(format!("{}/containers/{}/kill", self.base_url, id))
            .send()
            .await?;
        Self::check_status("kill container", response).await?;
        Ok(())
    }

    async fn subscribe_events(&self) -> Result<mpsc::Receiver<BackendEvent>, OrchestratorError> {
        let response = self
            .client
            .get(format!("{}/events", self.base_url))
            .query(&[("filters", r#"{"type":["container"]}"#)])
            .send()
            .await?;
        let response = Self::check_status("subscribe events", response).await?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buf = BytesMut::new();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::error!(error = %e, "docker event stream failed");
                        break;
                    }
                };
                buf.extend_from_slice(&chunk);

                while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line = buf.split_to(pos + 1);
                    if let Some(event) = decode_event_line(&line) {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            }

            if let Some(event) = decode_event_line(&buf) {
                let _ = tx.send(event).await;
            }
            tracing::warn!("docker event stream ended");
        });

        Ok(rx)
    }
}
