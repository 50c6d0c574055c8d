//! Switchover Controller - Main application use case
//!
//! Consumes backend lifecycle events, gates new backends behind a
//! readiness check, moves every listener to the new backend and schedules
//! the displaced backends for termination after a grace period.

use crate::adapters::inbound::ProxyServer;
use crate::domain::entities::{BackendEvent, EventStatus};
use crate::domain::ports::{Orchestrator, OrchestratorError};
use crate::domain::services::Reconciler;
use crate::domain::value_objects::WatchTag;
use crate::infrastructure::health_checker::{HealthCheckConfig, HealthCheckError, HealthChecker};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Settings for the switchover controller.
#[derive(Debug, Clone)]
pub struct SwitchoverConfig {
    /// Only backends started from this image are considered
    pub tag: WatchTag,
    /// Readiness gate for every switchover after the first
    pub health_check: Option<HealthCheckConfig>,
    /// Delay between displacing a backend and terminating it
    pub grace_period: Duration,
}

impl SwitchoverConfig {
    pub fn new(tag: WatchTag) -> Self {
        Self {
            tag,
            health_check: None,
            grace_period: Duration::from_secs(10),
        }
    }

    pub fn health_check(mut self, config: HealthCheckConfig) -> Self {
        self.health_check = Some(config);
        self
    }

    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

/// What happened to a single lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchoverOutcome {
    /// Event did not concern us (other image or other status)
    Ignored,
    /// Traffic now goes to `backend_id`; `displaced` are scheduled for termination
    Adopted {
        backend_id: String,
        displaced: BTreeSet<String>,
    },
    /// The candidate was not adopted; the active backend is unchanged
    Aborted { backend_id: String, reason: String },
}

/// Mutable controller state.
#[derive(Debug, Default)]
struct SwitchoverState {
    /// Empty while idle
    active_backend_id: String,
    /// Termination obligations not yet dispatched, by obligation number
    pending_terminations: BTreeMap<u64, String>,
}

/// Drives backend switchovers for one proxy server.
///
/// Events must be fed from a single consumer (`run`, or sequential calls
/// to `handle_event`); termination timers run on their own tasks.
pub struct SwitchoverController {
    orchestrator: Arc<dyn Orchestrator>,
    proxy: Arc<ProxyServer>,
    tag: WatchTag,
    health_checker: Option<HealthChecker>,
    grace_period: Duration,
    state: Arc<Mutex<SwitchoverState>>,
    next_obligation: AtomicU64,
}

impl SwitchoverController {
    /// Create a new switchover controller.
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        proxy: Arc<ProxyServer>,
        config: SwitchoverConfig,
    ) -> Result<Self, HealthCheckError> {
        let health_checker = config.health_check.map(HealthChecker::new).transpose()?;

        Ok(Self {
            orchestrator,
            proxy,
            tag: config.tag,
            health_checker,
            grace_period: config.grace_period,
            state: Arc::new(Mutex::new(SwitchoverState::default())),
            next_obligation: AtomicU64::new(0),
        })
    }

    /// Id of the backend currently receiving new connections, if any.
    pub fn active_backend_id(&self) -> Option<String> {
        let state = self.state.lock();
        if state.active_backend_id.is_empty() {
            None
        } else {
            Some(state.active_backend_id.clone())
        }
    }

    /// Displaced backends whose termination has not been dispatched yet.
    pub fn pending_terminations(&self) -> Vec<String> {
        self.state
            .lock()
            .pending_terminations
            .values()
            .cloned()
            .collect()
    }

    /// Adopt the newest running backend and terminate the rest.
    ///
    /// Runs once at startup, before live events. The adopted backend skips
    /// the readiness check since it is already serving.
    pub async fn reconcile(&self) -> Result<Vec<JoinHandle<()>>, OrchestratorError> {
        let backends = self.orchestrator.list_running(&self.tag).await?;
        tracing::info!(tag = %self.tag, found = backends.len(), "reconciling existing backends");

        let plan = match Reconciler::plan(backends) {
            Some(plan) => plan,
            None => {
                tracing::info!(tag = %self.tag, "no running backends, waiting for one to start");
                return Ok(Vec::new());
            }
        };

        // Resolve the adoptee first; without it nothing is adopted or killed.
        let ip = if plan.adopt.ip_address.is_empty() {
            match self.orchestrator.inspect(&plan.adopt.id).await {
                Ok(ip) => ip,
                Err(e) => {
                    tracing::error!(backend_id = %plan.adopt.id, error = %e, "could not inspect latest backend, staying idle");
                    return Ok(Vec::new());
                }
            }
        } else {
            plan.adopt.ip_address
        };
        if ip.is_empty() {
            tracing::error!(backend_id = %plan.adopt.id, "latest backend has no address, staying idle");
            return Ok(Vec::new());
        }

        let displaced = self.adopt(&plan.adopt.id, &ip);

        let mut terminations = Vec::with_capacity(plan.terminate.len() + displaced.len());
        for stale in plan.terminate {
            tracing::info!(backend_id = %stale.id, "killing off old backend");
            terminations.push(self.schedule_termination(stale.id, Duration::ZERO));
        }
        terminations.extend(
            displaced
                .into_iter()
                .map(|id| self.schedule_termination(id, Duration::ZERO)),
        );

        Ok(terminations)
    }

    /// Process events in arrival order until the stream closes.
    pub async fn run(&self, mut events: mpsc::Receiver<BackendEvent>) {
        tracing::info!(tag = %self.tag, "watching backend events");
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        tracing::warn!("backend event stream closed");
    }

    /// Evaluate a single lifecycle event.
    pub async fn handle_event(&self, event: BackendEvent) -> SwitchoverOutcome {
        if !self.tag.matches(&event.tag) {
            return SwitchoverOutcome::Ignored;
        }

        match event.status {
            EventStatus::Started => self.on_backend_started(&event.backend_id).await,
            status => {
                tracing::debug!(backend_id = %event.backend_id, ?status, "ignoring lifecycle event");
                SwitchoverOutcome::Ignored
            }
        }
    }

    async fn on_backend_started(&self, backend_id: &str) -> SwitchoverOutcome {
        let active = self.active_backend_id();
        let restarted = active.as_deref() == Some(backend_id);

        let ip = match self.orchestrator.inspect(backend_id).await {
            Ok(ip) if !ip.is_empty() => ip,
            Ok(_) => return self.abort(backend_id, "backend has no IP address".to_string()),
            Err(e) => return self.abort(backend_id, format!("could not inspect backend: {}", e)),
        };

        match (&active, &self.health_checker) {
            // A restart may come back on a new address; it is already serving.
            _ if restarted => {
                tracing::info!(backend_id, %ip, "active backend restarted, refreshing its address");
            }
            (None, _) => {
                tracing::info!(backend_id, "first backend came online, routing traffic to it");
            }
            (Some(_), Some(checker)) => match checker.wait_until_ready(&ip).await {
                Ok(waited) => {
                    tracing::info!(backend_id, ?waited, "new backend answered status query");
                }
                Err(e) => {
                    return self.abort(
                        backend_id,
                        format!("new backend did not respond to status queries: {}", e),
                    );
                }
            },
            (Some(_), None) => {}
        }

        let displaced = self.adopt(backend_id, &ip);
        for id in &displaced {
            self.schedule_termination(id.clone(), self.grace_period);
        }

        SwitchoverOutcome::Adopted {
            backend_id: backend_id.to_string(),
            displaced,
        }
    }

    fn abort(&self, backend_id: &str, reason: String) -> SwitchoverOutcome {
        tracing::error!(backend_id, %reason, "switchover failed");
        SwitchoverOutcome::Aborted {
            backend_id: backend_id.to_string(),
            reason,
        }
    }

    /// Point every listener at the backend and record it as active.
    fn adopt(&self, backend_id: &str, ip: &str) -> BTreeSet<String> {
        tracing::info!(backend_id, ip, "switching to backend");

        let mut displaced = self.proxy.reconfigure_all(backend_id, ip);
        displaced.remove(backend_id);
        self.state.lock().active_backend_id = backend_id.to_string();

        displaced
    }

    /// Terminate a backend after `grace`, on its own task.
    ///
    /// Every call is a separate obligation, even for an id already pending.
    fn schedule_termination(&self, backend_id: String, grace: Duration) -> JoinHandle<()> {
        let obligation = self.next_obligation.fetch_add(1, Ordering::Relaxed);
        self.state
            .lock()
            .pending_terminations
            .insert(obligation, backend_id.clone());

        let orchestrator = self.orchestrator.clone();
        let proxy = self.proxy.clone();
        let state = self.state.clone();

        tokio::spawn(async move {
            if !grace.is_zero() {
                tracing::info!(backend_id = %backend_id, ?grace, "waiting to terminate backend");
                tokio::time::sleep(grace).await;
            }

            state.lock().pending_terminations.remove(&obligation);
            tracing::info!(
                backend_id = %backend_id,
                open_connections = proxy.active_connections(&backend_id),
                "terminating old backend"
            );

            if let Err(e) = orchestrator.terminate(&backend_id).await {
                tracing::error!(backend_id = %backend_id, error = %e, "failed to terminate backend");
            }
        })
    }
}
