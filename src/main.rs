//! hotswap-proxy - TCP proxy that follows the newest container of an image
//!
//! This is the composition root that wires together all the components.

use anyhow::{bail, Context};
use clap::Parser;
use hotswap_proxy::adapters::inbound::ProxyServer;
use hotswap_proxy::adapters::outbound::DockerOrchestrator;
use hotswap_proxy::application::{SwitchoverConfig, SwitchoverController};
use hotswap_proxy::config::Config;
use hotswap_proxy::domain::ports::Orchestrator;
use hotswap_proxy::infrastructure::shutdown_signal;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cfg = Config::parse();
    cfg.validate()?;

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .with_context(|| format!("invalid log level {:?}", cfg.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        address = %cfg.address,
        ports = %cfg.ports,
        tag = %cfg.tag,
        docker = %cfg.docker,
        "starting hotswap-proxy"
    );

    // ===== COMPOSITION ROOT =====

    // 1. Inbound: bind every listener before touching the orchestrator
    let proxy = Arc::new(
        ProxyServer::bind(&cfg.address, &cfg.ports)
            .await
            .context("failed to start proxy")?,
    );
    proxy.start();

    // 2. Outbound: orchestrator client
    let docker = DockerOrchestrator::new(&cfg.docker).context("invalid docker endpoint")?;
    docker
        .ping()
        .await
        .with_context(|| format!("cannot reach docker at {}", cfg.docker))?;
    let orchestrator: Arc<dyn Orchestrator> = Arc::new(docker);

    // Subscribe before reconciling so no start event falls in between
    let events = orchestrator
        .subscribe_events()
        .await
        .context("failed to subscribe to docker events")?;

    // 3. Application: switchover controller
    let mut switchover = SwitchoverConfig::new(cfg.watch_tag()).grace_period(cfg.grace_period);
    if let Some(health) = cfg.health_check() {
        switchover = switchover.health_check(health);
    }
    let controller = SwitchoverController::new(orchestrator, proxy.clone(), switchover)
        .context("failed to build health checker")?;

    controller
        .reconcile()
        .await
        .context("failed to reconcile running backends")?;

    println!("Listening...");

    let event_stream_ended = tokio::select! {
        _ = controller.run(events) => true,
        _ = shutdown_signal() => false,
    };

    proxy.stop();
    let tracker = proxy.connection_tracker();
    tracing::info!(
        open_connections = tracker.open_connections(),
        "draining connections"
    );
    if !tracker.wait_for_drain(cfg.drain_timeout).await {
        tracing::warn!(
            open_connections = tracker.open_connections(),
            "drain timeout reached, closing remaining connections"
        );
    }

    if event_stream_ended {
        bail!("docker event stream ended");
    }
    Ok(())
}
