//! PBS bridge scheduler
//!
//! Runs as a Kubernetes scheduler that hands every unscheduled pod to PBS,
//! waits for PBS to pick an execution host and binds the pod to it.

use anyhow::{Context, Result};
use scheduler_lib::{
    health::{components, HealthRegistry},
    BatchScheduler, ControlPlane, EventRecorder, FitResolver, HttpControlPlane, PbsCli,
    SchedulerMetrics, SchedulingCoordinator, SchedulingLogger, SweepLoop, WatchFeed,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod shutdown;

const SCHEDULER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting pbs-scheduler");

    let config = config::SchedulerConfig::load()?;
    let control_plane_config = config.control_plane_config()?;

    let health_registry =
        HealthRegistry::new().with_unhealthy_threshold(config.unhealthy_threshold);
    for name in components::ALL {
        health_registry.register(name).await;
    }

    let metrics = SchedulerMetrics::new();
    let logger = SchedulingLogger::new(&config.event_component);
    logger.log_startup(
        SCHEDULER_VERSION,
        &control_plane_config.api_server,
        &control_plane_config.namespace,
    );

    let control_plane: Arc<dyn ControlPlane> = Arc::new(
        HttpControlPlane::new(control_plane_config).context("Failed to create API server client")?,
    );
    let batch: Arc<dyn BatchScheduler> = Arc::new(PbsCli::new(config.pbs_config()));

    let events = Arc::new(
        EventRecorder::new(control_plane.clone(), &config.event_component)
            .with_dedup_window(config.event_dedup_window()),
    );
    let resolver = Arc::new(
        FitResolver::new(batch, control_plane.clone(), events.clone(), config.fit_config())
            .with_health(health_registry.clone()),
    );
    let coordinator = Arc::new(
        SchedulingCoordinator::new(
            resolver,
            control_plane.clone(),
            events,
            config.max_concurrent_pods,
        )
        .with_health(health_registry.clone()),
    );

    let (shutdown_tx, _) = broadcast::channel(1);

    // Start health and metrics server
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, shutdown_tx.subscribe()));

    let watch = WatchFeed::new(
        control_plane.clone(),
        coordinator.clone(),
        config.retry_policy(),
        health_registry.clone(),
    );
    let watch_handle = tokio::spawn(watch.run(shutdown_tx.subscribe()));

    let sweep = SweepLoop::new(
        control_plane,
        coordinator.clone(),
        config.sweep_interval(),
        health_registry.clone(),
    );
    let sweep_handle = tokio::spawn(sweep.run(shutdown_tx.subscribe()));

    health_registry.set_ready(true).await;
    info!(
        namespace = %config.namespace,
        max_concurrent_pods = config.max_concurrent_pods,
        "Scheduler ready"
    );

    let reason = shutdown::wait_for_signal().await?;
    logger.log_shutdown(reason);
    health_registry.set_ready(false).await;

    // No new attempts; running ones finish before the sources return
    coordinator.close();
    let _ = shutdown_tx.send(());

    for (name, handle) in [("watch", watch_handle), ("sweep", sweep_handle)] {
        if let Err(e) = handle.await {
            error!(task = name, error = %e, "Task panicked");
        }
    }
    match api_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "API server failed"),
        Err(e) => error!(task = "api", error = %e, "Task panicked"),
    }

    info!(in_flight = coordinator.in_flight(), "Shutdown complete");
    Ok(())
}
