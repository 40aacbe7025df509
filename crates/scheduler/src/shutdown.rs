use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

/// Wait for SIGTERM or SIGINT and return a description of the signal
pub async fn wait_for_signal() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    let received = tokio::select! {
        _ = sigterm.recv() => "SIGTERM received",
        _ = sigint.recv() => "SIGINT received",
    };

    info!(signal = received, "Initiating graceful shutdown");
    Ok(received)
}
