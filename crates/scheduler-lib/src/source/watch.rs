//! Streaming pod feed
//!
//! Keeps a watch open on unscheduled pods and dispatches every added pod to
//! the coordinator on its own task. A stream the server ends cleanly is
//! reopened at once; a failed stream is reopened after the retry delay.

use super::log_outcome;
use crate::control_plane::ControlPlane;
use crate::coordinator::SchedulingCoordinator;
use crate::error::ControlPlaneError;
use crate::health::{components, HealthRegistry};
use crate::models::PodRef;
use crate::observability::SchedulerMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Delay schedule for reopening a failed watch
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failure (default: 5 seconds)
    pub initial_delay: Duration,
    /// Growth factor per consecutive failure (default: 1, a fixed delay)
    pub multiplier: u32,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Give up after this many consecutive failures (default: never)
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            multiplier: 1,
            max_delay: Duration::from_secs(300),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt`, counting from 1
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether `failures` consecutive failures use up the policy
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts.map_or(false, |max| failures >= max)
    }
}

/// How one watch stream ended
#[derive(Debug)]
enum StreamExit {
    /// The server ended the stream
    Closed,
    Failed(ControlPlaneError),
    Shutdown,
}

/// Watch-driven pod source
pub struct WatchFeed {
    control_plane: Arc<dyn ControlPlane>,
    coordinator: Arc<SchedulingCoordinator>,
    retry: RetryPolicy,
    health: HealthRegistry,
    metrics: SchedulerMetrics,
}

impl WatchFeed {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        coordinator: Arc<SchedulingCoordinator>,
        retry: RetryPolicy,
        health: HealthRegistry,
    ) -> Self {
        Self {
            control_plane,
            coordinator,
            retry,
            health,
            metrics: SchedulerMetrics::new(),
        }
    }

    /// Run until shutdown, or until the retry policy is exhausted.
    /// Attempts already dispatched are awaited before returning.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            initial_retry_delay_secs = self.retry.initial_delay.as_secs(),
            "Starting pod watch feed"
        );

        let mut tasks = JoinSet::new();
        let mut failures = 0u32;

        loop {
            match self.stream_once(&mut tasks, &mut shutdown, &mut failures).await {
                StreamExit::Shutdown => {
                    info!("Shutting down pod watch feed");
                    break;
                }
                StreamExit::Closed => {
                    debug!("Pod watch ended by server, reopening");
                    self.metrics.inc_watch_reconnects();
                }
                StreamExit::Failed(e) => {
                    failures = failures.saturating_add(1);
                    self.health
                        .record_failure(components::WATCH_FEED, e.to_string())
                        .await;

                    if self.retry.exhausted(failures) {
                        error!(error = %e, failures, "Pod watch retries exhausted, stopping feed");
                        self.health
                            .set_unhealthy(
                                components::WATCH_FEED,
                                format!("watch stopped after {} failures: {}", failures, e),
                            )
                            .await;
                        break;
                    }

                    let delay = self.retry.delay_for(failures);
                    warn!(
                        error = %e,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "Pod watch failed, retrying"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.recv() => {
                            info!("Shutting down pod watch feed");
                            break;
                        }
                    }
                    self.metrics.inc_watch_reconnects();
                }
            }
        }

        if !tasks.is_empty() {
            info!(pending = tasks.len(), "Waiting for dispatched attempts");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Scheduling task failed");
            }
        }
        info!("Pod watch feed stopped");
    }

    async fn stream_once(
        &self,
        tasks: &mut JoinSet<()>,
        shutdown: &mut broadcast::Receiver<()>,
        failures: &mut u32,
    ) -> StreamExit {
        let mut watch = tokio::select! {
            opened = self.control_plane.watch_unscheduled() => match opened {
                Ok(watch) => watch,
                Err(e) => return StreamExit::Failed(e),
            },
            _ = shutdown.recv() => return StreamExit::Shutdown,
        };

        *failures = 0;
        self.health.record_success(components::WATCH_FEED).await;
        debug!("Pod watch open");

        loop {
            tokio::select! {
                next = watch.next_added() => match next {
                    Ok(Some(pod)) => self.dispatch(tasks, pod),
                    Ok(None) => return StreamExit::Closed,
                    Err(e) => return StreamExit::Failed(e),
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Scheduling task failed");
                    }
                }
                _ = shutdown.recv() => return StreamExit::Shutdown,
            }
        }
    }

    fn dispatch(&self, tasks: &mut JoinSet<()>, pod: PodRef) {
        debug!(pod = %pod, "Pod added");
        let coordinator = self.coordinator.clone();
        tasks.spawn(async move {
            let name = pod.to_string();
            let result = coordinator.schedule_pod(pod).await;
            log_outcome(&name, &result);
        });
    }
}
