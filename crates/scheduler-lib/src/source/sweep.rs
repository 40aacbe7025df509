//! Periodic reconciliation sweep
//!
//! Lists every unscheduled pod on a fixed interval and runs each one
//! through the coordinator, oldest first. A sweep waits for all of its
//! attempts before the next one starts.

use super::log_outcome;
use crate::control_plane::ControlPlane;
use crate::coordinator::{ScheduleOutcome, SchedulingCoordinator};
use crate::health::{components, HealthRegistry};
use crate::observability::SchedulerMetrics;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default time between sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(20);

/// Per-sweep counts
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepResults {
    pub listed: usize,
    pub bound: usize,
    pub pending: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Abandoned attempts, plus one if the list itself failed
    pub errors: usize,
}

/// List-driven pod source
pub struct SweepLoop {
    control_plane: Arc<dyn ControlPlane>,
    coordinator: Arc<SchedulingCoordinator>,
    interval: Duration,
    health: HealthRegistry,
    metrics: SchedulerMetrics,
}

impl SweepLoop {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        coordinator: Arc<SchedulingCoordinator>,
        interval: Duration,
        health: HealthRegistry,
    ) -> Self {
        Self {
            control_plane,
            coordinator,
            interval,
            health,
            metrics: SchedulerMetrics::new(),
        }
    }

    /// Sweep every interval until shutdown. The first sweep runs one
    /// interval after start.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting reconciliation sweep"
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let results = self.sweep_once().await;
                    debug!(
                        listed = results.listed,
                        bound = results.bound,
                        pending = results.pending,
                        failed = results.failed,
                        skipped = results.skipped,
                        errors = results.errors,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Sweep complete"
                    );
                }
                _ = shutdown.recv() => {
                    info!("Shutting down reconciliation sweep");
                    break;
                }
            }
        }
    }

    /// List unscheduled pods and run one attempt for each
    pub async fn sweep_once(&self) -> SweepResults {
        self.metrics.inc_sweeps();
        let mut results = SweepResults::default();

        let listed_at = std::time::Instant::now();
        let mut pods = match self.control_plane.list_unscheduled().await {
            Ok(pods) => {
                self.health.record_success(components::SWEEP).await;
                pods
            }
            Err(e) => {
                warn!(error = %e, "Failed to list unscheduled pods");
                self.health
                    .record_failure(components::SWEEP, e.to_string())
                    .await;
                results.errors += 1;
                return results;
            }
        };

        pods.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        results.listed = pods.len();

        let keys: HashSet<String> = pods.iter().map(|pod| pod.key()).collect();
        self.coordinator.retain_listed(&keys, listed_at);

        let mut tasks = JoinSet::new();
        for pod in pods {
            let coordinator = self.coordinator.clone();
            tasks.spawn(async move {
                let name = pod.to_string();
                let result = coordinator.schedule_pod(pod).await;
                log_outcome(&name, &result);
                result
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(ScheduleOutcome::Bound(_))) => results.bound += 1,
                Ok(Ok(ScheduleOutcome::Pending)) => results.pending += 1,
                Ok(Ok(ScheduleOutcome::Failed(_))) => results.failed += 1,
                Ok(Ok(ScheduleOutcome::Skipped(_))) => results.skipped += 1,
                Ok(Err(_)) => results.errors += 1,
                Err(e) => {
                    warn!(error = %e, "Scheduling task failed");
                    results.errors += 1;
                }
            }
        }

        results
    }
}
