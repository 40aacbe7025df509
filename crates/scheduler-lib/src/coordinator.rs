//! Scheduling coordinator
//!
//! Owns the lifecycle of one scheduling attempt: claim the pod, resolve a
//! placement, bind and report. A pod is claimed by at most one attempt at a
//! time; a second trigger for a claimed pod is skipped because the running
//! attempt already covers it. Unrelated pods proceed concurrently up to a
//! fixed number of permits.

use crate::control_plane::ControlPlane;
use crate::error::SchedulingError;
use crate::events::EventRecorder;
use crate::fit::FitResolver;
use crate::health::{components, HealthRegistry};
use crate::models::{FailureReason, PlacementDecision, PodRef};
use crate::observability::{SchedulerMetrics, SchedulingLogger};
use dashmap::DashSet;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::debug;

/// Default number of pods resolved at the same time
pub const DEFAULT_MAX_CONCURRENT_PODS: usize = 4;

/// Why a trigger did not start an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another attempt for the pod is running
    InFlight,
    /// The pod is being deleted
    Terminating,
    /// The coordinator no longer accepts attempts
    ShuttingDown,
}

/// Result of one trigger for a pod
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    Bound(String),
    Pending,
    Failed(FailureReason),
    Skipped(SkipReason),
}

/// Coordinates scheduling attempts across pod sources
pub struct SchedulingCoordinator {
    resolver: Arc<FitResolver>,
    control_plane: Arc<dyn ControlPlane>,
    events: Arc<EventRecorder>,
    in_flight: DashSet<String>,
    permits: Semaphore,
    closed: AtomicBool,
    health: HealthRegistry,
    metrics: SchedulerMetrics,
    logger: SchedulingLogger,
}

impl SchedulingCoordinator {
    pub fn new(
        resolver: Arc<FitResolver>,
        control_plane: Arc<dyn ControlPlane>,
        events: Arc<EventRecorder>,
        max_concurrent_pods: usize,
    ) -> Self {
        let logger = SchedulingLogger::new(events.component());
        Self {
            resolver,
            control_plane,
            events,
            in_flight: DashSet::new(),
            permits: Semaphore::new(max_concurrent_pods.max(1)),
            closed: AtomicBool::new(false),
            health: HealthRegistry::new(),
            metrics: SchedulerMetrics::new(),
            logger,
        }
    }

    /// Report control plane health into a shared registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    /// Number of pods with an attempt in progress
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting attempts. Attempts already running complete.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.permits.close();
            debug!(in_flight = self.in_flight(), "Coordinator closed");
        }
    }

    /// Drop per-pod state for pods absent from a listing taken at `listed_at`
    pub fn retain_listed(&self, listed: &HashSet<String>, listed_at: Instant) {
        self.resolver.retain_listed(listed, listed_at);
        self.events.retain_listed(listed);
    }

    /// Run one scheduling attempt for `pod`
    pub async fn schedule_pod(&self, pod: PodRef) -> Result<ScheduleOutcome, SchedulingError> {
        if self.is_closed() {
            return Ok(ScheduleOutcome::Skipped(SkipReason::ShuttingDown));
        }
        if pod.terminating {
            debug!(pod = %pod, "Skipping pod being deleted");
            return Ok(ScheduleOutcome::Skipped(SkipReason::Terminating));
        }

        let _claim = match self.claim(&pod) {
            Some(claim) => claim,
            None => {
                debug!(pod = %pod, "Attempt already in flight, skipping");
                return Ok(ScheduleOutcome::Skipped(SkipReason::InFlight));
            }
        };

        // The semaphore is closed on shutdown, releasing queued attempts.
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Ok(ScheduleOutcome::Skipped(SkipReason::ShuttingDown)),
        };

        let started = Instant::now();
        let result = match self.resolver.resolve(&pod).await {
            PlacementDecision::Assigned(node) => self
                .bind(&pod, &node)
                .await
                .map(|()| ScheduleOutcome::Bound(node)),
            PlacementDecision::Pending => {
                self.metrics.inc_placements_pending();
                Ok(ScheduleOutcome::Pending)
            }
            PlacementDecision::Failed(reason) => {
                self.metrics.inc_placement_failure(&reason);
                self.logger.log_placement_failed(&pod, &reason);
                Ok(ScheduleOutcome::Failed(reason))
            }
        };
        self.metrics
            .observe_attempt_latency(started.elapsed().as_secs_f64());

        result
    }

    async fn bind(&self, pod: &PodRef, node: &str) -> Result<(), SchedulingError> {
        if let Err(source) = self.control_plane.bind(pod, node).await {
            self.metrics.inc_bind_errors();
            self.health
                .record_failure(components::CONTROL_PLANE, source.to_string())
                .await;
            return Err(SchedulingError::Bind {
                pod: pod.to_string(),
                node: node.to_string(),
                source,
            });
        }

        self.health.record_success(components::CONTROL_PLANE).await;
        self.metrics.inc_pods_bound();
        self.logger.log_pod_bound(pod, node);
        self.resolver.forget(pod);
        self.events.scheduled(pod, node).await;
        Ok(())
    }

    fn claim(&self, pod: &PodRef) -> Option<InFlightClaim<'_>> {
        let key = pod.key();
        if !self.in_flight.insert(key.clone()) {
            return None;
        }
        self.metrics.set_pods_in_flight(self.in_flight.len() as i64);
        Some(InFlightClaim {
            set: &self.in_flight,
            key,
            metrics: &self.metrics,
        })
    }
}

/// Releases the pod when the attempt ends, however it ends
struct InFlightClaim<'a> {
    set: &'a DashSet<String>,
    key: String,
    metrics: &'a SchedulerMetrics,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.key);
        self.metrics.set_pods_in_flight(self.set.len() as i64);
    }
}
