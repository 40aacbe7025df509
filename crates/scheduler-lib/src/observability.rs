//! Observability infrastructure for the bridge scheduler
//!
//! Provides:
//! - Prometheus metrics (attempt latency, submissions, bindings, failures, feed activity)
//! - Structured JSON logging of scheduling lifecycle events with tracing

use crate::models::{FailureReason, PodRef, ResourceFootprint};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for scheduling attempts (in seconds). Attempts that
/// submit a job include the settle delay.
const ATTEMPT_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 7.5, 10.0, 30.0, 60.0, 120.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SchedulerMetricsInner> = OnceLock::new();

struct SchedulerMetricsInner {
    attempt_latency_seconds: Histogram,
    jobs_submitted: IntCounter,
    pods_bound: IntCounter,
    placements_pending: IntCounter,
    placement_failures: IntCounterVec,
    bind_errors: IntCounter,
    events_suppressed: IntCounter,
    watch_reconnects: IntCounter,
    sweeps: IntCounter,
    pods_in_flight: IntGauge,
}

impl SchedulerMetricsInner {
    fn new() -> Self {
        Self {
            attempt_latency_seconds: register_histogram!(
                "pbs_scheduler_attempt_latency_seconds",
                "Time spent on one scheduling attempt for a pod",
                ATTEMPT_BUCKETS.to_vec()
            )
            .expect("Failed to register attempt_latency_seconds"),

            jobs_submitted: register_int_counter!(
                "pbs_scheduler_jobs_submitted_total",
                "Total number of PBS jobs submitted for pods"
            )
            .expect("Failed to register jobs_submitted"),

            pods_bound: register_int_counter!(
                "pbs_scheduler_pods_bound_total",
                "Total number of pods bound to a node"
            )
            .expect("Failed to register pods_bound"),

            placements_pending: register_int_counter!(
                "pbs_scheduler_placements_pending_total",
                "Total number of attempts that found the job not yet placed"
            )
            .expect("Failed to register placements_pending"),

            placement_failures: register_int_counter_vec!(
                "pbs_scheduler_placement_failures_total",
                "Total number of failed scheduling attempts by reason",
                &["reason"]
            )
            .expect("Failed to register placement_failures"),

            bind_errors: register_int_counter!(
                "pbs_scheduler_bind_errors_total",
                "Total number of rejected or failed binding requests"
            )
            .expect("Failed to register bind_errors"),

            events_suppressed: register_int_counter!(
                "pbs_scheduler_events_suppressed_total",
                "Total number of duplicate failure events not posted"
            )
            .expect("Failed to register events_suppressed"),

            watch_reconnects: register_int_counter!(
                "pbs_scheduler_watch_reconnects_total",
                "Total number of times the pod watch was reopened"
            )
            .expect("Failed to register watch_reconnects"),

            sweeps: register_int_counter!(
                "pbs_scheduler_sweeps_total",
                "Total number of reconciliation sweeps run"
            )
            .expect("Failed to register sweeps"),

            pods_in_flight: register_int_gauge!(
                "pbs_scheduler_pods_in_flight",
                "Number of pods with a scheduling attempt in progress"
            )
            .expect("Failed to register pods_in_flight"),
        }
    }
}

/// Scheduler metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct SchedulerMetrics {
    _private: (),
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SchedulerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SchedulerMetricsInner {
        GLOBAL_METRICS.get_or_init(SchedulerMetricsInner::new)
    }

    pub fn observe_attempt_latency(&self, duration_secs: f64) {
        self.inner().attempt_latency_seconds.observe(duration_secs);
    }

    pub fn inc_jobs_submitted(&self) {
        self.inner().jobs_submitted.inc();
    }

    pub fn inc_pods_bound(&self) {
        self.inner().pods_bound.inc();
    }

    pub fn inc_placements_pending(&self) {
        self.inner().placements_pending.inc();
    }

    pub fn inc_placement_failure(&self, reason: &FailureReason) {
        self.inner()
            .placement_failures
            .with_label_values(&[reason.label()])
            .inc();
    }

    pub fn inc_bind_errors(&self) {
        self.inner().bind_errors.inc();
    }

    pub fn inc_events_suppressed(&self) {
        self.inner().events_suppressed.inc();
    }

    pub fn inc_watch_reconnects(&self) {
        self.inner().watch_reconnects.inc();
    }

    pub fn inc_sweeps(&self) {
        self.inner().sweeps.inc();
    }

    pub fn set_pods_in_flight(&self, count: i64) {
        self.inner().pods_in_flight.set(count);
    }
}

/// Structured logger for scheduling lifecycle events
///
/// Every record carries an `event` field so log pipelines can select
/// submissions, bindings and failures without parsing messages.
#[derive(Clone)]
pub struct SchedulingLogger {
    component: String,
}

impl SchedulingLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// Log scheduler startup
    pub fn log_startup(&self, version: &str, api_server: &str, namespace: &str) {
        info!(
            event = "scheduler_started",
            component = %self.component,
            version = %version,
            api_server = %api_server,
            namespace = %namespace,
            "Bridge scheduler started"
        );
    }

    /// Log a job submission for a pod
    pub fn log_job_submitted(&self, pod: &PodRef, job_id: &str, footprint: &ResourceFootprint) {
        info!(
            event = "job_submitted",
            component = %self.component,
            pod = %pod.name,
            namespace = %pod.namespace,
            job_id = %job_id,
            cpu_millis = footprint.cpu_millis,
            memory_mb = footprint.memory_mb,
            "Submitted batch job for pod"
        );
    }

    /// Log a completed binding
    pub fn log_pod_bound(&self, pod: &PodRef, node: &str) {
        info!(
            event = "pod_bound",
            component = %self.component,
            pod = %pod.name,
            namespace = %pod.namespace,
            job_id = pod.job_id().unwrap_or_default(),
            node = %node,
            "Bound pod to node"
        );
    }

    /// Log a failed placement
    pub fn log_placement_failed(&self, pod: &PodRef, reason: &FailureReason) {
        warn!(
            event = "placement_failed",
            component = %self.component,
            pod = %pod.name,
            namespace = %pod.namespace,
            reason = reason.label(),
            error = %reason,
            "Pod could not be placed"
        );
    }

    /// Log scheduler shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "scheduler_shutdown",
            component = %self.component,
            reason = %reason,
            "Bridge scheduler shutting down"
        );
    }
}
