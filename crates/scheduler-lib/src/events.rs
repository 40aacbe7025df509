//! Scheduling event emission
//!
//! Handles:
//! - Building `Scheduled` and `FailedScheduling` events for pods
//! - Posting them through the control plane
//! - Deduplication of failure events for a pod within a configurable window

use crate::control_plane::ControlPlane;
use crate::models::{EventSeverity, PodRef, SchedulingEvent};
use crate::observability::SchedulerMetrics;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default deduplication window (15 minutes)
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Source component reported on every event
pub const DEFAULT_COMPONENT: &str = "pbs-scheduler";

pub const REASON_SCHEDULED: &str = "Scheduled";
pub const REASON_FAILED_SCHEDULING: &str = "FailedScheduling";

/// Event emitter with failure deduplication
pub struct EventRecorder {
    control_plane: Arc<dyn ControlPlane>,
    component: String,
    dedup_window: Duration,
    /// Pod key -> last time a failure event was posted
    recent_failures: DashMap<String, Instant>,
    metrics: SchedulerMetrics,
}

impl EventRecorder {
    pub fn new(control_plane: Arc<dyn ControlPlane>, component: impl Into<String>) -> Self {
        Self {
            control_plane,
            component: component.into(),
            dedup_window: DEFAULT_DEDUP_WINDOW,
            recent_failures: DashMap::new(),
            metrics: SchedulerMetrics::new(),
        }
    }

    /// Set custom deduplication window. Zero disables deduplication.
    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn scheduled_event(&self, pod: &PodRef, node: &str) -> SchedulingEvent {
        SchedulingEvent {
            reason: REASON_SCHEDULED.to_string(),
            message: format!("Successfully assigned {} to {}", pod.name, node),
            severity: EventSeverity::Normal,
            component: self.component.clone(),
            pod: pod.clone(),
        }
    }

    pub fn failed_scheduling_event(&self, pod: &PodRef, comment: Option<&str>) -> SchedulingEvent {
        let mut message = format!("pod ({}) failed to fit in any node", pod.name);
        if let Some(comment) = comment.map(str::trim).filter(|c| !c.is_empty()) {
            message.push_str(": ");
            message.push_str(comment);
        }

        SchedulingEvent {
            reason: REASON_FAILED_SCHEDULING.to_string(),
            message,
            severity: EventSeverity::Warning,
            component: self.component.clone(),
            pod: pod.clone(),
        }
    }

    /// Post the `Scheduled` event for a bound pod. Returns whether it was posted.
    pub async fn scheduled(&self, pod: &PodRef, node: &str) -> bool {
        self.recent_failures.remove(&pod.key());
        self.post(self.scheduled_event(pod, node)).await
    }

    /// Post a `FailedScheduling` event unless one was posted for the pod
    /// within the dedup window. Returns whether it was posted.
    pub async fn failed_scheduling(&self, pod: &PodRef, comment: Option<&str>) -> bool {
        let key = pod.key();
        if self.should_suppress(&key) {
            debug!(pod = %pod, "Suppressing duplicate FailedScheduling event");
            self.metrics.inc_events_suppressed();
            return false;
        }

        let posted = self.post(self.failed_scheduling_event(pod, comment)).await;
        if posted {
            self.record_failure(key);
        }
        posted
    }

    /// Check if a failure event for `key` falls inside the dedup window
    pub fn should_suppress(&self, key: &str) -> bool {
        if self.dedup_window.is_zero() {
            return false;
        }
        self.recent_failures
            .get(key)
            .map_or(false, |last| last.elapsed() < self.dedup_window)
    }

    /// Forget pods missing from the latest listing, along with expired entries
    pub fn retain_listed(&self, listed: &HashSet<String>) {
        let window = self.dedup_window;
        self.recent_failures
            .retain(|key, last| listed.contains(key) && last.elapsed() < window);
    }

    fn record_failure(&self, key: String) {
        if self.dedup_window.is_zero() {
            return;
        }
        self.recent_failures.insert(key, Instant::now());

        // Clean up old entries
        let window = self.dedup_window;
        self.recent_failures.retain(|_, last| last.elapsed() < window);
    }

    async fn post(&self, event: SchedulingEvent) -> bool {
        match self.control_plane.post_event(&event).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    pod = %event.pod,
                    reason = %event.reason,
                    error = %e,
                    "Failed to post event"
                );
                false
            }
        }
    }
}
