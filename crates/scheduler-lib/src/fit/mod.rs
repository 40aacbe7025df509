//! Resource fit resolution against the batch scheduler
//!
//! A fit attempt turns an unscheduled pod into a placement decision:
//! 1. Find the pod's job, submitting one when none exists yet. The job id is
//!    checkpointed into the pod's `JobID` annotation before anything else
//!    happens, so a job is submitted at most once per pod.
//! 2. Read the job status and interpret it.
//! 3. On a terminal outcome, explain it on the pod with a `FailedScheduling`
//!    event.

mod footprint;

pub use footprint::compute_footprint;

use crate::batch::BatchScheduler;
use crate::control_plane::ControlPlane;
use crate::error::BatchError;
use crate::events::EventRecorder;
use crate::health::{components, HealthRegistry};
use crate::models::{
    FailureReason, JobRecord, JobState, PlacementDecision, PodRef, JOB_ID_ANNOTATION,
};
use crate::observability::{SchedulerMetrics, SchedulingLogger};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pause between submitting a job and first asking for its status
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// PBS sub-state of a job running on its execution host
pub const DEFAULT_PLACED_SUBSTATE: &str = "42";

/// Fit resolver configuration
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub settle_delay: Duration,
    pub placed_substate: String,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            placed_substate: DEFAULT_PLACED_SUBSTATE.to_string(),
        }
    }
}

/// What a job status means for the pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobDisposition {
    /// The job runs on this host
    Placed(String),
    /// Not placed yet
    Waiting,
    /// The job ended without placing the pod
    Terminated,
}

/// Interpret a job record. Absent fields never place a pod.
pub fn disposition(record: &JobRecord, placed_substate: &str) -> JobDisposition {
    match record.state {
        JobState::Running if record.substate.as_deref() == Some(placed_substate) => {
            match record.assigned_host() {
                Some(host) => JobDisposition::Placed(host),
                None => JobDisposition::Waiting,
            }
        }
        JobState::Finished => JobDisposition::Terminated,
        _ => JobDisposition::Waiting,
    }
}

#[derive(Debug, Clone)]
struct Submission {
    job_id: String,
    at: Instant,
}

/// Resolves pods to nodes through the batch scheduler
pub struct FitResolver {
    batch: Arc<dyn BatchScheduler>,
    control_plane: Arc<dyn ControlPlane>,
    events: Arc<EventRecorder>,
    config: FitConfig,
    /// Pod key -> job submitted by this process, kept until the pod is bound,
    /// its job ends or it stops being listed
    submitted: DashMap<String, Submission>,
    health: HealthRegistry,
    metrics: SchedulerMetrics,
    logger: SchedulingLogger,
}

impl FitResolver {
    pub fn new(
        batch: Arc<dyn BatchScheduler>,
        control_plane: Arc<dyn ControlPlane>,
        events: Arc<EventRecorder>,
        config: FitConfig,
    ) -> Self {
        let logger = SchedulingLogger::new(events.component());
        Self {
            batch,
            control_plane,
            events,
            config,
            submitted: DashMap::new(),
            health: HealthRegistry::new(),
            metrics: SchedulerMetrics::new(),
            logger,
        }
    }

    /// Report gateway health into a shared registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Job submitted for `pod` by this process and not yet bound
    pub fn submitted_job(&self, pod: &PodRef) -> Option<String> {
        self.submitted
            .get(&pod.key())
            .map(|entry| entry.value().job_id.clone())
    }

    /// Drop the submission memo once the pod is bound
    pub fn forget(&self, pod: &PodRef) {
        self.submitted.remove(&pod.key());
    }

    /// Drop memos of pods missing from a listing taken at `listed_at`.
    /// Submissions made after the listing started are kept.
    pub fn retain_listed(&self, listed: &HashSet<String>, listed_at: Instant) {
        self.submitted
            .retain(|key, submission| listed.contains(key) || submission.at >= listed_at);
    }

    /// Run one fit attempt for `pod`
    pub async fn resolve(&self, pod: &PodRef) -> PlacementDecision {
        let job_id = match self.ensure_job(pod).await {
            Ok(job_id) => job_id,
            Err(reason) => return PlacementDecision::Failed(reason),
        };

        match self.batch.status(&job_id).await {
            Ok(record) => {
                self.health.record_success(components::BATCH_SCHEDULER).await;
                match disposition(&record, &self.config.placed_substate) {
                    JobDisposition::Placed(host) => {
                        debug!(pod = %pod, job_id = %job_id, node = %host, "Job placed");
                        PlacementDecision::Assigned(host)
                    }
                    JobDisposition::Waiting => {
                        debug!(
                            pod = %pod,
                            job_id = %job_id,
                            state = record.state_code.as_deref().unwrap_or("-"),
                            substate = record.substate.as_deref().unwrap_or("-"),
                            "Job not placed yet"
                        );
                        PlacementDecision::Pending
                    }
                    JobDisposition::Terminated => {
                        self.terminate(pod, &job_id, record.comment).await
                    }
                }
            }
            Err(BatchError::UnknownJob(_) | BatchError::FinishedJob(_)) => {
                self.health.record_success(components::BATCH_SCHEDULER).await;
                self.terminate(pod, &job_id, None).await
            }
            Err(e) => {
                self.health
                    .record_failure(components::BATCH_SCHEDULER, e.to_string())
                    .await;
                PlacementDecision::Failed(FailureReason::StatusUnavailable(e.to_string()))
            }
        }
    }

    /// Find the pod's job id, submitting and checkpointing a new job if needed
    async fn ensure_job(&self, pod: &PodRef) -> Result<String, FailureReason> {
        if let Some(job_id) = pod.job_id() {
            return Ok(job_id.to_string());
        }

        // The snapshot may predate our own checkpoint, or the checkpoint failed.
        if let Some(job_id) = self.submitted_job(pod) {
            debug!(pod = %pod, job_id = %job_id, "Reusing job submitted earlier");
            self.checkpoint(pod, &job_id).await?;
            return Ok(job_id);
        }

        let footprint = compute_footprint(pod)
            .map_err(|e| FailureReason::InvalidResources(e.to_string()))?;

        let job_id = match self.batch.submit(&pod.name, &footprint).await {
            Ok(job_id) => {
                self.health.record_success(components::BATCH_SCHEDULER).await;
                job_id
            }
            Err(e) => {
                self.health
                    .record_failure(components::BATCH_SCHEDULER, e.to_string())
                    .await;
                return Err(FailureReason::SubmissionFailed(e.to_string()));
            }
        };

        self.submitted.insert(
            pod.key(),
            Submission {
                job_id: job_id.clone(),
                at: Instant::now(),
            },
        );
        self.metrics.inc_jobs_submitted();
        self.logger.log_job_submitted(pod, &job_id, &footprint);

        self.checkpoint(pod, &job_id).await?;
        tokio::time::sleep(self.config.settle_delay).await;
        Ok(job_id)
    }

    /// Persist the job id on the pod
    async fn checkpoint(&self, pod: &PodRef, job_id: &str) -> Result<(), FailureReason> {
        let annotations = BTreeMap::from([(JOB_ID_ANNOTATION.to_string(), job_id.to_string())]);
        match self.control_plane.patch_annotations(pod, &annotations).await {
            Ok(()) => {
                self.health.record_success(components::CONTROL_PLANE).await;
                Ok(())
            }
            Err(e) => {
                warn!(pod = %pod, job_id = %job_id, error = %e, "Failed to record job id on pod");
                self.health
                    .record_failure(components::CONTROL_PLANE, e.to_string())
                    .await;
                Err(FailureReason::CheckpointFailed(e.to_string()))
            }
        }
    }

    async fn terminate(
        &self,
        pod: &PodRef,
        job_id: &str,
        comment: Option<String>,
    ) -> PlacementDecision {
        let comment = match comment {
            Some(comment) => Some(comment),
            None => self.batch.comment(job_id).await.unwrap_or_else(|e| {
                debug!(job_id = %job_id, error = %e, "No comment available for job");
                None
            }),
        };

        info!(
            pod = %pod,
            job_id = %job_id,
            comment = comment.as_deref().unwrap_or(""),
            "Job ended without placing pod"
        );
        self.events.failed_scheduling(pod, comment.as_deref()).await;
        self.forget(pod);

        PlacementDecision::Failed(FailureReason::JobTerminated {
            job_id: job_id.to_string(),
            comment,
        })
    }
}
