//! Core data models for the bridge scheduler

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Pod annotation holding the PBS job id submitted for the pod.
pub const JOB_ID_ANNOTATION: &str = "JobID";

/// Snapshot of an unscheduled pod as seen by one processing pass
#[derive(Debug, Clone, PartialEq)]
pub struct PodRef {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub created_at: Option<DateTime<Utc>>,
    pub containers: Vec<ContainerRequests>,
    pub annotations: BTreeMap<String, String>,
    /// Deletion has been requested for the pod
    pub terminating: bool,
}

impl PodRef {
    /// Identity used for in-flight ownership and the submission memo
    pub fn key(&self) -> String {
        if self.uid.is_empty() {
            format!("{}/{}", self.namespace, self.name)
        } else {
            self.uid.clone()
        }
    }

    /// The persisted job id, if the pod has already been submitted
    pub fn job_id(&self) -> Option<&str> {
        self.annotations
            .get(JOB_ID_ANNOTATION)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Resource requests of a single container, keyed by resource kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerRequests {
    pub name: String,
    pub requests: BTreeMap<String, String>,
}

/// Aggregate request of a pod, derived fresh on every fit attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceFootprint {
    pub cpu_millis: u64,
    pub memory_mb: u64,
}

/// Lifecycle of a PBS job, folded from its state code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Running,
    Finished,
    Unknown,
}

impl JobState {
    pub fn from_code(code: Option<&str>) -> Self {
        match code {
            Some("Q" | "H" | "W" | "T" | "S" | "M" | "B") => JobState::Submitted,
            Some("R") => JobState::Running,
            Some("E" | "F" | "X") => JobState::Finished,
            _ => JobState::Unknown,
        }
    }
}

/// Structured view of one `qstat -f` answer
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub job_id: String,
    pub state: JobState,
    pub state_code: Option<String>,
    pub substate: Option<String>,
    pub exec_host: Option<String>,
    pub comment: Option<String>,
}

impl JobRecord {
    /// First execution host, without the `/<cpu index>` suffix
    pub fn assigned_host(&self) -> Option<String> {
        let exec_host = self.exec_host.as_deref()?;
        let first = exec_host.split('+').next()?;
        let host = first.split('/').next()?.trim();
        if host.is_empty() {
            None
        } else {
            Some(host.to_string())
        }
    }
}

/// Why a fit attempt did not produce a placement
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    InvalidResources(String),
    SubmissionFailed(String),
    CheckpointFailed(String),
    StatusUnavailable(String),
    JobTerminated {
        job_id: String,
        comment: Option<String>,
    },
}

impl FailureReason {
    /// Stable label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::InvalidResources(_) => "invalid_resources",
            FailureReason::SubmissionFailed(_) => "submission_failed",
            FailureReason::CheckpointFailed(_) => "checkpoint_failed",
            FailureReason::StatusUnavailable(_) => "status_unavailable",
            FailureReason::JobTerminated { .. } => "job_terminated",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::InvalidResources(msg) => write!(f, "invalid resource requests: {}", msg),
            FailureReason::SubmissionFailed(msg) => write!(f, "job submission failed: {}", msg),
            FailureReason::CheckpointFailed(msg) => {
                write!(f, "failed to persist job id on pod: {}", msg)
            }
            FailureReason::StatusUnavailable(msg) => write!(f, "job status unavailable: {}", msg),
            FailureReason::JobTerminated { job_id, comment } => match comment {
                Some(comment) => write!(f, "job {} ended without placement: {}", job_id, comment),
                None => write!(f, "job {} ended without placement", job_id),
            },
        }
    }
}

/// Outcome of one fit attempt
#[derive(Debug, Clone, PartialEq)]
pub enum PlacementDecision {
    Assigned(String),
    Pending,
    Failed(FailureReason),
}

/// Kubernetes event type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

impl EventSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSeverity::Normal => "Normal",
            EventSeverity::Warning => "Warning",
        }
    }
}

/// Informational record posted against a pod
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingEvent {
    pub reason: String,
    pub message: String,
    pub severity: EventSeverity,
    pub component: String,
    pub pod: PodRef,
}
