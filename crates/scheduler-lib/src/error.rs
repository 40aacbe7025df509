//! Error types for the scheduler gateways and control loop

use std::time::Duration;
use thiserror::Error;

/// Failures talking to the PBS command line tools
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("{command} exited with status {code:?}: {stderr}")]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("job {0} is unknown to the batch server")]
    UnknownJob(String),

    #[error("job {0} has left the batch server")]
    FinishedJob(String),

    #[error("qsub returned an empty job id")]
    EmptyJobId,
}

/// Failures talking to the Kubernetes API server
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("{operation} request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("watch stream reported an error: {0}")]
    WatchError(String),

    #[error("invalid pod object: {0}")]
    InvalidPod(String),

    #[error("failed to read credentials from {path}: {source}")]
    Credentials {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid control plane configuration: {0}")]
    Config(String),
}

impl ControlPlaneError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ControlPlaneError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Invalid container resource requests
#[derive(Debug, Error, PartialEq)]
pub enum FootprintError {
    #[error("container {container}: cpu request {value:?} is not an integer millicore value")]
    InvalidCpu { container: String, value: String },

    #[error("container {container}: memory request {value:?} is not an integer Mi value")]
    InvalidMemory { container: String, value: String },

    #[error("aggregate resource request overflows")]
    Overflow,
}

/// Failures that abandon a scheduling attempt after placement was decided
#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("failed to bind pod {pod} to node {node}: {source}")]
    Bind {
        pod: String,
        node: String,
        #[source]
        source: ControlPlaneError,
    },
}
