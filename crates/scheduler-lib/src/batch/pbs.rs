//! PBS command line gateway
//!
//! Every invocation runs as a child process under a timeout and is killed
//! if the timeout elapses, so a hung `qstat` cannot pin a pod claim.

use super::{qstat, BatchScheduler};
use crate::error::BatchError;
use crate::models::{JobRecord, ResourceFootprint};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Marker PBS prints on stderr when a job id is not (or no longer) known
const UNKNOWN_JOB_MARKER: &str = "Unknown Job Id";

/// Marker PBS prints on stderr for a finished job queried without `-x`
const FINISHED_JOB_MARKER: &str = "Job has finished";

/// Configuration for the PBS command line tools
#[derive(Debug, Clone)]
pub struct PbsConfig {
    /// Path to `qsub`
    pub qsub_path: PathBuf,
    /// Path to `qstat`
    pub qstat_path: PathBuf,
    /// Wrapper script submitted for every pod
    pub job_script: String,
    /// Environment variable carrying the pod name into the job
    pub pod_env_var: String,
    /// Pass `-x` to `qstat` so finished jobs stay visible
    pub include_history: bool,
    /// Upper bound for a single command
    pub command_timeout: Duration,
}

impl Default for PbsConfig {
    fn default() -> Self {
        Self {
            qsub_path: PathBuf::from("/opt/pbs/bin/qsub"),
            qstat_path: PathBuf::from("/opt/pbs/bin/qstat"),
            job_script: "kubernetes_job.sh".to_string(),
            pod_env_var: "PODNAME".to_string(),
            include_history: false,
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// [`BatchScheduler`] backed by `qsub` and `qstat`
pub struct PbsCli {
    config: PbsConfig,
}

impl PbsCli {
    pub fn new(config: PbsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PbsConfig {
        &self.config
    }

    /// Resource selection statement for `qsub -l`
    pub fn selection(footprint: &ResourceFootprint) -> String {
        format!(
            "select=1:ncpus={}:mem={}MB",
            footprint.cpu_millis, footprint.memory_mb
        )
    }

    /// Arguments passed to `qsub` for a pod
    pub fn submit_args(&self, name: &str, footprint: &ResourceFootprint) -> Vec<String> {
        vec![
            "-l".to_string(),
            Self::selection(footprint),
            "-N".to_string(),
            name.to_string(),
            "-v".to_string(),
            format!("{}={}", self.config.pod_env_var, name),
            self.config.job_script.clone(),
        ]
    }

    /// Arguments passed to `qstat` for a job
    pub fn status_args(&self, job_id: &str) -> Vec<String> {
        Self::qstat_args(job_id, self.config.include_history)
    }

    fn qstat_args(job_id: &str, history: bool) -> Vec<String> {
        let mut args = vec!["-f".to_string()];
        if history {
            args.push("-x".to_string());
        }
        args.push(job_id.to_string());
        args
    }

    /// Run `qstat` and map the "no such job" answers to typed errors
    async fn query(&self, job_id: &str, history: bool) -> Result<String, BatchError> {
        let args = Self::qstat_args(job_id, history);
        match self.run(&self.config.qstat_path, &args).await {
            Err(BatchError::NonZeroExit { stderr, .. }) if stderr.contains(UNKNOWN_JOB_MARKER) => {
                Err(BatchError::UnknownJob(job_id.to_string()))
            }
            Err(BatchError::NonZeroExit { stderr, .. }) if stderr.contains(FINISHED_JOB_MARKER) => {
                Err(BatchError::FinishedJob(job_id.to_string()))
            }
            other => other,
        }
    }

    /// Run a command to completion and return its stdout
    async fn run(&self, program: &Path, args: &[String]) -> Result<String, BatchError> {
        let command = program.display().to_string();
        debug!(command = %command, args = ?args, "Running batch command");

        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);

        let output = tokio::time::timeout(self.config.command_timeout, cmd.output())
            .await
            .map_err(|_| BatchError::Timeout {
                command: command.clone(),
                timeout: self.config.command_timeout,
            })?
            .map_err(|source| BatchError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(BatchError::NonZeroExit {
                command,
                code: output.status.code(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl BatchScheduler for PbsCli {
    async fn submit(&self, name: &str, footprint: &ResourceFootprint) -> Result<String, BatchError> {
        let args = self.submit_args(name, footprint);
        let stdout = self.run(&self.config.qsub_path, &args).await?;

        let job_id = stdout.trim().to_string();
        if job_id.is_empty() {
            return Err(BatchError::EmptyJobId);
        }

        info!(
            job_id = %job_id,
            job_name = %name,
            cpu_millis = footprint.cpu_millis,
            memory_mb = footprint.memory_mb,
            "Submitted batch job"
        );
        Ok(job_id)
    }

    async fn status(&self, job_id: &str) -> Result<JobRecord, BatchError> {
        let stdout = match self.query(job_id, self.config.include_history).await {
            Ok(stdout) => stdout,
            Err(BatchError::FinishedJob(_)) if !self.config.include_history => {
                // The history record carries the final state and comment.
                debug!(job_id = %job_id, "Job has finished, reading history");
                self.query(job_id, true).await.map_err(|e| {
                    debug!(job_id = %job_id, error = %e, "Job history unavailable");
                    BatchError::FinishedJob(job_id.to_string())
                })?
            }
            Err(e) => return Err(e),
        };

        Ok(qstat::parse_job_record(job_id, &stdout))
    }
}
