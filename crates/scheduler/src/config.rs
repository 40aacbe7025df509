//! Scheduler configuration
//!
//! Values come from an optional file named by `PBS_SCHEDULER_CONFIG`,
//! overridden by `PBS_SCHEDULER_*` environment variables. Every field has a
//! default, so an empty environment yields the anonymous `kubectl proxy`
//! setup on `127.0.0.1:8001`.

use anyhow::{Context, Result};
use scheduler_lib::{ControlPlaneConfig, Credentials, FitConfig, PbsConfig, RetryPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the optional configuration file
pub const CONFIG_FILE_ENV: &str = "PBS_SCHEDULER_CONFIG";

const ENV_PREFIX: &str = "PBS_SCHEDULER";

/// Scheduler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// API server base URL, ignored when `in_cluster` is set
    #[serde(default = "default_api_server")]
    pub api_server: String,

    /// Namespace to watch and sweep
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Use the pod's service account and `KUBERNETES_SERVICE_*` variables
    #[serde(default)]
    pub in_cluster: bool,

    /// Static bearer token
    #[serde(default)]
    pub token: Option<String>,

    /// File holding a bearer token, re-read on every request
    #[serde(default)]
    pub token_file: Option<PathBuf>,

    /// Extra CA bundle (PEM) to trust for the API server
    #[serde(default)]
    pub ca_cert_file: Option<PathBuf>,

    /// Accept any API server certificate
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,

    /// Only handle pods with this `spec.schedulerName`
    #[serde(default)]
    pub scheduler_name: Option<String>,

    /// Source component reported on events
    #[serde(default = "default_event_component")]
    pub event_component: String,

    #[serde(default = "default_qsub_path")]
    pub qsub_path: PathBuf,

    #[serde(default = "default_qstat_path")]
    pub qstat_path: PathBuf,

    /// Wrapper script submitted for every pod
    #[serde(default = "default_job_script")]
    pub job_script: String,

    /// Query finished jobs too (`qstat -x`)
    #[serde(default)]
    pub include_history: bool,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_watch_retry_delay")]
    pub watch_retry_delay_secs: u64,

    #[serde(default = "default_watch_retry_max_delay")]
    pub watch_retry_max_delay_secs: u64,

    #[serde(default = "default_watch_retry_multiplier")]
    pub watch_retry_multiplier: u32,

    /// Stop the watch after this many consecutive failures
    #[serde(default)]
    pub watch_max_attempts: Option<u32>,

    /// Pause after submitting a job before its first status query
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,

    /// PBS sub-state of a job running on its execution host
    #[serde(default = "default_placed_substate")]
    pub placed_substate: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Pods resolved at the same time
    #[serde(default = "default_max_concurrent_pods")]
    pub max_concurrent_pods: usize,

    /// Window for suppressing repeated failure events, 0 disables it
    #[serde(default = "default_event_dedup_window")]
    pub event_dedup_window_secs: u64,

    /// Consecutive failures that mark a component unhealthy
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_api_server() -> String {
    "http://127.0.0.1:8001".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_event_component() -> String {
    scheduler_lib::events::DEFAULT_COMPONENT.to_string()
}

fn default_qsub_path() -> PathBuf {
    PbsConfig::default().qsub_path
}

fn default_qstat_path() -> PathBuf {
    PbsConfig::default().qstat_path
}

fn default_job_script() -> String {
    PbsConfig::default().job_script
}

fn default_sweep_interval() -> u64 {
    20
}

fn default_watch_retry_delay() -> u64 {
    5
}

fn default_watch_retry_max_delay() -> u64 {
    300
}

fn default_watch_retry_multiplier() -> u32 {
    1
}

fn default_settle_delay() -> u64 {
    5
}

fn default_placed_substate() -> String {
    scheduler_lib::fit::DEFAULT_PLACED_SUBSTATE.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    30
}

fn default_max_concurrent_pods() -> usize {
    scheduler_lib::coordinator::DEFAULT_MAX_CONCURRENT_PODS
}

fn default_event_dedup_window() -> u64 {
    15 * 60
}

fn default_unhealthy_threshold() -> u32 {
    scheduler_lib::health::DEFAULT_UNHEALTHY_THRESHOLD
}

fn default_api_port() -> u16 {
    8080
}

impl SchedulerConfig {
    /// Load configuration from the environment and the optional config file
    pub fn load() -> Result<Self> {
        let file = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
        Self::load_from(file.as_deref(), config::Environment::with_prefix(ENV_PREFIX))
    }

    fn load_from(file: Option<&Path>, environment: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(environment.try_parsing(true))
            .build()
            .context("Failed to read configuration sources")?;

        config
            .try_deserialize()
            .context("Invalid scheduler configuration")
    }

    /// Settings for the API server client
    pub fn control_plane_config(&self) -> Result<ControlPlaneConfig> {
        let mut control_plane = if self.in_cluster {
            ControlPlaneConfig::in_cluster(self.namespace.clone())
                .context("Failed to derive in-cluster API server settings")?
        } else {
            ControlPlaneConfig {
                api_server: self.api_server.clone(),
                namespace: self.namespace.clone(),
                ..Default::default()
            }
        };

        if let Some(token) = &self.token {
            control_plane.credentials = Credentials::BearerToken(token.clone());
        } else if let Some(path) = &self.token_file {
            control_plane.credentials = Credentials::TokenFile(path.clone());
        }

        if let Some(path) = &self.ca_cert_file {
            let pem = std::fs::read(path)
                .with_context(|| format!("Failed to read CA bundle {}", path.display()))?;
            control_plane.tls.ca_cert_pem = Some(pem);
        }

        control_plane.tls.insecure_skip_verify = self.insecure_skip_tls_verify;
        control_plane.scheduler_name = self.scheduler_name.clone().filter(|name| !name.is_empty());
        control_plane.request_timeout = Duration::from_secs(self.request_timeout_secs);
        control_plane.connect_timeout = Duration::from_secs(self.connect_timeout_secs);

        Ok(control_plane)
    }

    pub fn pbs_config(&self) -> PbsConfig {
        PbsConfig {
            qsub_path: self.qsub_path.clone(),
            qstat_path: self.qstat_path.clone(),
            job_script: self.job_script.clone(),
            include_history: self.include_history,
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            ..Default::default()
        }
    }

    pub fn fit_config(&self) -> FitConfig {
        FitConfig {
            settle_delay: Duration::from_secs(self.settle_delay_secs),
            placed_substate: self.placed_substate.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_secs(self.watch_retry_delay_secs),
            multiplier: self.watch_retry_multiplier,
            max_delay: Duration::from_secs(self.watch_retry_max_delay_secs),
            max_attempts: self.watch_max_attempts,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn event_dedup_window(&self) -> Duration {
        Duration::from_secs(self.event_dedup_window_secs)
    }
}
