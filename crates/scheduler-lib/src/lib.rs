//! Scheduler library bridging Kubernetes pods to a PBS batch scheduler
//!
//! This crate provides the core functionality for:
//! - Discovering unscheduled pods through a watch and a periodic sweep
//! - Submitting one PBS job per pod and interpreting its status
//! - Binding placed pods and reporting scheduling events
//! - Health checks and observability

pub mod batch;
pub mod control_plane;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod fit;
pub mod health;
pub mod models;
pub mod observability;
pub mod source;

pub use batch::{BatchScheduler, PbsCli, PbsConfig};
pub use control_plane::{ControlPlane, ControlPlaneConfig, Credentials, HttpControlPlane, TlsPolicy};
pub use coordinator::{ScheduleOutcome, SchedulingCoordinator, SkipReason};
pub use error::{BatchError, ControlPlaneError, FootprintError, SchedulingError};
pub use events::EventRecorder;
pub use fit::{FitConfig, FitResolver};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{SchedulerMetrics, SchedulingLogger};
pub use source::{RetryPolicy, SweepLoop, WatchFeed};
