//! Gateway to the external batch scheduler
//!
//! The batch scheduler decides where a pod runs. This module submits one job
//! per pod and reads back the job status:
//! - [`BatchScheduler`] is the seam the fit resolver talks to
//! - [`PbsCli`] drives the PBS `qsub`/`qstat` command line tools
//! - [`qstat`] turns `qstat -f` text into a [`JobRecord`]

mod pbs;
pub mod qstat;

pub use pbs::{PbsCli, PbsConfig};
pub use qstat::{parse_job_record, QstatAttributes};

use crate::error::BatchError;
use crate::models::{JobRecord, ResourceFootprint};

pub use async_trait::async_trait;

/// Operations the scheduler needs from the batch system
#[async_trait]
pub trait BatchScheduler: Send + Sync {
    /// Submit a job sized to `footprint`, returning the scheduler-assigned id
    async fn submit(&self, name: &str, footprint: &ResourceFootprint) -> Result<String, BatchError>;

    /// Query the current status of a job
    async fn status(&self, job_id: &str) -> Result<JobRecord, BatchError>;

    /// Free-text explanation the scheduler attached to the job
    async fn comment(&self, job_id: &str) -> Result<Option<String>, BatchError> {
        Ok(self.status(job_id).await?.comment)
    }
}
