//! Pod sources feeding the coordinator
//!
//! Two sources run side by side:
//! - [`WatchFeed`] streams pod additions and reacts within moments
//! - [`SweepLoop`] periodically lists every unscheduled pod, catching
//!   whatever the watch missed and re-checking pods still pending

mod sweep;
mod watch;

pub use sweep::{SweepLoop, SweepResults, DEFAULT_SWEEP_INTERVAL};
pub use watch::{RetryPolicy, WatchFeed};

use crate::coordinator::ScheduleOutcome;
use crate::error::SchedulingError;
use tracing::{debug, warn};

/// Log the result of a triggered attempt
fn log_outcome(pod: &str, result: &Result<ScheduleOutcome, SchedulingError>) {
    match result {
        Ok(ScheduleOutcome::Bound(node)) => debug!(pod = %pod, node = %node, "Attempt bound pod"),
        Ok(ScheduleOutcome::Pending) => debug!(pod = %pod, "Pod waiting for placement"),
        Ok(ScheduleOutcome::Failed(reason)) => {
            debug!(pod = %pod, reason = reason.label(), "Attempt failed")
        }
        Ok(ScheduleOutcome::Skipped(reason)) => debug!(pod = %pod, reason = ?reason, "Pod skipped"),
        Err(e) => warn!(pod = %pod, error = %e, "Scheduling attempt abandoned"),
    }
}
