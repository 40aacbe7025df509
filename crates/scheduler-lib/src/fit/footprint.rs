//! Aggregate resource footprint of a pod
//!
//! CPU requests are read as integer millicores after stripping a trailing
//! `m`. Memory requests only count when expressed in `Mi`; requests in any
//! other unit contribute nothing.

use crate::error::FootprintError;
use crate::models::{PodRef, ResourceFootprint};

const CPU: &str = "cpu";
const MEMORY: &str = "memory";
const MEBIBYTE_SUFFIX: &str = "Mi";

/// Sum the CPU and memory requests across all containers of `pod`
pub fn compute_footprint(pod: &PodRef) -> Result<ResourceFootprint, FootprintError> {
    let mut footprint = ResourceFootprint::default();

    for container in &pod.containers {
        if let Some(value) = container.requests.get(CPU) {
            let millis = parse_cpu_millis(value).ok_or_else(|| FootprintError::InvalidCpu {
                container: container.name.clone(),
                value: value.clone(),
            })?;
            footprint.cpu_millis = footprint
                .cpu_millis
                .checked_add(millis)
                .ok_or(FootprintError::Overflow)?;
        }

        if let Some(value) = container.requests.get(MEMORY) {
            if let Some(amount) = value.strip_suffix(MEBIBYTE_SUFFIX) {
                let mb = amount
                    .parse::<u64>()
                    .map_err(|_| FootprintError::InvalidMemory {
                        container: container.name.clone(),
                        value: value.clone(),
                    })?;
                footprint.memory_mb = footprint
                    .memory_mb
                    .checked_add(mb)
                    .ok_or(FootprintError::Overflow)?;
            }
        }
    }

    Ok(footprint)
}

fn parse_cpu_millis(value: &str) -> Option<u64> {
    value.strip_suffix('m').unwrap_or(value).parse().ok()
}
