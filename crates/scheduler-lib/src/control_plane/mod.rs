//! Gateway to the Kubernetes API server
//!
//! This module provides:
//! - The [`ControlPlane`] trait used by the coordinator, resolver and feeds
//! - [`HttpControlPlane`], a `reqwest` client speaking the core/v1 REST API
//! - Connection settings covering both anonymous plaintext access (through
//!   `kubectl proxy`) and bearer tokens over TLS

mod config;
mod http;
mod wire;

pub use config::{ControlPlaneConfig, Credentials, TlsPolicy};
pub use http::{HttpControlPlane, HttpPodWatch};
pub use wire::pod_ref_from;

use crate::error::ControlPlaneError;
use crate::models::{PodRef, SchedulingEvent};
use std::collections::BTreeMap;

pub use async_trait::async_trait;

/// An open watch on unscheduled pods
#[async_trait]
pub trait PodWatch: Send {
    /// Next pod reported as added.
    ///
    /// `Ok(None)` means the server closed the stream cleanly.
    async fn next_added(&mut self) -> Result<Option<PodRef>, ControlPlaneError>;
}

/// Operations the scheduler needs from the control plane
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// One-shot list of pods without a node assignment
    async fn list_unscheduled(&self) -> Result<Vec<PodRef>, ControlPlaneError>;

    /// Open a watch on pods without a node assignment
    async fn watch_unscheduled(&self) -> Result<Box<dyn PodWatch>, ControlPlaneError>;

    /// Merge `annotations` into the pod's metadata
    async fn patch_annotations(
        &self,
        pod: &PodRef,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ControlPlaneError>;

    /// Bind the pod to `node`
    async fn bind(&self, pod: &PodRef, node: &str) -> Result<(), ControlPlaneError>;

    /// Record an event against the pod
    async fn post_event(&self, event: &SchedulingEvent) -> Result<(), ControlPlaneError>;
}
