//! Connection settings for the Kubernetes API server

use crate::error::ControlPlaneError;
use std::path::PathBuf;
use std::time::Duration;

/// Default location of the mounted service account token
pub const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Default location of the mounted service account CA bundle
pub const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// How requests authenticate against the API server
#[derive(Debug, Clone, PartialEq)]
pub enum Credentials {
    /// No credentials, e.g. behind `kubectl proxy`
    Anonymous,
    /// Static bearer token
    BearerToken(String),
    /// Bearer token read from a file on every request, so projected
    /// service account tokens keep working after rotation
    TokenFile(PathBuf),
}

impl Credentials {
    /// Resolve the bearer token for the next request
    pub async fn bearer_token(&self) -> Result<Option<String>, ControlPlaneError> {
        match self {
            Credentials::Anonymous => Ok(None),
            Credentials::BearerToken(token) => Ok(Some(token.clone())),
            Credentials::TokenFile(path) => {
                let token = tokio::fs::read_to_string(path).await.map_err(|source| {
                    ControlPlaneError::Credentials {
                        path: path.display().to_string(),
                        source,
                    }
                })?;
                Ok(Some(token.trim().to_string()))
            }
        }
    }
}

/// Server certificate trust settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TlsPolicy {
    /// Additional PEM-encoded CA bundle to trust
    pub ca_cert_pem: Option<Vec<u8>>,
    /// Accept any server certificate. Must be opted into explicitly.
    pub insecure_skip_verify: bool,
}

/// Configuration for [`super::HttpControlPlane`]
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    /// Base URL of the API server, e.g. `https://10.0.0.1:6443`
    pub api_server: String,
    /// Namespace to list and watch, and the fallback for per-pod calls
    pub namespace: String,
    pub credentials: Credentials,
    pub tls: TlsPolicy,
    /// Only handle pods requesting this scheduler via `spec.schedulerName`
    pub scheduler_name: Option<String>,
    /// Timeout for list, patch, bind and event calls
    pub request_timeout: Duration,
    /// Timeout for establishing a connection, watches included
    pub connect_timeout: Duration,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            api_server: "http://127.0.0.1:8001".to_string(),
            namespace: "default".to_string(),
            credentials: Credentials::Anonymous,
            tls: TlsPolicy::default(),
            scheduler_name: None,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ControlPlaneConfig {
    /// Configuration for running inside a pod with a mounted service account
    pub fn in_cluster(namespace: impl Into<String>) -> Result<Self, ControlPlaneError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| ControlPlaneError::Config("KUBERNETES_SERVICE_HOST is not set".into()))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".into());

        let ca_cert_pem = std::fs::read(SERVICE_ACCOUNT_CA).ok();

        Ok(Self {
            api_server: format!("https://{}", join_host_port(&host, &port)),
            namespace: namespace.into(),
            credentials: Credentials::TokenFile(PathBuf::from(SERVICE_ACCOUNT_TOKEN)),
            tls: TlsPolicy {
                ca_cert_pem,
                insecure_skip_verify: false,
            },
            ..Default::default()
        })
    }

    /// Field selector matching pods this scheduler is responsible for
    pub fn field_selector(&self) -> String {
        match &self.scheduler_name {
            Some(name) => format!("spec.nodeName=,spec.schedulerName={}", name),
            None => "spec.nodeName=".to_string(),
        }
    }
}

fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
