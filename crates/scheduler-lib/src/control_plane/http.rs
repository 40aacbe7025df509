//! `reqwest` implementation of the control plane gateway

use super::config::ControlPlaneConfig;
use super::wire::{self, PodList};
use super::{ControlPlane, PodWatch};
use crate::error::ControlPlaneError;
use crate::models::{PodRef, SchedulingEvent};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use url::Url;

const JSON: &str = "application/json";
const MERGE_PATCH: &str = "application/merge-patch+json";

/// Longest watch line accepted before the stream is abandoned
pub const DEFAULT_MAX_WATCH_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Control plane client for the core/v1 REST API
pub struct HttpControlPlane {
    client: Client,
    base_url: Url,
    config: ControlPlaneConfig,
}

impl HttpControlPlane {
    /// Create a new client. Fails on a malformed server URL or CA bundle.
    pub fn new(config: ControlPlaneConfig) -> Result<Self, ControlPlaneError> {
        let mut builder = Client::builder().connect_timeout(config.connect_timeout);

        if let Some(pem) = &config.tls.ca_cert_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| ControlPlaneError::Config(format!("invalid CA bundle: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }

        if config.tls.insecure_skip_verify {
            warn!(
                api_server = %config.api_server,
                "TLS certificate verification is disabled for the API server"
            );
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| ControlPlaneError::Config(format!("failed to build HTTP client: {}", e)))?;

        let base_url = Url::parse(&config.api_server).map_err(|e| {
            ControlPlaneError::Config(format!("invalid API server URL {:?}: {}", config.api_server, e))
        })?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    pub fn config(&self) -> &ControlPlaneConfig {
        &self.config
    }

    fn url(&self, path: &str) -> Result<Url, ControlPlaneError> {
        self.base_url
            .join(path)
            .map_err(|e| ControlPlaneError::Config(format!("invalid request path {:?}: {}", path, e)))
    }

    fn pods_url(&self, namespace: &str) -> Result<Url, ControlPlaneError> {
        self.url(&format!("/api/v1/namespaces/{}/pods", namespace))
    }

    fn pod_url(&self, pod: &PodRef, suffix: &str) -> Result<Url, ControlPlaneError> {
        self.url(&format!(
            "/api/v1/namespaces/{}/pods/{}{}",
            self.namespace_of(pod),
            pod.name,
            suffix
        ))
    }

    /// Pods carry their own namespace; the configured one fills the gap
    fn namespace_of<'a>(&'a self, pod: &'a PodRef) -> &'a str {
        if pod.namespace.is_empty() {
            &self.config.namespace
        } else {
            &pod.namespace
        }
    }

    /// Send a request with credentials attached and require a 2xx answer
    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
        expected: Option<StatusCode>,
    ) -> Result<Response, ControlPlaneError> {
        let request = match self.config.credentials.bearer_token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|source| ControlPlaneError::Transport { operation, source })?;

        let status = response.status();
        let accepted = match expected {
            Some(code) => status == code,
            None => status.is_success(),
        };

        if !accepted {
            let body = response.text().await.unwrap_or_default();
            return Err(ControlPlaneError::Status {
                operation,
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn list_unscheduled(&self) -> Result<Vec<PodRef>, ControlPlaneError> {
        let mut url = self.pods_url(&self.config.namespace)?;
        url.query_pairs_mut()
            .append_pair("fieldSelector", &self.config.field_selector());

        let request = self
            .client
            .get(url)
            .header(ACCEPT, JSON)
            .timeout(self.config.request_timeout);
        let response = self.send("list pods", request, None).await?;

        let body = response
            .bytes()
            .await
            .map_err(|source| ControlPlaneError::Transport {
                operation: "list pods",
                source,
            })?;
        let list: PodList = serde_json::from_slice(&body).map_err(|source| ControlPlaneError::Decode {
            what: "pod list",
            source,
        })?;

        let mut pods = Vec::with_capacity(list.items.len());
        for pod in list.items {
            if wire::is_assigned(&pod) {
                continue;
            }
            match wire::pod_ref_from(pod) {
                Ok(pod) => pods.push(pod),
                Err(e) => warn!(error = %e, "Skipping malformed pod in list"),
            }
        }

        debug!(count = pods.len(), "Listed unscheduled pods");
        Ok(pods)
    }

    async fn watch_unscheduled(&self) -> Result<Box<dyn PodWatch>, ControlPlaneError> {
        let mut url = self.pods_url(&self.config.namespace)?;
        url.query_pairs_mut()
            .append_pair("watch", "true")
            .append_pair("fieldSelector", &self.config.field_selector())
            .append_pair("sort", "creationTimestamp asc");

        // Watches stay open indefinitely; only the connect timeout applies.
        let request = self.client.get(url).header(ACCEPT, JSON);
        let response = self.send("watch pods", request, None).await?;

        debug!("Opened pod watch");
        Ok(Box::new(HttpPodWatch::new(response)))
    }

    async fn patch_annotations(
        &self,
        pod: &PodRef,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ControlPlaneError> {
        let url = self.pod_url(pod, "")?;
        let body = serde_json::json!({ "metadata": { "annotations": annotations } });

        let request = self
            .client
            .patch(url)
            .header(CONTENT_TYPE, MERGE_PATCH)
            .header(ACCEPT, JSON)
            .body(body.to_string())
            .timeout(self.config.request_timeout);
        self.send("patch pod", request, None).await?;

        debug!(pod = %pod, "Patched pod annotations");
        Ok(())
    }

    async fn bind(&self, pod: &PodRef, node: &str) -> Result<(), ControlPlaneError> {
        let url = self.pod_url(pod, "/binding")?;
        let binding = wire::binding_object(pod, self.namespace_of(pod), node);

        let request = self
            .client
            .post(url)
            .header(ACCEPT, JSON)
            .json(&binding)
            .timeout(self.config.request_timeout);
        self.send("bind pod", request, Some(StatusCode::CREATED)).await?;

        debug!(pod = %pod, node = %node, "Bound pod");
        Ok(())
    }

    async fn post_event(&self, event: &SchedulingEvent) -> Result<(), ControlPlaneError> {
        let namespace = self.namespace_of(&event.pod);
        let url = self.url(&format!("/api/v1/namespaces/{}/events", namespace))?;
        let object = wire::event_object(event, namespace, chrono::Utc::now());

        let request = self
            .client
            .post(url)
            .header(ACCEPT, JSON)
            .json(&object)
            .timeout(self.config.request_timeout);
        self.send("post event", request, None).await?;

        debug!(pod = %event.pod, reason = %event.reason, "Posted event");
        Ok(())
    }
}

/// Newline-delimited watch stream over an open response
pub struct HttpPodWatch {
    response: Response,
    buffer: Vec<u8>,
    max_line_bytes: usize,
    finished: bool,
}

impl HttpPodWatch {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            buffer: Vec::new(),
            max_line_bytes: DEFAULT_MAX_WATCH_LINE_BYTES,
            finished: false,
        }
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// Remove and return the next complete line from the buffer
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = self.buffer.iter().position(|b| *b == b'\n')?;
        Some(self.buffer.drain(..=end).collect())
    }
}

#[async_trait]
impl PodWatch for HttpPodWatch {
    async fn next_added(&mut self) -> Result<Option<PodRef>, ControlPlaneError> {
        loop {
            while let Some(line) = self.take_line() {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                if let Some(pod) = wire::decode_watch_line(&line)? {
                    return Ok(Some(pod));
                }
            }

            // The buffer now holds at most one partial line.
            if self.buffer.len() > self.max_line_bytes {
                return Err(ControlPlaneError::Decode {
                    what: "watch line",
                    source: serde::de::Error::custom(format!(
                        "no newline within {} bytes",
                        self.max_line_bytes
                    )),
                });
            }

            if self.finished {
                return Ok(None);
            }

            let chunk = self
                .response
                .chunk()
                .await
                .map_err(|source| ControlPlaneError::Transport {
                    operation: "watch pods",
                    source,
                })?;

            match chunk {
                Some(bytes) => self.buffer.extend_from_slice(&bytes),
                None => {
                    // Decode whatever the server sent without a final newline.
                    self.finished = true;
                    if !self.buffer.is_empty() {
                        self.buffer.push(b'\n');
                    }
                }
            }
        }
    }
}
