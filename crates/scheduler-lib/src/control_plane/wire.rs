//! Conversions between Kubernetes API objects and scheduler models

use crate::error::ControlPlaneError;
use crate::models::{ContainerRequests, PodRef, SchedulingEvent};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Binding, Event, EventSource, ObjectReference, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use serde::Deserialize;

/// Body of a pod list response. Only the items are needed.
#[derive(Debug, Deserialize)]
pub(crate) struct PodList {
    #[serde(default)]
    pub items: Vec<Pod>,
}

/// One line of a watch response
#[derive(Debug, Deserialize)]
struct WatchFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    object: serde_json::Value,
}

/// Whether the pod already carries a node assignment
pub(crate) fn is_assigned(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.node_name.as_deref())
        .map_or(false, |node| !node.is_empty())
}

/// Convert an API pod into the snapshot the scheduler works on
pub fn pod_ref_from(pod: Pod) -> Result<PodRef, ControlPlaneError> {
    let metadata = pod.metadata;
    let name = metadata
        .name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ControlPlaneError::InvalidPod("missing metadata.name".to_string()))?;

    let containers = pod
        .spec
        .map(|spec| {
            spec.containers
                .into_iter()
                .map(|container| ContainerRequests {
                    name: container.name,
                    requests: container
                        .resources
                        .and_then(|resources| resources.requests)
                        .unwrap_or_default()
                        .into_iter()
                        .map(|(kind, quantity)| (kind, quantity.0))
                        .collect(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(PodRef {
        name,
        namespace: metadata.namespace.unwrap_or_default(),
        uid: metadata.uid.unwrap_or_default(),
        created_at: metadata.creation_timestamp.map(|time| time.0),
        containers,
        annotations: metadata.annotations.unwrap_or_default(),
        terminating: metadata.deletion_timestamp.is_some(),
    })
}

/// Decode one watch line, returning the pod for `ADDED` frames.
///
/// `ERROR` frames end the stream as an error; other frame types are skipped.
pub(crate) fn decode_watch_line(line: &[u8]) -> Result<Option<PodRef>, ControlPlaneError> {
    let frame: WatchFrame = serde_json::from_slice(line).map_err(|source| ControlPlaneError::Decode {
        what: "watch event",
        source,
    })?;

    match frame.kind.as_str() {
        "ADDED" => {
            let pod: Pod = serde_json::from_value(frame.object)
                .map_err(|source| ControlPlaneError::Decode { what: "pod", source })?;
            if is_assigned(&pod) {
                return Ok(None);
            }
            pod_ref_from(pod).map(Some)
        }
        "ERROR" => {
            let message = frame
                .object
                .get("message")
                .and_then(|message| message.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| frame.object.to_string());
            Err(ControlPlaneError::WatchError(message))
        }
        _ => Ok(None),
    }
}

/// Binding of `pod` to `node`
pub(crate) fn binding_object(pod: &PodRef, namespace: &str, node: &str) -> Binding {
    Binding {
        metadata: ObjectMeta {
            name: Some(pod.name.clone()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        target: ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Node".to_string()),
            name: Some(node.to_string()),
            ..Default::default()
        },
    }
}

/// Event object for `event`, timestamped `now`
pub(crate) fn event_object(event: &SchedulingEvent, namespace: &str, now: DateTime<Utc>) -> Event {
    let pod = &event.pod;
    Event {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-", pod.name)),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        involved_object: ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Pod".to_string()),
            name: Some(pod.name.clone()),
            namespace: Some(namespace.to_string()),
            uid: Some(pod.uid.clone()).filter(|uid| !uid.is_empty()),
            ..Default::default()
        },
        reason: Some(event.reason.clone()),
        message: Some(event.message.clone()),
        type_: Some(event.severity.as_str().to_string()),
        count: Some(1),
        first_timestamp: Some(Time(now)),
        last_timestamp: Some(Time(now)),
        source: Some(EventSource {
            component: Some(event.component.clone()),
            host: None,
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventSeverity;
    use serde_json::json;

    fn pod_json(name: &str, node_name: Option<&str>) -> serde_json::Value {
        let mut spec = json!({
            "containers": [
                {"name": "app", "resources": {"requests": {"cpu": "500m", "memory": "512Mi"}}},
                {"name": "sidecar"}
            ]
        });
        if let Some(node) = node_name {
            spec["nodeName"] = json!(node);
        }
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": name,
                "namespace": "batch",
                "uid": "0b1c",
                "creationTimestamp": "2024-03-05T10:00:00Z",
                "annotations": {"JobID": "12.pbs"}
            },
            "spec": spec
        })
    }

    #[test]
    fn test_pod_ref_from_api_pod() {
        let pod: Pod = serde_json::from_value(pod_json("p1", None)).unwrap();
        let pod = pod_ref_from(pod).unwrap();

        assert_eq!(pod.name, "p1");
        assert_eq!(pod.namespace, "batch");
        assert_eq!(pod.uid, "0b1c");
        assert_eq!(pod.job_id(), Some("12.pbs"));
        assert!(pod.created_at.is_some());
        assert!(!pod.terminating);
        assert_eq!(pod.containers.len(), 2);
        assert_eq!(pod.containers[0].requests["cpu"], "500m");
        assert_eq!(pod.containers[0].requests["memory"], "512Mi");
        assert!(pod.containers[1].requests.is_empty());
    }

    #[test]
    fn test_pod_without_name_is_invalid() {
        let pod = Pod::default();
        assert!(matches!(
            pod_ref_from(pod),
            Err(ControlPlaneError::InvalidPod(_))
        ));
    }

    #[test]
    fn test_decode_added_frame() {
        let line = json!({"type": "ADDED", "object": pod_json("p1", None)}).to_string();
        let pod = decode_watch_line(line.as_bytes()).unwrap().unwrap();
        assert_eq!(pod.name, "p1");
    }

    #[test]
    fn test_decode_skips_non_added_frames() {
        for kind in ["MODIFIED", "DELETED", "BOOKMARK"] {
            let line = json!({"type": kind, "object": pod_json("p1", None)}).to_string();
            assert_eq!(decode_watch_line(line.as_bytes()).unwrap(), None);
        }
    }

    #[test]
    fn test_decode_skips_assigned_pods() {
        let line = json!({"type": "ADDED", "object": pod_json("p1", Some("node7"))}).to_string();
        assert_eq!(decode_watch_line(line.as_bytes()).unwrap(), None);
    }

    #[test]
    fn test_decode_error_frame() {
        let line = json!({
            "type": "ERROR",
            "object": {"kind": "Status", "apiVersion": "v1", "message": "too old resource version", "code": 410}
        })
        .to_string();
        match decode_watch_line(line.as_bytes()) {
            Err(ControlPlaneError::WatchError(message)) => {
                assert_eq!(message, "too old resource version")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_decode_malformed_line() {
        assert!(matches!(
            decode_watch_line(b"{\"type\": \"ADDED\", \"object\": "),
            Err(ControlPlaneError::Decode { .. })
        ));
    }

    #[test]
    fn test_event_object() {
        let pod: Pod = serde_json::from_value(pod_json("p1", None)).unwrap();
        let event = SchedulingEvent {
            reason: "Scheduled".to_string(),
            message: "Successfully assigned p1 to node7".to_string(),
            severity: EventSeverity::Normal,
            component: "pbs-scheduler".to_string(),
            pod: pod_ref_from(pod).unwrap(),
        };

        let value = serde_json::to_value(event_object(&event, "batch", Utc::now())).unwrap();
        assert_eq!(value["kind"], "Event");
        assert_eq!(value["metadata"]["generateName"], "p1-");
        assert_eq!(value["reason"], "Scheduled");
        assert_eq!(value["type"], "Normal");
        assert_eq!(value["count"], 1);
        assert_eq!(value["source"]["component"], "pbs-scheduler");
        assert_eq!(value["involvedObject"]["kind"], "Pod");
        assert_eq!(value["involvedObject"]["name"], "p1");
        assert_eq!(value["involvedObject"]["namespace"], "batch");
        assert_eq!(value["involvedObject"]["uid"], "0b1c");
        assert!(value["firstTimestamp"].is_string());
    }

    #[test]
    fn test_binding_object() {
        let pod: Pod = serde_json::from_value(pod_json("p1", None)).unwrap();
        let pod = pod_ref_from(pod).unwrap();

        let value = serde_json::to_value(binding_object(&pod, "batch", "node7")).unwrap();
        assert_eq!(value["kind"], "Binding");
        assert_eq!(value["apiVersion"], "v1");
        assert_eq!(value["metadata"]["name"], "p1");
        assert_eq!(value["target"]["kind"], "Node");
        assert_eq!(value["target"]["name"], "node7");
    }
}
