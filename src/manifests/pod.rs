// src/manifests/pod.rs
//
// Just enough of the Pod schema to render static pod manifests the
// kubelet will accept. Field names follow the wire format, so this
// serializes without any mapping layer.

use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize, Debug, Clone)]
pub struct Pod {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
}

impl Pod {
    pub fn static_pod(name: &str, container: Container, volumes: Vec<Volume>) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert("component".to_string(), name.to_string());
        labels.insert("tier".to_string(), "control-plane".to_string());
        Pod {
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: "kube-system".to_string(),
                labels,
            },
            spec: PodSpec {
                containers: vec![container],
                host_network: true,
                priority_class_name: "system-node-critical".to_string(),
                volumes,
            },
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct PodSpec {
    pub containers: Vec<Container>,
    #[serde(rename = "hostNetwork")]
    pub host_network: bool,
    #[serde(rename = "priorityClassName")]
    pub priority_class_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

#[derive(Serialize, Debug, Clone)]
pub struct Container {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    #[serde(rename = "imagePullPolicy")]
    pub image_pull_policy: String,
    #[serde(rename = "livenessProbe", skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,
    #[serde(rename = "volumeMounts", skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

impl Container {
    pub fn new(name: &str, image: String, command: Vec<String>) -> Self {
        Container {
            name: name.to_string(),
            image,
            command,
            image_pull_policy: "IfNotPresent".to_string(),
            liveness_probe: None,
            volume_mounts: Vec::new(),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct Probe {
    #[serde(rename = "httpGet")]
    pub http_get: HttpGetAction,
    #[serde(rename = "initialDelaySeconds")]
    pub initial_delay_seconds: u32,
    #[serde(rename = "timeoutSeconds")]
    pub timeout_seconds: u32,
    #[serde(rename = "failureThreshold")]
    pub failure_threshold: u32,
}

impl Probe {
    pub fn http(host: &str, port: u16, path: &str, scheme: &str) -> Self {
        Probe {
            http_get: HttpGetAction {
                host: host.to_string(),
                port,
                path: path.to_string(),
                scheme: scheme.to_string(),
            },
            initial_delay_seconds: 15,
            timeout_seconds: 15,
            failure_threshold: 8,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct HttpGetAction {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub scheme: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct Volume {
    pub name: String,
    #[serde(rename = "hostPath")]
    pub host_path: HostPathVolumeSource,
}

#[derive(Serialize, Debug, Clone)]
pub struct HostPathVolumeSource {
    pub path: String,
    #[serde(rename = "type")]
    pub path_type: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct VolumeMount {
    pub name: String,
    #[serde(rename = "mountPath")]
    pub mount_path: String,
    #[serde(rename = "readOnly", skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

/// Pairs a host path volume with its in-container mount.
pub fn host_path_mount(name: &str, host_path: &str, mount_path: &str, read_only: bool) -> (Volume, VolumeMount) {
    (
        Volume {
            name: name.to_string(),
            host_path: HostPathVolumeSource {
                path: host_path.to_string(),
                path_type: "DirectoryOrCreate".to_string(),
            },
        },
        VolumeMount {
            name: name.to_string(),
            mount_path: mount_path.to_string(),
            read_only,
        },
    )
}
