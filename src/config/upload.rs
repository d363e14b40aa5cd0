// src/config/upload.rs
//
// The cluster keeps a copy of its own configuration so later upgrade and
// join flows can recover the original intent. Only the ClusterConfiguration
// is stored; bootstrap tokens and node registration never leave the node.

use crate::api::internal::InitConfiguration;
use crate::api::scheme::{Registry, SchemeError};
use serde::Serialize;
use std::collections::BTreeMap;

pub const KUBEADM_CONFIG_CONFIGMAP: &str = "kubeadm-config";
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";
pub const CLUSTER_CONFIGURATION_KEY: &str = "ClusterConfiguration";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigMap {
    api_version: &'static str,
    kind: &'static str,
    metadata: Metadata,
    data: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct Metadata {
    name: &'static str,
    namespace: &'static str,
}

/// Render the ConfigMap document holding the secrets-stripped cluster
/// configuration at the preferred external version.
pub fn uploaded_config_map(
    cfg: &InitConfiguration,
    registry: &Registry,
) -> Result<String, SchemeError> {
    let cluster_yaml = registry.encode_cluster_configuration(&cfg.cluster)?;

    let mut data = BTreeMap::new();
    data.insert(CLUSTER_CONFIGURATION_KEY.to_string(), cluster_yaml);

    serde_yaml::to_string(&ConfigMap {
        api_version: "v1",
        kind: "ConfigMap",
        metadata: Metadata {
            name: KUBEADM_CONFIG_CONFIGMAP,
            namespace: KUBE_SYSTEM_NAMESPACE,
        },
        data,
    })
    .map_err(|e| SchemeError::Encode(e.to_string()))
}
