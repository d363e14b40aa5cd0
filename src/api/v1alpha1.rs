// src/api/v1alpha1.rs
//
// Oldest supported wire schema. Kept only so existing documents can still
// be read; conversion to the internal form rewrites its removed fields,
// and downgrading back to this version is not supported.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const VERSION: &str = "v1alpha1";
pub const MASTER_CONFIGURATION_KIND: &str = "MasterConfiguration";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MasterConfiguration {
    pub api: Api,
    pub etcd: Etcd,
    pub networking: Networking,
    pub kubernetes_version: String,
    /// Removed in later versions; converted into `cloud-provider` extra
    /// args for the apiserver and controller manager.
    pub cloud_provider: String,
    /// Removed in later versions; a non-default list is converted into an
    /// `authorization-mode` extra arg for the apiserver.
    pub authorization_modes: Vec<String>,
    pub node_name: String,
    pub token: String,
    pub api_server_extra_args: BTreeMap<String, String>,
    pub controller_manager_extra_args: BTreeMap<String, String>,
    pub scheduler_extra_args: BTreeMap<String, String>,
    pub api_server_cert_sans: Vec<String>,
    pub certificates_dir: String,
    pub image_repository: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Api {
    pub advertise_address: String,
    pub bind_port: u16,
}

/// Flat etcd shape: a nonempty `endpoints` list means externally managed
/// etcd, otherwise the remaining fields describe the local instance.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Etcd {
    pub endpoints: Vec<String>,
    pub ca_file: String,
    pub cert_file: String,
    pub key_file: String,
    pub data_dir: String,
    pub extra_args: BTreeMap<String, String>,
    pub server_cert_sans: Vec<String>,
    pub peer_cert_sans: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Networking {
    pub service_subnet: String,
    pub pod_subnet: String,
    pub dns_domain: String,
}
