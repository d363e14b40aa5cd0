// src/config/loader.rs
//
// Builds the one canonical configuration an invocation runs with. Merge
// precedence, highest first: explicit CLI flags, the --config file, the
// cluster-stored configuration, compiled-in defaults.

use crate::api::defaults;
use crate::api::internal::{ClusterConfiguration, InitConfiguration, JoinConfiguration};
use crate::api::scheme::{GroupVersionKind, InternalDocument, Registry, SchemeError};
use crate::config::component::ComponentConfig;
use crate::types::Warning;
use serde::Deserialize;
use std::collections::HashMap;
use std::{fs, io};

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(String),
    Scheme(SchemeError),
    DuplicateDocument(GroupVersionKind),
    UnexpectedDocument { found: String, context: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "cannot read configuration: {}", e),
            Self::Parse(msg) => write!(f, "malformed configuration: {}", msg),
            Self::Scheme(e) => write!(f, "{}", e),
            Self::DuplicateDocument(gvk) => {
                write!(f, "configuration contains {} more than once", gvk)
            }
            Self::UnexpectedDocument { found, context } => {
                write!(f, "unexpected document {} {}", found, context)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(error: io::Error) -> Self {
        ConfigError::Io(error)
    }
}

impl From<SchemeError> for ConfigError {
    fn from(error: SchemeError) -> Self {
        ConfigError::Scheme(error)
    }
}

/// CLI flag values; `None` means the flag was not given. Flags always win
/// over every other source.
#[derive(Debug, Default, Clone)]
pub struct InitOverrides {
    pub kubernetes_version: Option<String>,
    pub advertise_address: Option<String>,
    pub bind_port: Option<u16>,
    pub service_subnet: Option<String>,
    pub pod_subnet: Option<String>,
    pub dns_domain: Option<String>,
    pub node_name: Option<String>,
    pub certificates_dir: Option<String>,
    pub control_plane_endpoint: Option<String>,
    pub image_repository: Option<String>,
}

/// Where a previously uploaded cluster configuration can be recovered from.
/// Talking to a live apiserver is a collaborator concern; the pipeline only
/// sees the stored YAML.
pub trait ClusterConfigSource {
    fn stored_cluster_configuration(&self) -> io::Result<Option<String>>;
}

pub struct NoClusterSource;

impl ClusterConfigSource for NoClusterSource {
    fn stored_cluster_configuration(&self) -> io::Result<Option<String>> {
        Ok(None)
    }
}

/// Reads the stored configuration from a file, as written by the
/// upload-config phase.
pub struct FileClusterSource {
    pub path: String,
}

impl ClusterConfigSource for FileClusterSource {
    fn stored_cluster_configuration(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug)]
pub struct LoadedInit {
    pub config: InitConfiguration,
    pub component_configs: Vec<ComponentConfig>,
    pub warnings: Vec<Warning>,
}

/// Split a possibly multi-document YAML string into (GVK, document) pairs,
/// rejecting duplicates. Documents without type meta are a structural error.
pub fn split_documents(
    contents: &str,
) -> Result<Vec<(GroupVersionKind, serde_yaml::Value)>, ConfigError> {
    let mut documents = Vec::new();
    let mut seen: HashMap<GroupVersionKind, ()> = HashMap::new();

    for deserializer in serde_yaml::Deserializer::from_str(contents) {
        let value = serde_yaml::Value::deserialize(deserializer)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        if value.is_null() {
            continue;
        }
        let gvk = Registry::type_meta_of(&value)?;
        if seen.insert(gvk.clone(), ()).is_some() {
            return Err(ConfigError::DuplicateDocument(gvk));
        }
        documents.push((gvk, value));
    }

    Ok(documents)
}

pub fn load_init_configuration(
    config_path: Option<&str>,
    overrides: &InitOverrides,
    cluster_source: &dyn ClusterConfigSource,
    registry: &Registry,
) -> Result<LoadedInit, ConfigError> {
    let mut warnings = Vec::new();
    let mut component_configs = Vec::new();

    let mut init = match config_path {
        Some(path) => {
            let expanded = shellexpand::tilde(path).to_string();
            let contents = fs::read_to_string(&expanded)?;
            let documents = split_documents(&contents)?;

            let kubeadm_present = documents
                .iter()
                .any(|(gvk, _)| gvk.group == crate::api::scheme::KUBEADM_GROUP);

            if kubeadm_present {
                decode_init_documents(documents, registry, &mut component_configs, &mut warnings)?
            } else {
                // Component-config-only input: the kubeadm intent comes from
                // the cluster-stored configuration.
                for (gvk, value) in documents {
                    sort_component_document(gvk, value, &mut component_configs, &mut warnings);
                }
                init_from_cluster_source(cluster_source, registry, &mut warnings)?
            }
        }
        None => init_from_cluster_source(cluster_source, registry, &mut warnings)?,
    };

    apply_init_overrides(&mut init, overrides);
    defaults::apply_init_defaults(&mut init, &mut warnings);
    for component in &component_configs {
        component.default_and_warn(&mut warnings);
    }

    Ok(LoadedInit {
        config: init,
        component_configs,
        warnings,
    })
}

pub fn load_join_configuration(
    config_path: Option<&str>,
    registry: &Registry,
) -> Result<(JoinConfiguration, Vec<Warning>), ConfigError> {
    let mut warnings = Vec::new();
    let mut join = JoinConfiguration::default();

    if let Some(path) = config_path {
        let expanded = shellexpand::tilde(path).to_string();
        let contents = fs::read_to_string(&expanded)?;
        let mut found = false;
        for (gvk, value) in split_documents(&contents)? {
            if gvk.group != crate::api::scheme::KUBEADM_GROUP {
                warnings.push(Warning::new(
                    "UnknownDocument",
                    format!("ignoring non-kubeadm document {}", gvk),
                ));
                continue;
            }
            let (document, mut document_warnings) = registry.decode(value)?;
            warnings.append(&mut document_warnings);
            match document {
                InternalDocument::Join(j) => {
                    join = j;
                    found = true;
                }
                other => {
                    return Err(ConfigError::UnexpectedDocument {
                        found: document_kind(&other).to_string(),
                        context: "while loading a join configuration".to_string(),
                    })
                }
            }
        }
        if !found {
            return Err(ConfigError::Parse(
                "no JoinConfiguration document found".to_string(),
            ));
        }
    }

    defaults::apply_join_defaults(&mut join, &mut warnings);
    Ok((join, warnings))
}

fn decode_init_documents(
    documents: Vec<(GroupVersionKind, serde_yaml::Value)>,
    registry: &Registry,
    component_configs: &mut Vec<ComponentConfig>,
    warnings: &mut Vec<Warning>,
) -> Result<InitConfiguration, ConfigError> {
    let mut init: Option<InitConfiguration> = None;
    let mut cluster: Option<ClusterConfiguration> = None;

    for (gvk, value) in documents {
        if gvk.group != crate::api::scheme::KUBEADM_GROUP {
            sort_component_document(gvk, value, component_configs, warnings);
            continue;
        }
        let (document, mut document_warnings) = registry.decode(value)?;
        warnings.append(&mut document_warnings);
        match document {
            InternalDocument::Init(decoded) => {
                // Legacy single-document versions carry the cluster shape
                // inside the init document; keep it unless a dedicated
                // ClusterConfiguration is also present.
                if decoded.cluster != ClusterConfiguration::default() {
                    cluster.get_or_insert(decoded.cluster.clone());
                }
                init = Some(decoded);
            }
            InternalDocument::Cluster(decoded) => cluster = Some(decoded),
            InternalDocument::Join(_) => {
                return Err(ConfigError::UnexpectedDocument {
                    found: "JoinConfiguration".to_string(),
                    context: "while loading an init configuration".to_string(),
                })
            }
        }
    }

    let mut init = init.unwrap_or_default();
    if let Some(cluster) = cluster {
        init.cluster = cluster;
    }
    Ok(init)
}

fn init_from_cluster_source(
    cluster_source: &dyn ClusterConfigSource,
    registry: &Registry,
    warnings: &mut Vec<Warning>,
) -> Result<InitConfiguration, ConfigError> {
    let mut init = InitConfiguration::default();
    if let Some(stored) = cluster_source.stored_cluster_configuration()? {
        for (gvk, value) in split_documents(&stored)? {
            if gvk.group != crate::api::scheme::KUBEADM_GROUP {
                continue;
            }
            let (document, mut document_warnings) = registry.decode(value)?;
            warnings.append(&mut document_warnings);
            if let InternalDocument::Cluster(cluster) = document {
                init.cluster = cluster;
            }
        }
    }
    Ok(init)
}

fn sort_component_document(
    gvk: GroupVersionKind,
    value: serde_yaml::Value,
    component_configs: &mut Vec<ComponentConfig>,
    warnings: &mut Vec<Warning>,
) {
    match ComponentConfig::from_document(&gvk, value) {
        Some(component) => component_configs.push(component),
        None => warnings.push(Warning::new(
            "UnknownDocument",
            format!("ignoring document with unknown type {}", gvk),
        )),
    }
}

fn apply_init_overrides(init: &mut InitConfiguration, overrides: &InitOverrides) {
    if let Some(v) = &overrides.kubernetes_version {
        init.cluster.kubernetes_version = v.clone();
    }
    if let Some(v) = &overrides.advertise_address {
        init.local_api_endpoint.advertise_address = v.clone();
    }
    if let Some(v) = overrides.bind_port {
        init.local_api_endpoint.bind_port = v;
    }
    if let Some(v) = &overrides.service_subnet {
        init.cluster.networking.service_subnet = v.clone();
    }
    if let Some(v) = &overrides.pod_subnet {
        init.cluster.networking.pod_subnet = v.clone();
    }
    if let Some(v) = &overrides.dns_domain {
        init.cluster.networking.dns_domain = v.clone();
    }
    if let Some(v) = &overrides.node_name {
        init.node_registration.name = v.clone();
    }
    if let Some(v) = &overrides.certificates_dir {
        init.cluster.certificates_dir = shellexpand::tilde(v).to_string();
    }
    if let Some(v) = &overrides.control_plane_endpoint {
        init.cluster.control_plane_endpoint = v.clone();
    }
    if let Some(v) = &overrides.image_repository {
        init.cluster.image_repository = v.clone();
    }
}

fn document_kind(document: &InternalDocument) -> &'static str {
    match document {
        InternalDocument::Init(_) => "InitConfiguration",
        InternalDocument::Cluster(_) => "ClusterConfiguration",
        InternalDocument::Join(_) => "JoinConfiguration",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::new_registry;
    use std::io::Write;

    const INIT_AND_CLUSTER: &str = "\
apiVersion: kubeadm.k8s.io/v1beta2
kind: InitConfiguration
localAPIEndpoint:
  advertiseAddress: 192.168.0.10
nodeRegistration:
  name: cp-0
---
apiVersion: kubeadm.k8s.io/v1beta2
kind: ClusterConfiguration
kubernetesVersion: v1.19.0
networking:
  podSubnet: 10.244.0.0/16
";

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn multi_document_file_merges_init_and_cluster() {
        let file = write_config(INIT_AND_CLUSTER);
        let registry = new_registry();
        let loaded = load_init_configuration(
            Some(file.path().to_str().unwrap()),
            &InitOverrides::default(),
            &NoClusterSource,
            &registry,
        )
        .unwrap();

        assert_eq!(loaded.config.node_registration.name, "cp-0");
        assert_eq!(loaded.config.cluster.kubernetes_version, "v1.19.0");
        assert_eq!(loaded.config.cluster.networking.pod_subnet, "10.244.0.0/16");
        // Defaults filled the gaps the file left.
        assert_eq!(
            loaded.config.cluster.networking.service_subnet,
            defaults::DEFAULT_SERVICE_SUBNET
        );
    }

    #[test]
    fn flags_override_the_config_file() {
        let file = write_config(INIT_AND_CLUSTER);
        let registry = new_registry();
        let overrides = InitOverrides {
            kubernetes_version: Some("v1.19.3".to_string()),
            node_name: Some("renamed".to_string()),
            ..Default::default()
        };
        let loaded = load_init_configuration(
            Some(file.path().to_str().unwrap()),
            &overrides,
            &NoClusterSource,
            &registry,
        )
        .unwrap();

        assert_eq!(loaded.config.cluster.kubernetes_version, "v1.19.3");
        assert_eq!(loaded.config.node_registration.name, "renamed");
    }

    #[test]
    fn duplicate_documents_are_rejected() {
        let doubled = format!(
            "{}---\napiVersion: kubeadm.k8s.io/v1beta2\nkind: ClusterConfiguration\n",
            INIT_AND_CLUSTER
        );
        let file = write_config(&doubled);
        let registry = new_registry();
        let err = load_init_configuration(
            Some(file.path().to_str().unwrap()),
            &InitOverrides::default(),
            &NoClusterSource,
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateDocument(_)));
    }

    #[test]
    fn component_only_file_layers_onto_stored_cluster_config() {
        let file = write_config(
            "apiVersion: kubelet.config.k8s.io/v1beta1\nkind: KubeletConfiguration\n",
        );
        let stored = write_config(
            "apiVersion: kubeadm.k8s.io/v1beta2\n\
             kind: ClusterConfiguration\n\
             kubernetesVersion: v1.19.2\n",
        );
        let registry = new_registry();
        let loaded = load_init_configuration(
            Some(file.path().to_str().unwrap()),
            &InitOverrides::default(),
            &FileClusterSource {
                path: stored.path().to_str().unwrap().to_string(),
            },
            &registry,
        )
        .unwrap();

        assert_eq!(loaded.config.cluster.kubernetes_version, "v1.19.2");
        assert_eq!(loaded.component_configs.len(), 1);
    }

    #[test]
    fn unknown_document_warns_but_does_not_fail() {
        let contents = format!(
            "{}---\napiVersion: v1\nkind: Namespace\nmetadata:\n  name: x\n",
            INIT_AND_CLUSTER
        );
        let file = write_config(&contents);
        let registry = new_registry();
        let loaded = load_init_configuration(
            Some(file.path().to_str().unwrap()),
            &InitOverrides::default(),
            &NoClusterSource,
            &registry,
        )
        .unwrap();
        assert!(loaded
            .warnings
            .iter()
            .any(|w| w.check == "UnknownDocument"));
    }
}
