// src/api/scheme.rs
//
// Registry of the versioned configuration schemas. Built once at process
// start and handed by reference to the loader; registration is append-only
// and nothing mutates it afterwards.

use super::convert::{self, ConversionError};
use super::{internal, v1alpha1, v1beta2};
use crate::types::Warning;
use serde::Serialize;
use std::collections::HashMap;

pub const KUBEADM_GROUP: &str = "kubeadm.k8s.io";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        GroupVersionKind {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Split an `apiVersion` value (`group/version`, or bare `version` for
    /// the core group) plus a kind into a GVK.
    pub fn parse(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => GroupVersionKind::new(group, version, kind),
            None => GroupVersionKind::new("", api_version, kind),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl std::fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// One decoded-and-converted configuration document.
#[derive(Debug, Clone, PartialEq)]
pub enum InternalDocument {
    Init(internal::InitConfiguration),
    Cluster(internal::ClusterConfiguration),
    Join(internal::JoinConfiguration),
}

#[derive(Debug)]
pub enum SchemeError {
    UnknownGvk(GroupVersionKind),
    MissingTypeMeta(String),
    Decode { gvk: GroupVersionKind, message: String },
    Conversion(ConversionError),
    Encode(String),
}

impl std::fmt::Display for SchemeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownGvk(gvk) => write!(f, "no schema registered for {}", gvk),
            Self::MissingTypeMeta(what) => {
                write!(f, "document is missing its {} field", what)
            }
            Self::Decode { gvk, message } => write!(f, "cannot decode {}: {}", gvk, message),
            Self::Conversion(e) => write!(f, "{}", e),
            Self::Encode(message) => write!(f, "cannot encode configuration: {}", message),
        }
    }
}

impl std::error::Error for SchemeError {}

impl From<ConversionError> for SchemeError {
    fn from(error: ConversionError) -> Self {
        SchemeError::Conversion(error)
    }
}

type DecodeFn = fn(serde_yaml::Value) -> Result<(InternalDocument, Vec<Warning>), SchemeError>;

pub struct Registry {
    decoders: HashMap<GroupVersionKind, DecodeFn>,
    /// Versions of the kubeadm group, most preferred first. Encoding always
    /// targets the first entry.
    priority: Vec<String>,
}

impl Registry {
    pub fn empty() -> Self {
        Registry {
            decoders: HashMap::new(),
            priority: Vec::new(),
        }
    }

    pub fn register(&mut self, version: &str, kind: &str, decode: DecodeFn) {
        self.decoders
            .insert(GroupVersionKind::new(KUBEADM_GROUP, version, kind), decode);
    }

    pub fn set_version_priority(&mut self, versions: &[&str]) {
        self.priority = versions.iter().map(|v| v.to_string()).collect();
    }

    pub fn preferred_version(&self) -> &str {
        self.priority.first().map(String::as_str).unwrap_or("")
    }

    /// Extract the GVK a YAML document claims, without decoding the rest.
    pub fn type_meta_of(value: &serde_yaml::Value) -> Result<GroupVersionKind, SchemeError> {
        let api_version = value
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SchemeError::MissingTypeMeta("apiVersion".to_string()))?;
        let kind = value
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SchemeError::MissingTypeMeta("kind".to_string()))?;
        Ok(GroupVersionKind::parse(api_version, kind))
    }

    /// Decode one YAML document into the internal form, walking through the
    /// version its type meta claims.
    pub fn decode(
        &self,
        value: serde_yaml::Value,
    ) -> Result<(InternalDocument, Vec<Warning>), SchemeError> {
        let gvk = Self::type_meta_of(&value)?;
        let decode = self
            .decoders
            .get(&gvk)
            .ok_or(SchemeError::UnknownGvk(gvk))?;
        decode(value)
    }

    pub fn encode_cluster_configuration(
        &self,
        cfg: &internal::ClusterConfiguration,
    ) -> Result<String, SchemeError> {
        match self.preferred_version() {
            v1beta2::VERSION => encode_document(
                v1beta2::VERSION,
                v1beta2::CLUSTER_CONFIGURATION_KIND,
                &convert::cluster_configuration_from_internal(cfg),
            ),
            other => Err(SchemeError::Encode(format!(
                "no encoder for preferred version {:?}",
                other
            ))),
        }
    }

    pub fn encode_init_configuration(
        &self,
        cfg: &internal::InitConfiguration,
    ) -> Result<String, SchemeError> {
        match self.preferred_version() {
            v1beta2::VERSION => encode_document(
                v1beta2::VERSION,
                v1beta2::INIT_CONFIGURATION_KIND,
                &convert::init_configuration_from_internal(cfg),
            ),
            v1alpha1::VERSION => {
                let legacy = convert::master_configuration_from_internal(cfg)?;
                encode_document(v1alpha1::VERSION, v1alpha1::MASTER_CONFIGURATION_KIND, &legacy)
            }
            other => Err(SchemeError::Encode(format!(
                "no encoder for preferred version {:?}",
                other
            ))),
        }
    }

    pub fn encode_join_configuration(
        &self,
        cfg: &internal::JoinConfiguration,
    ) -> Result<String, SchemeError> {
        match self.preferred_version() {
            v1beta2::VERSION => encode_document(
                v1beta2::VERSION,
                v1beta2::JOIN_CONFIGURATION_KIND,
                &convert::join_configuration_from_internal(cfg),
            ),
            other => Err(SchemeError::Encode(format!(
                "no encoder for preferred version {:?}",
                other
            ))),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionedDocument<'a, T: Serialize> {
    api_version: String,
    kind: &'a str,
    #[serde(flatten)]
    spec: &'a T,
}

fn encode_document<T: Serialize>(
    version: &str,
    kind: &str,
    spec: &T,
) -> Result<String, SchemeError> {
    serde_yaml::to_string(&VersionedDocument {
        api_version: format!("{}/{}", KUBEADM_GROUP, version),
        kind,
        spec,
    })
    .map_err(|e| SchemeError::Encode(e.to_string()))
}

fn decode_wire<T: serde::de::DeserializeOwned>(
    gvk: GroupVersionKind,
    value: serde_yaml::Value,
) -> Result<T, SchemeError> {
    serde_yaml::from_value(value).map_err(|e| SchemeError::Decode {
        gvk,
        message: e.to_string(),
    })
}

fn decode_v1alpha1_master(
    value: serde_yaml::Value,
) -> Result<(InternalDocument, Vec<Warning>), SchemeError> {
    let gvk = GroupVersionKind::new(
        KUBEADM_GROUP,
        v1alpha1::VERSION,
        v1alpha1::MASTER_CONFIGURATION_KIND,
    );
    let wire: v1alpha1::MasterConfiguration = decode_wire(gvk, value)?;
    let (converted, warnings) = convert::master_configuration_to_internal(wire)?;
    Ok((InternalDocument::Init(converted), warnings))
}

fn decode_v1beta2_init(
    value: serde_yaml::Value,
) -> Result<(InternalDocument, Vec<Warning>), SchemeError> {
    let gvk = GroupVersionKind::new(
        KUBEADM_GROUP,
        v1beta2::VERSION,
        v1beta2::INIT_CONFIGURATION_KIND,
    );
    let wire: v1beta2::InitConfiguration = decode_wire(gvk, value)?;
    Ok((
        InternalDocument::Init(convert::init_configuration_to_internal(wire)),
        Vec::new(),
    ))
}

fn decode_v1beta2_cluster(
    value: serde_yaml::Value,
) -> Result<(InternalDocument, Vec<Warning>), SchemeError> {
    let gvk = GroupVersionKind::new(
        KUBEADM_GROUP,
        v1beta2::VERSION,
        v1beta2::CLUSTER_CONFIGURATION_KIND,
    );
    let wire: v1beta2::ClusterConfiguration = decode_wire(gvk, value)?;
    let (converted, warnings) = convert::cluster_configuration_to_internal(wire)?;
    Ok((InternalDocument::Cluster(converted), warnings))
}

fn decode_v1beta2_join(
    value: serde_yaml::Value,
) -> Result<(InternalDocument, Vec<Warning>), SchemeError> {
    let gvk = GroupVersionKind::new(
        KUBEADM_GROUP,
        v1beta2::VERSION,
        v1beta2::JOIN_CONFIGURATION_KIND,
    );
    let wire: v1beta2::JoinConfiguration = decode_wire(gvk, value)?;
    Ok((
        InternalDocument::Join(convert::join_configuration_to_internal(wire)),
        Vec::new(),
    ))
}

/// The registry with every supported schema version wired in, newest
/// version preferred for encoding and printing.
pub fn new_registry() -> Registry {
    let mut registry = Registry::empty();
    registry.register(
        v1alpha1::VERSION,
        v1alpha1::MASTER_CONFIGURATION_KIND,
        decode_v1alpha1_master,
    );
    registry.register(
        v1beta2::VERSION,
        v1beta2::INIT_CONFIGURATION_KIND,
        decode_v1beta2_init,
    );
    registry.register(
        v1beta2::VERSION,
        v1beta2::CLUSTER_CONFIGURATION_KIND,
        decode_v1beta2_cluster,
    );
    registry.register(
        v1beta2::VERSION,
        v1beta2::JOIN_CONFIGURATION_KIND,
        decode_v1beta2_join,
    );
    registry.set_version_priority(&[v1beta2::VERSION, v1alpha1::VERSION]);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_version_is_preferred() {
        assert_eq!(new_registry().preferred_version(), "v1beta2");
    }

    #[test]
    fn decodes_a_v1beta2_cluster_document() {
        let doc: serde_yaml::Value = serde_yaml::from_str(
            "apiVersion: kubeadm.k8s.io/v1beta2\n\
             kind: ClusterConfiguration\n\
             kubernetesVersion: v1.19.0\n",
        )
        .unwrap();
        let (decoded, _) = new_registry().decode(doc).unwrap();
        match decoded {
            InternalDocument::Cluster(c) => assert_eq!(c.kubernetes_version, "v1.19.0"),
            other => panic!("unexpected document: {:?}", other),
        }
    }

    #[test]
    fn decodes_a_legacy_master_document() {
        let doc: serde_yaml::Value = serde_yaml::from_str(
            "apiVersion: kubeadm.k8s.io/v1alpha1\n\
             kind: MasterConfiguration\n\
             cloudProvider: aws\n",
        )
        .unwrap();
        let (decoded, warnings) = new_registry().decode(doc).unwrap();
        match decoded {
            InternalDocument::Init(init) => {
                assert_eq!(
                    init.cluster.api_server.extra_args.get("cloud-provider"),
                    Some(&"aws".to_string())
                );
            }
            other => panic!("unexpected document: {:?}", other),
        }
        assert!(!warnings.is_empty());
    }

    #[test]
    fn unknown_kind_in_kubeadm_group_is_rejected() {
        let doc: serde_yaml::Value = serde_yaml::from_str(
            "apiVersion: kubeadm.k8s.io/v1beta2\nkind: MysteryConfiguration\n",
        )
        .unwrap();
        assert!(matches!(
            new_registry().decode(doc),
            Err(SchemeError::UnknownGvk(_))
        ));
    }

    #[test]
    fn missing_type_meta_is_rejected() {
        let doc: serde_yaml::Value = serde_yaml::from_str("kind: ClusterConfiguration\n").unwrap();
        assert!(matches!(
            new_registry().decode(doc),
            Err(SchemeError::MissingTypeMeta(_))
        ));
    }

    #[test]
    fn encoded_cluster_configuration_carries_type_meta() {
        let cfg = internal::ClusterConfiguration {
            kubernetes_version: "v1.19.0".to_string(),
            ..Default::default()
        };
        let encoded = new_registry().encode_cluster_configuration(&cfg).unwrap();
        assert!(encoded.contains("apiVersion: kubeadm.k8s.io/v1beta2"));
        assert!(encoded.contains("kind: ClusterConfiguration"));
    }

    #[test]
    fn encoding_at_the_legacy_version_is_a_hard_error() {
        let mut registry = new_registry();
        registry.set_version_priority(&[v1alpha1::VERSION, v1beta2::VERSION]);
        let error = registry
            .encode_init_configuration(&internal::InitConfiguration::default())
            .unwrap_err();
        assert!(matches!(
            error,
            SchemeError::Conversion(ConversionError::UnsupportedDowngrade { .. })
        ));
    }
}
