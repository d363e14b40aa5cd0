// src/config/component.rs
//
// Component configs (kubelet, kube-proxy) travel alongside the kubeadm
// documents in the same file. They stay as structured YAML values behind a
// variant per known kind instead of an untyped blob.

use crate::api::scheme::GroupVersionKind;
use crate::types::Warning;

pub const KUBELET_GROUP: &str = "kubelet.config.k8s.io";
pub const KUBE_PROXY_GROUP: &str = "kubeproxy.config.k8s.io";

#[derive(Debug, Clone, PartialEq)]
pub enum ComponentConfig {
    Kubelet(serde_yaml::Value),
    KubeProxy(serde_yaml::Value),
}

impl ComponentConfig {
    /// Claim a document if its group belongs to a known component.
    pub fn from_document(gvk: &GroupVersionKind, value: serde_yaml::Value) -> Option<Self> {
        match gvk.group.as_str() {
            KUBELET_GROUP if gvk.kind == "KubeletConfiguration" => {
                Some(ComponentConfig::Kubelet(value))
            }
            KUBE_PROXY_GROUP if gvk.kind == "KubeProxyConfiguration" => {
                Some(ComponentConfig::KubeProxy(value))
            }
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ComponentConfig::Kubelet(_) => "KubeletConfiguration",
            ComponentConfig::KubeProxy(_) => "KubeProxyConfiguration",
        }
    }

    pub fn marshal(&self) -> Result<String, serde_yaml::Error> {
        match self {
            ComponentConfig::Kubelet(v) | ComponentConfig::KubeProxy(v) => {
                serde_yaml::to_string(v)
            }
        }
    }

    /// Component defaulting is non-destructive like the kubeadm defaulting:
    /// explicit insecure choices are warned about, never rewritten.
    pub fn default_and_warn(&self, warnings: &mut Vec<Warning>) {
        if let ComponentConfig::Kubelet(value) = self {
            let anonymous_enabled = value
                .get("authentication")
                .and_then(|a| a.get("anonymous"))
                .and_then(|a| a.get("enabled"))
                .and_then(|e| e.as_bool());
            if anonymous_enabled == Some(true) {
                warnings.push(Warning::new(
                    "KubeletAnonymousAuth",
                    "the kubelet configuration explicitly enables anonymous \
                     authentication; the recommended setting is false",
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_kubelet_documents() {
        let gvk = GroupVersionKind::parse("kubelet.config.k8s.io/v1beta1", "KubeletConfiguration");
        let value: serde_yaml::Value = serde_yaml::from_str("clusterDomain: cluster.local").unwrap();
        let component = ComponentConfig::from_document(&gvk, value).unwrap();
        assert_eq!(component.kind(), "KubeletConfiguration");
    }

    #[test]
    fn rejects_unknown_groups() {
        let gvk = GroupVersionKind::parse("apps/v1", "Deployment");
        assert!(ComponentConfig::from_document(&gvk, serde_yaml::Value::Null).is_none());
    }

    #[test]
    fn warns_on_explicit_anonymous_auth() {
        let value: serde_yaml::Value = serde_yaml::from_str(
            "authentication:\n  anonymous:\n    enabled: true\n",
        )
        .unwrap();
        let component = ComponentConfig::Kubelet(value);
        let mut warnings = Vec::new();
        component.default_and_warn(&mut warnings);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].check, "KubeletAnonymousAuth");
    }
}
