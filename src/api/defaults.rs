// src/api/defaults.rs
//
// Compiled-in defaults and the non-destructive defaulting pass that runs
// after conversion. A default is only applied to a zero-valued field;
// explicit user choices are kept, with a warning when they weaken a
// security-sensitive setting.

use super::internal::{
    ClusterConfiguration, Etcd, InitConfiguration, JoinConfiguration, Taint,
};
use crate::types::Warning;
use std::fs;

pub const DEFAULT_KUBERNETES_VERSION: &str = "v1.19.0";
pub const DEFAULT_SERVICE_SUBNET: &str = "10.96.0.0/12";
pub const DEFAULT_DNS_DOMAIN: &str = "cluster.local";
pub const DEFAULT_CERTIFICATES_DIR: &str = "/etc/kubernetes/pki";
pub const DEFAULT_KUBERNETES_DIR: &str = "/etc/kubernetes";
pub const DEFAULT_MANIFESTS_SUBDIR: &str = "manifests";
pub const DEFAULT_IMAGE_REPOSITORY: &str = "registry.k8s.io";
pub const DEFAULT_BIND_PORT: u16 = 6443;
pub const DEFAULT_ETCD_DATA_DIR: &str = "/var/lib/etcd";
pub const DEFAULT_CRI_SOCKET: &str = "unix:///var/run/containerd/containerd.sock";
pub const DEFAULT_TOKEN_TTL_HOURS: u32 = 24;

pub const DEFAULT_AUTHORIZATION_MODES: &[&str] = &["Node", "RBAC"];
pub const KNOWN_AUTHORIZATION_MODES: &[&str] = &[
    "AlwaysAllow",
    "AlwaysDeny",
    "ABAC",
    "Webhook",
    "RBAC",
    "Node",
];

pub const CONTROL_PLANE_TAINT_KEY: &str = "node-role.kubernetes.io/control-plane";
pub const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";

pub const DEFAULT_TOKEN_USAGES: &[&str] = &["signing", "authentication"];
pub const DEFAULT_TOKEN_GROUPS: &[&str] = &["system:bootstrappers:kubeadm:default-node-token"];

pub fn apply_cluster_defaults(cfg: &mut ClusterConfiguration, warnings: &mut Vec<Warning>) {
    if cfg.kubernetes_version.is_empty() {
        cfg.kubernetes_version = DEFAULT_KUBERNETES_VERSION.to_string();
    }
    if cfg.networking.service_subnet.is_empty() {
        cfg.networking.service_subnet = DEFAULT_SERVICE_SUBNET.to_string();
    }
    if cfg.networking.dns_domain.is_empty() {
        cfg.networking.dns_domain = DEFAULT_DNS_DOMAIN.to_string();
    }
    if cfg.certificates_dir.is_empty() {
        cfg.certificates_dir = DEFAULT_CERTIFICATES_DIR.to_string();
    }
    if cfg.image_repository.is_empty() {
        cfg.image_repository = DEFAULT_IMAGE_REPOSITORY.to_string();
    }
    if let Etcd::Local(local) = &mut cfg.etcd {
        if local.data_dir.is_empty() {
            local.data_dir = DEFAULT_ETCD_DATA_DIR.to_string();
        }
    }

    // Explicitly weakened settings are kept, but never silently.
    if cfg
        .api_server
        .extra_args
        .get("anonymous-auth")
        .map(String::as_str)
        == Some("true")
    {
        warnings.push(Warning::new(
            "AnonymousAuth",
            "anonymous-auth is explicitly enabled on the apiserver; the recommended \
             setting is false",
        ));
    }
    if cfg
        .api_server
        .extra_args
        .get("insecure-port")
        .map(|p| p != "0")
        .unwrap_or(false)
    {
        warnings.push(Warning::new(
            "InsecurePort",
            "a non-zero insecure-port is explicitly set on the apiserver; the \
             recommended setting is 0",
        ));
    }
}

pub fn apply_init_defaults(cfg: &mut InitConfiguration, warnings: &mut Vec<Warning>) {
    apply_cluster_defaults(&mut cfg.cluster, warnings);

    if cfg.local_api_endpoint.bind_port == 0 {
        cfg.local_api_endpoint.bind_port = DEFAULT_BIND_PORT;
    }
    if cfg.node_registration.name.is_empty() {
        cfg.node_registration.name = default_node_name();
    }
    if cfg.node_registration.cri_socket.is_empty() {
        cfg.node_registration.cri_socket = DEFAULT_CRI_SOCKET.to_string();
    }
    if cfg.node_registration.taints.is_empty() {
        cfg.node_registration.taints.push(Taint {
            key: CONTROL_PLANE_TAINT_KEY.to_string(),
            value: String::new(),
            effect: "NoSchedule".to_string(),
        });
    }
    for token in &mut cfg.bootstrap_tokens {
        if token.ttl_hours.is_none() {
            token.ttl_hours = Some(DEFAULT_TOKEN_TTL_HOURS);
        }
        if token.usages.is_empty() {
            token.usages = DEFAULT_TOKEN_USAGES.iter().map(|s| s.to_string()).collect();
        }
        if token.groups.is_empty() {
            token.groups = DEFAULT_TOKEN_GROUPS.iter().map(|s| s.to_string()).collect();
        }
    }

    if cfg
        .node_registration
        .kubelet_extra_args
        .get("anonymous-auth")
        .map(String::as_str)
        == Some("true")
    {
        warnings.push(Warning::new(
            "KubeletAnonymousAuth",
            "anonymous-auth is explicitly enabled on the kubelet; the recommended \
             setting is false",
        ));
    }
}

pub fn apply_join_defaults(cfg: &mut JoinConfiguration, _warnings: &mut [Warning]) {
    if cfg.node_registration.name.is_empty() {
        cfg.node_registration.name = default_node_name();
    }
    if cfg.node_registration.cri_socket.is_empty() {
        cfg.node_registration.cri_socket = DEFAULT_CRI_SOCKET.to_string();
    }
    if let Some(cp) = &mut cfg.control_plane {
        if cp.local_api_endpoint.bind_port == 0 {
            cp.local_api_endpoint.bind_port = DEFAULT_BIND_PORT;
        }
    }
}

pub fn default_node_name() -> String {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_zero_values_only() {
        let mut cfg = InitConfiguration::default();
        cfg.cluster.networking.service_subnet = "192.168.0.0/16".to_string();
        let mut warnings = Vec::new();

        apply_init_defaults(&mut cfg, &mut warnings);

        assert_eq!(cfg.cluster.networking.service_subnet, "192.168.0.0/16");
        assert_eq!(cfg.cluster.networking.dns_domain, DEFAULT_DNS_DOMAIN);
        assert_eq!(cfg.cluster.certificates_dir, DEFAULT_CERTIFICATES_DIR);
        assert_eq!(cfg.local_api_endpoint.bind_port, DEFAULT_BIND_PORT);
        assert_eq!(
            cfg.cluster.etcd.local().unwrap().data_dir,
            DEFAULT_ETCD_DATA_DIR
        );
        assert!(warnings.is_empty());
    }

    #[test]
    fn insecure_explicit_choice_is_warned_not_overwritten() {
        let mut cfg = InitConfiguration::default();
        cfg.cluster
            .api_server
            .extra_args
            .insert("anonymous-auth".to_string(), "true".to_string());
        let mut warnings = Vec::new();

        apply_init_defaults(&mut cfg, &mut warnings);

        assert_eq!(
            cfg.cluster.api_server.extra_args.get("anonymous-auth"),
            Some(&"true".to_string())
        );
        assert!(warnings.iter().any(|w| w.check == "AnonymousAuth"));
    }

    #[test]
    fn bootstrap_tokens_get_usages_and_ttl() {
        let mut cfg = InitConfiguration::default();
        cfg.bootstrap_tokens.push(crate::api::internal::BootstrapToken {
            token: "abcdef.0123456789abcdef".to_string(),
            ..Default::default()
        });
        let mut warnings = Vec::new();

        apply_init_defaults(&mut cfg, &mut warnings);

        let token = &cfg.bootstrap_tokens[0];
        assert_eq!(token.ttl_hours, Some(DEFAULT_TOKEN_TTL_HOURS));
        assert_eq!(token.usages, vec!["signing", "authentication"]);
    }
}
