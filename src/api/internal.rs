// src/api/internal.rs
//
// The canonical, unversioned configuration every external schema version
// converts to and from. Nothing here is serialized directly; the wire form
// is always one of the versioned schemas.

use std::collections::BTreeMap;
use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClusterConfiguration {
    pub kubernetes_version: String,
    /// Optional stable endpoint (`host` or `host:port`) for the control
    /// plane; empty means the advertise address is used.
    pub control_plane_endpoint: String,
    pub networking: Networking,
    pub etcd: Etcd,
    pub api_server: ApiServer,
    pub controller_manager: ControlPlaneComponent,
    pub scheduler: ControlPlaneComponent,
    pub certificates_dir: String,
    pub image_repository: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Networking {
    pub service_subnet: String,
    pub pod_subnet: String,
    pub dns_domain: String,
}

/// Exactly one etcd flavor is active at any time. External etcd means the
/// operator supplies endpoints and certificates, and every local etcd
/// phase (CA, server/peer certs, static pod) is skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum Etcd {
    Local(LocalEtcd),
    External(ExternalEtcd),
}

impl Default for Etcd {
    fn default() -> Self {
        Etcd::Local(LocalEtcd::default())
    }
}

impl Etcd {
    pub fn is_external(&self) -> bool {
        matches!(self, Etcd::External(_))
    }

    pub fn external(&self) -> Option<&ExternalEtcd> {
        match self {
            Etcd::External(e) => Some(e),
            Etcd::Local(_) => None,
        }
    }

    pub fn local(&self) -> Option<&LocalEtcd> {
        match self {
            Etcd::Local(l) => Some(l),
            Etcd::External(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalEtcd {
    pub data_dir: String,
    pub extra_args: BTreeMap<String, String>,
    pub server_cert_sans: Vec<String>,
    pub peer_cert_sans: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExternalEtcd {
    pub endpoints: Vec<String>,
    pub ca_file: String,
    pub cert_file: String,
    pub key_file: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ControlPlaneComponent {
    /// User-supplied flag overrides; they win over computed defaults on
    /// key collision.
    pub extra_args: BTreeMap<String, String>,
    pub extra_volumes: Vec<HostPathMount>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApiServer {
    pub extra_args: BTreeMap<String, String>,
    pub extra_volumes: Vec<HostPathMount>,
    pub cert_sans: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HostPathMount {
    pub name: String,
    pub host_path: String,
    pub mount_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApiEndpoint {
    pub advertise_address: String,
    pub bind_port: u16,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeRegistration {
    pub name: String,
    pub cri_socket: String,
    pub taints: Vec<Taint>,
    pub kubelet_extra_args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Taint {
    pub key: String,
    pub value: String,
    pub effect: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BootstrapToken {
    pub token: String,
    pub description: String,
    pub ttl_hours: Option<u32>,
    pub usages: Vec<String>,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InitConfiguration {
    pub cluster: ClusterConfiguration,
    pub bootstrap_tokens: Vec<BootstrapToken>,
    pub node_registration: NodeRegistration,
    pub local_api_endpoint: ApiEndpoint,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct JoinConfiguration {
    pub node_registration: NodeRegistration,
    pub discovery: Discovery,
    /// Present when the joining node becomes an additional control plane.
    pub control_plane: Option<JoinControlPlane>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Discovery {
    pub api_server_endpoint: String,
    pub token: String,
    pub ca_cert_hashes: Vec<String>,
    pub unsafe_skip_ca_verification: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct JoinControlPlane {
    pub local_api_endpoint: ApiEndpoint,
}

impl ClusterConfiguration {
    /// First usable address of the service subnet, i.e. the cluster IP the
    /// `kubernetes` service gets. Needed as an apiserver certificate SAN.
    pub fn internal_api_server_ip(&self) -> Option<IpAddr> {
        first_address_of(&self.networking.service_subnet)
    }

    /// Host part of the control plane endpoint, without any port.
    pub fn control_plane_host(&self) -> Option<String> {
        if self.control_plane_endpoint.is_empty() {
            return None;
        }
        let host = match self.control_plane_endpoint.rsplit_once(':') {
            Some((h, p)) if p.chars().all(|c| c.is_ascii_digit()) && !h.contains(':') => h,
            _ => self.control_plane_endpoint.as_str(),
        };
        Some(host.to_string())
    }
}

/// Network address of a CIDR plus one. Returns None for anything that does
/// not parse as `addr/prefix`.
pub fn first_address_of(cidr: &str) -> Option<IpAddr> {
    let (addr, prefix) = cidr.split_once('/')?;
    let prefix: u32 = prefix.parse().ok()?;
    match addr.parse::<IpAddr>().ok()? {
        IpAddr::V4(v4) => {
            if prefix > 32 {
                return None;
            }
            let base = u32::from(v4);
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
            Some(IpAddr::V4(((base & mask) + 1).into()))
        }
        IpAddr::V6(v6) => {
            if prefix > 128 {
                return None;
            }
            let base = u128::from(v6);
            let mask = if prefix == 0 {
                0
            } else {
                u128::MAX << (128 - prefix)
            };
            Some(IpAddr::V6(((base & mask) + 1).into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_service_ip_v4() {
        let cfg = ClusterConfiguration {
            networking: Networking {
                service_subnet: "10.96.0.0/12".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            cfg.internal_api_server_ip(),
            Some("10.96.0.1".parse().unwrap())
        );
    }

    #[test]
    fn first_service_ip_v6() {
        assert_eq!(
            first_address_of("fd00:1234::/108"),
            Some("fd00:1234::1".parse().unwrap())
        );
    }

    #[test]
    fn control_plane_host_strips_port() {
        let mut cfg = ClusterConfiguration::default();
        cfg.control_plane_endpoint = "lb.example.com:6443".to_string();
        assert_eq!(cfg.control_plane_host().as_deref(), Some("lb.example.com"));

        cfg.control_plane_endpoint = "192.168.0.10".to_string();
        assert_eq!(cfg.control_plane_host().as_deref(), Some("192.168.0.10"));
    }

    #[test]
    fn etcd_defaults_to_local() {
        assert!(!Etcd::default().is_external());
    }
}
