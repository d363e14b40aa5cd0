// src/cert/list.rs
//
// The default certificate list for a control plane node. Authorities are
// declared before every certificate they sign, so one linear pass through
// the list never references an unresolved CA.

use super::types::{AltName, CertSpec, CertificateConfig, ExtendedUsage};
use crate::api::internal::InitConfiguration;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const CA_NAME: &str = "ca";
pub const FRONT_PROXY_CA_NAME: &str = "front-proxy-ca";
pub const ETCD_CA_NAME: &str = "etcd-ca";

const KUBERNETES_CA: CertSpec = CertSpec {
    name: CA_NAME,
    base_name: "ca",
    ca_name: "",
    config: ca_config,
};

const API_SERVER: CertSpec = CertSpec {
    name: "apiserver",
    base_name: "apiserver",
    ca_name: CA_NAME,
    config: api_server_config,
};

const API_SERVER_KUBELET_CLIENT: CertSpec = CertSpec {
    name: "apiserver-kubelet-client",
    base_name: "apiserver-kubelet-client",
    ca_name: CA_NAME,
    config: api_server_kubelet_client_config,
};

const FRONT_PROXY_CA: CertSpec = CertSpec {
    name: FRONT_PROXY_CA_NAME,
    base_name: "front-proxy-ca",
    ca_name: "",
    config: front_proxy_ca_config,
};

const FRONT_PROXY_CLIENT: CertSpec = CertSpec {
    name: "front-proxy-client",
    base_name: "front-proxy-client",
    ca_name: FRONT_PROXY_CA_NAME,
    config: front_proxy_client_config,
};

const ETCD_CA: CertSpec = CertSpec {
    name: ETCD_CA_NAME,
    base_name: "etcd/ca",
    ca_name: "",
    config: etcd_ca_config,
};

const ETCD_SERVER: CertSpec = CertSpec {
    name: "etcd-server",
    base_name: "etcd/server",
    ca_name: ETCD_CA_NAME,
    config: etcd_server_config,
};

const ETCD_PEER: CertSpec = CertSpec {
    name: "etcd-peer",
    base_name: "etcd/peer",
    ca_name: ETCD_CA_NAME,
    config: etcd_peer_config,
};

const ETCD_HEALTHCHECK_CLIENT: CertSpec = CertSpec {
    name: "etcd-healthcheck-client",
    base_name: "etcd/healthcheck-client",
    ca_name: ETCD_CA_NAME,
    config: etcd_healthcheck_client_config,
};

const API_SERVER_ETCD_CLIENT: CertSpec = CertSpec {
    name: "apiserver-etcd-client",
    base_name: "apiserver-etcd-client",
    ca_name: ETCD_CA_NAME,
    config: api_server_etcd_client_config,
};

/// Every certificate `init` needs, in creation order. With external etcd
/// the operator supplies the etcd PKI, so the whole etcd subtree is left
/// out (silently, not as an error).
pub fn default_certificate_list(cfg: &InitConfiguration) -> Vec<CertSpec> {
    let mut list = vec![
        KUBERNETES_CA,
        API_SERVER,
        API_SERVER_KUBELET_CLIENT,
        FRONT_PROXY_CA,
        FRONT_PROXY_CLIENT,
    ];
    if !cfg.cluster.etcd.is_external() {
        list.extend([
            ETCD_CA,
            ETCD_SERVER,
            ETCD_PEER,
            ETCD_HEALTHCHECK_CLIENT,
            API_SERVER_ETCD_CLIENT,
        ]);
    }
    list
}

fn ca_config(_cfg: &InitConfiguration) -> CertificateConfig {
    CertificateConfig::authority("kubernetes")
}

fn front_proxy_ca_config(_cfg: &InitConfiguration) -> CertificateConfig {
    CertificateConfig::authority("front-proxy-ca")
}

fn etcd_ca_config(_cfg: &InitConfiguration) -> CertificateConfig {
    CertificateConfig::authority("etcd-ca")
}

/// The apiserver serving certificate carries every name clients may dial:
/// the in-cluster service names, the service subnet's first IP, the
/// advertise address, the node itself and any user-supplied SANs.
fn api_server_config(cfg: &InitConfiguration) -> CertificateConfig {
    let dns_domain = &cfg.cluster.networking.dns_domain;
    let mut alt_names = vec![
        AltName::dns("kubernetes"),
        AltName::dns("kubernetes.default"),
        AltName::dns("kubernetes.default.svc"),
        AltName::dns(format!("kubernetes.default.svc.{}", dns_domain)),
        AltName::dns(&cfg.node_registration.name),
    ];
    if let Ok(ip) = cfg.local_api_endpoint.advertise_address.parse() {
        alt_names.push(AltName::Ip(ip));
    }
    if let Some(ip) = cfg.cluster.internal_api_server_ip() {
        alt_names.push(AltName::Ip(ip));
    }
    if let Some(host) = cfg.cluster.control_plane_host() {
        alt_names.push(AltName::parse(&host));
    }
    for san in &cfg.cluster.api_server.cert_sans {
        alt_names.push(AltName::parse(san));
    }

    CertificateConfig::leaf("kube-apiserver", &[ExtendedUsage::ServerAuth])
        .with_alt_names(alt_names)
}

fn api_server_kubelet_client_config(_cfg: &InitConfiguration) -> CertificateConfig {
    CertificateConfig::leaf(
        "kube-apiserver-kubelet-client",
        &[ExtendedUsage::ClientAuth],
    )
    .with_organization("system:masters")
}

fn front_proxy_client_config(_cfg: &InitConfiguration) -> CertificateConfig {
    CertificateConfig::leaf("front-proxy-client", &[ExtendedUsage::ClientAuth])
}

fn etcd_node_alt_names(cfg: &InitConfiguration, extra: &[String]) -> Vec<AltName> {
    let mut alt_names = vec![
        AltName::dns(&cfg.node_registration.name),
        AltName::dns("localhost"),
        AltName::Ip(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        AltName::Ip(IpAddr::V6(Ipv6Addr::LOCALHOST)),
    ];
    if let Ok(ip) = cfg.local_api_endpoint.advertise_address.parse() {
        alt_names.push(AltName::Ip(ip));
    }
    for san in extra {
        alt_names.push(AltName::parse(san));
    }
    alt_names
}

fn etcd_server_config(cfg: &InitConfiguration) -> CertificateConfig {
    let extra = cfg
        .cluster
        .etcd
        .local()
        .map(|l| l.server_cert_sans.clone())
        .unwrap_or_default();
    CertificateConfig::leaf(
        &cfg.node_registration.name,
        &[ExtendedUsage::ServerAuth, ExtendedUsage::ClientAuth],
    )
    .with_alt_names(etcd_node_alt_names(cfg, &extra))
}

fn etcd_peer_config(cfg: &InitConfiguration) -> CertificateConfig {
    let extra = cfg
        .cluster
        .etcd
        .local()
        .map(|l| l.peer_cert_sans.clone())
        .unwrap_or_default();
    CertificateConfig::leaf(
        &cfg.node_registration.name,
        &[ExtendedUsage::ServerAuth, ExtendedUsage::ClientAuth],
    )
    .with_alt_names(etcd_node_alt_names(cfg, &extra))
}

fn etcd_healthcheck_client_config(_cfg: &InitConfiguration) -> CertificateConfig {
    CertificateConfig::leaf("kube-etcd-healthcheck-client", &[ExtendedUsage::ClientAuth])
        .with_organization("system:masters")
}

fn api_server_etcd_client_config(_cfg: &InitConfiguration) -> CertificateConfig {
    CertificateConfig::leaf("kube-apiserver-etcd-client", &[ExtendedUsage::ClientAuth])
        .with_organization("system:masters")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::internal::{Etcd, ExternalEtcd};
    use std::collections::HashSet;

    fn test_config() -> InitConfiguration {
        let mut cfg = InitConfiguration::default();
        cfg.node_registration.name = "cp-0".to_string();
        cfg.local_api_endpoint.advertise_address = "192.168.0.10".to_string();
        cfg.cluster.networking.service_subnet = "10.96.0.0/12".to_string();
        cfg.cluster.networking.dns_domain = "cluster.local".to_string();
        cfg
    }

    #[test]
    fn authorities_precede_their_dependents() {
        let list = default_certificate_list(&test_config());
        let mut seen: HashSet<&str> = HashSet::new();
        for spec in &list {
            if spec.is_ca() {
                seen.insert(spec.name);
            } else {
                assert!(
                    seen.contains(spec.ca_name),
                    "{} listed before its authority {}",
                    spec.name,
                    spec.ca_name
                );
            }
        }
    }

    #[test]
    fn external_etcd_skips_the_etcd_subtree() {
        let mut cfg = test_config();
        cfg.cluster.etcd = Etcd::External(ExternalEtcd {
            endpoints: vec!["https://etcd0:2379".to_string()],
            ..Default::default()
        });
        let list = default_certificate_list(&cfg);
        assert!(list.iter().all(|c| !c.name.contains("etcd")));
        assert_eq!(list.len(), 5);
    }

    #[test]
    fn apiserver_cert_carries_the_expected_sans() {
        let cfg = test_config();
        let config = api_server_config(&cfg);
        assert!(config
            .alt_names
            .contains(&AltName::dns("kubernetes.default.svc.cluster.local")));
        assert!(config
            .alt_names
            .contains(&AltName::Ip("192.168.0.10".parse().unwrap())));
        assert!(config
            .alt_names
            .contains(&AltName::Ip("10.96.0.1".parse().unwrap())));
        assert!(config.alt_names.contains(&AltName::dns("cp-0")));
    }
}
