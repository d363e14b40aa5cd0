// src/manifests/apiserver.rs

use crate::api::internal::{Etcd, InitConfiguration};
use crate::manifests::args::{build_argument_list, compose_authorization_modes};
use crate::manifests::pod::{host_path_mount, Container, Pod, Probe};
use crate::types::Warning;
use std::collections::BTreeMap;

pub const COMPONENT: &str = "kube-apiserver";

pub fn render(cfg: &InitConfiguration, warnings: &mut Vec<Warning>) -> Pod {
    let cluster = &cfg.cluster;
    let pki = &cluster.certificates_dir;
    let mut defaults = BTreeMap::new();
    let mut insert = |key: &str, value: String| {
        defaults.insert(key.to_string(), value);
    };

    insert("advertise-address", cfg.local_api_endpoint.advertise_address.clone());
    insert("secure-port", cfg.local_api_endpoint.bind_port.to_string());
    insert("allow-privileged", "true".to_string());
    insert("service-cluster-ip-range", cluster.networking.service_subnet.clone());
    insert("enable-admission-plugins", "NodeRestriction".to_string());
    insert("enable-bootstrap-token-auth", "true".to_string());
    insert(
        "authorization-mode",
        compose_authorization_modes(
            cluster.api_server.extra_args.get("authorization-mode").map(String::as_str),
            warnings,
        ),
    );

    insert("client-ca-file", format!("{}/ca.crt", pki));
    insert("tls-cert-file", format!("{}/apiserver.crt", pki));
    insert("tls-private-key-file", format!("{}/apiserver.key", pki));
    insert("kubelet-client-certificate", format!("{}/apiserver-kubelet-client.crt", pki));
    insert("kubelet-client-key", format!("{}/apiserver-kubelet-client.key", pki));
    insert(
        "kubelet-preferred-address-types",
        "InternalIP,ExternalIP,Hostname".to_string(),
    );
    insert("service-account-key-file", format!("{}/sa.pub", pki));
    insert("service-account-signing-key-file", format!("{}/sa.key", pki));
    insert("service-account-issuer", "https://kubernetes.default.svc.cluster.local".to_string());
    insert("proxy-client-cert-file", format!("{}/front-proxy-client.crt", pki));
    insert("proxy-client-key-file", format!("{}/front-proxy-client.key", pki));
    insert("requestheader-client-ca-file", format!("{}/front-proxy-ca.crt", pki));
    insert("requestheader-allowed-names", "front-proxy-client".to_string());
    insert("requestheader-extra-headers-prefix", "X-Remote-Extra-".to_string());
    insert("requestheader-group-headers", "X-Remote-Group".to_string());
    insert("requestheader-username-headers", "X-Remote-User".to_string());

    match &cluster.etcd {
        Etcd::External(external) => {
            insert("etcd-servers", external.endpoints.join(","));
            insert("etcd-cafile", external.ca_file.clone());
            insert("etcd-certfile", external.cert_file.clone());
            insert("etcd-keyfile", external.key_file.clone());
        }
        Etcd::Local(local) => {
            insert("etcd-servers", crate::manifests::etcd::local_client_url(local));
            insert("etcd-cafile", format!("{}/etcd/ca.crt", pki));
            insert("etcd-certfile", format!("{}/apiserver-etcd-client.crt", pki));
            insert("etcd-keyfile", format!("{}/apiserver-etcd-client.key", pki));
        }
    }

    // authorization-mode went through validation above; the raw override
    // must not clobber the composed value.
    let mut overrides = cluster.api_server.extra_args.clone();
    overrides.remove("authorization-mode");

    let mut command = vec![COMPONENT.to_string()];
    command.extend(build_argument_list(defaults, &overrides));

    let image = format!("{}/kube-apiserver:{}", cluster.image_repository, cluster.kubernetes_version);
    let mut container = Container::new(COMPONENT, image, command);
    container.liveness_probe = Some(Probe::http(
        &cfg.local_api_endpoint.advertise_address,
        cfg.local_api_endpoint.bind_port,
        "/healthz",
        "HTTPS",
    ));

    let (pki_volume, pki_mount) = host_path_mount("k8s-certs", pki, pki, true);
    let mut volumes = vec![pki_volume];
    container.volume_mounts.push(pki_mount);
    for mount in &cluster.api_server.extra_volumes {
        let (volume, volume_mount) =
            host_path_mount(&mount.name, &mount.host_path, &mount.mount_path, mount.read_only);
        volumes.push(volume);
        container.volume_mounts.push(volume_mount);
    }

    Pod::static_pod(COMPONENT, container, volumes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::internal::ExternalEtcd;

    fn base_config() -> InitConfiguration {
        let mut cfg = InitConfiguration::default();
        cfg.cluster.kubernetes_version = "v1.19.0".to_string();
        cfg.cluster.networking.service_subnet = "10.96.0.0/12".to_string();
        cfg.cluster.certificates_dir = "/etc/kubernetes/pki".to_string();
        cfg.cluster.image_repository = "registry.k8s.io".to_string();
        cfg.local_api_endpoint.advertise_address = "192.168.0.10".to_string();
        cfg.local_api_endpoint.bind_port = 6443;
        cfg
    }

    fn command_of(pod: &Pod) -> &[String] {
        &pod.spec.containers[0].command
    }

    #[test]
    fn local_etcd_points_at_loopback() {
        let mut warnings = Vec::new();
        let pod = render(&base_config(), &mut warnings);
        let command = command_of(&pod);
        assert!(command.contains(&"--etcd-servers=https://127.0.0.1:2379".to_string()));
        assert!(command
            .contains(&"--etcd-certfile=/etc/kubernetes/pki/apiserver-etcd-client.crt".to_string()));
        assert!(warnings.is_empty());
    }

    #[test]
    fn external_etcd_uses_the_configured_endpoints() {
        let mut cfg = base_config();
        cfg.cluster.etcd = Etcd::External(ExternalEtcd {
            endpoints: vec![
                "https://etcd-0:2379".to_string(),
                "https://etcd-1:2379".to_string(),
            ],
            ca_file: "/etc/ssl/etcd/ca.crt".to_string(),
            cert_file: "/etc/ssl/etcd/client.crt".to_string(),
            key_file: "/etc/ssl/etcd/client.key".to_string(),
        });
        let mut warnings = Vec::new();
        let pod = render(&cfg, &mut warnings);
        let command = command_of(&pod);
        assert!(command.contains(&"--etcd-servers=https://etcd-0:2379,https://etcd-1:2379".to_string()));
        assert!(command.contains(&"--etcd-cafile=/etc/ssl/etcd/ca.crt".to_string()));
    }

    #[test]
    fn extra_args_override_defaults() {
        let mut cfg = base_config();
        cfg.cluster
            .api_server
            .extra_args
            .insert("enable-admission-plugins".to_string(), "NodeRestriction,PodSecurity".to_string());
        let mut warnings = Vec::new();
        let pod = render(&cfg, &mut warnings);
        assert!(command_of(&pod)
            .contains(&"--enable-admission-plugins=NodeRestriction,PodSecurity".to_string()));
    }

    #[test]
    fn unknown_authorization_modes_never_reach_the_command_line() {
        let mut cfg = base_config();
        cfg.cluster
            .api_server
            .extra_args
            .insert("authorization-mode".to_string(), "RBAC,Bogus".to_string());
        let mut warnings = Vec::new();
        let pod = render(&cfg, &mut warnings);
        assert!(command_of(&pod).contains(&"--authorization-mode=RBAC".to_string()));
        assert!(!command_of(&pod).iter().any(|arg| arg.contains("Bogus")));
        assert!(!warnings.is_empty());
    }

    #[test]
    fn probe_targets_the_advertise_address() {
        let mut warnings = Vec::new();
        let pod = render(&base_config(), &mut warnings);
        let probe = pod.spec.containers[0].liveness_probe.as_ref().unwrap();
        assert_eq!(probe.http_get.host, "192.168.0.10");
        assert_eq!(probe.http_get.port, 6443);
        assert_eq!(probe.http_get.scheme, "HTTPS");
    }
}
