// src/manifests/etcd.rs

use crate::api::internal::{Etcd, InitConfiguration, LocalEtcd};
use crate::manifests::args::build_argument_list;
use crate::manifests::pod::{host_path_mount, Container, Pod};
use std::collections::BTreeMap;

pub const COMPONENT: &str = "etcd";
const ETCD_VERSION: &str = "3.4.13-0";

/// Renders the local etcd static pod, or nothing when etcd is external
/// and therefore not ours to run.
pub fn render(cfg: &InitConfiguration) -> Option<Pod> {
    let cluster = &cfg.cluster;
    let local = match &cluster.etcd {
        Etcd::Local(local) => local,
        Etcd::External(_) => return None,
    };

    let pki = &cluster.certificates_dir;
    let advertise = &cfg.local_api_endpoint.advertise_address;
    let name = &cfg.node_registration.name;
    let mut defaults = BTreeMap::new();
    let mut insert = |key: &str, value: String| {
        defaults.insert(key.to_string(), value);
    };

    insert("name", name.clone());
    insert("data-dir", local.data_dir.clone());
    insert("listen-client-urls", format!("https://127.0.0.1:2379,https://{}:2379", advertise));
    insert("advertise-client-urls", format!("https://{}:2379", advertise));
    insert("listen-peer-urls", format!("https://{}:2380", advertise));
    insert("initial-advertise-peer-urls", format!("https://{}:2380", advertise));
    insert("initial-cluster", format!("{}=https://{}:2380", name, advertise));
    insert("snapshot-count", "10000".to_string());
    insert("cert-file", format!("{}/etcd/server.crt", pki));
    insert("key-file", format!("{}/etcd/server.key", pki));
    insert("trusted-ca-file", format!("{}/etcd/ca.crt", pki));
    insert("client-cert-auth", "true".to_string());
    insert("peer-cert-file", format!("{}/etcd/peer.crt", pki));
    insert("peer-key-file", format!("{}/etcd/peer.key", pki));
    insert("peer-trusted-ca-file", format!("{}/etcd/ca.crt", pki));
    insert("peer-client-cert-auth", "true".to_string());

    let mut command = vec![COMPONENT.to_string()];
    command.extend(build_argument_list(defaults, &local.extra_args));

    let image = format!("{}/etcd:{}", cluster.image_repository, ETCD_VERSION);
    let mut container = Container::new(COMPONENT, image, command);

    let etcd_pki = format!("{}/etcd", pki);
    let (certs_volume, certs_mount) = host_path_mount("etcd-certs", &etcd_pki, &etcd_pki, true);
    let (data_volume, data_mount) =
        host_path_mount("etcd-data", &local.data_dir, &local.data_dir, false);
    container.volume_mounts.push(certs_mount);
    container.volume_mounts.push(data_mount);

    Some(Pod::static_pod(COMPONENT, container, vec![certs_volume, data_volume]))
}

pub fn local_client_url(local: &LocalEtcd) -> String {
    local
        .extra_args
        .get("advertise-client-urls")
        .cloned()
        .unwrap_or_else(|| "https://127.0.0.1:2379".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> InitConfiguration {
        let mut cfg = InitConfiguration::default();
        cfg.cluster.certificates_dir = "/etc/kubernetes/pki".to_string();
        cfg.cluster.image_repository = "registry.k8s.io".to_string();
        cfg.local_api_endpoint.advertise_address = "192.168.0.10".to_string();
        cfg.node_registration.name = "cp-0".to_string();
        if let Etcd::Local(local) = &mut cfg.cluster.etcd {
            local.data_dir = "/var/lib/etcd".to_string();
        }
        cfg
    }

    #[test]
    fn local_etcd_advertises_the_node_address() {
        let pod = render(&base_config()).unwrap();
        let command = &pod.spec.containers[0].command;
        assert!(command.contains(&"--advertise-client-urls=https://192.168.0.10:2379".to_string()));
        assert!(command.contains(&"--initial-cluster=cp-0=https://192.168.0.10:2380".to_string()));
        assert!(command.contains(&"--data-dir=/var/lib/etcd".to_string()));
    }

    #[test]
    fn external_etcd_renders_nothing() {
        let mut cfg = base_config();
        cfg.cluster.etcd = Etcd::External(Default::default());
        assert!(render(&cfg).is_none());
    }

    #[test]
    fn advertise_client_urls_override_wins() {
        let mut cfg = base_config();
        if let Etcd::Local(local) = &mut cfg.cluster.etcd {
            local
                .extra_args
                .insert("advertise-client-urls".to_string(), "https://10.0.0.5:2379".to_string());
        }
        let pod = render(&cfg).unwrap();
        let command = &pod.spec.containers[0].command;
        assert!(command.contains(&"--advertise-client-urls=https://10.0.0.5:2379".to_string()));
        if let Etcd::Local(local) = &cfg.cluster.etcd {
            assert_eq!(local_client_url(local), "https://10.0.0.5:2379");
        }
    }
}
