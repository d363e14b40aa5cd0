// src/manifests/controller_manager.rs

use crate::api::internal::InitConfiguration;
use crate::kubeconfig::CONTROLLER_MANAGER_KUBECONFIG;
use crate::manifests::args::build_argument_list;
use crate::manifests::cidr::calc_node_cidr_mask_size;
use crate::manifests::pod::{host_path_mount, Container, Pod, Probe};
use std::collections::BTreeMap;

pub const COMPONENT: &str = "kube-controller-manager";

pub fn render(cfg: &InitConfiguration, kubernetes_dir: &str) -> Pod {
    let cluster = &cfg.cluster;
    let pki = &cluster.certificates_dir;
    let kubeconfig = format!("{}/{}", kubernetes_dir, CONTROLLER_MANAGER_KUBECONFIG);
    let mut defaults = BTreeMap::new();
    let mut insert = |key: &str, value: String| {
        defaults.insert(key.to_string(), value);
    };

    insert("bind-address", "127.0.0.1".to_string());
    insert("kubeconfig", kubeconfig.clone());
    insert("authentication-kubeconfig", kubeconfig.clone());
    insert("authorization-kubeconfig", kubeconfig);
    insert("leader-elect", "true".to_string());
    insert("controllers", "*,bootstrapsigner,tokencleaner".to_string());
    insert("client-ca-file", format!("{}/ca.crt", pki));
    insert("cluster-signing-cert-file", format!("{}/ca.crt", pki));
    insert("cluster-signing-key-file", format!("{}/ca.key", pki));
    insert("requestheader-client-ca-file", format!("{}/front-proxy-ca.crt", pki));
    insert("root-ca-file", format!("{}/ca.crt", pki));
    insert("service-account-private-key-file", format!("{}/sa.key", pki));
    insert("use-service-account-credentials", "true".to_string());

    // Pod CIDR allocation only makes sense when a pod subnet was given.
    if !cluster.networking.pod_subnet.is_empty() {
        insert("allocate-node-cidrs", "true".to_string());
        insert("cluster-cidr", cluster.networking.pod_subnet.clone());
        if let Some(mask) = calc_node_cidr_mask_size(&cluster.networking.pod_subnet) {
            insert("node-cidr-mask-size", mask.to_string());
        }
    }

    let mut command = vec![COMPONENT.to_string()];
    command.extend(build_argument_list(defaults, &cluster.controller_manager.extra_args));

    let image = format!("{}/{}:{}", cluster.image_repository, COMPONENT, cluster.kubernetes_version);
    let mut container = Container::new(COMPONENT, image, command);
    container.liveness_probe = Some(Probe::http("127.0.0.1", 10252, "/healthz", "HTTP"));

    let (pki_volume, pki_mount) = host_path_mount("k8s-certs", pki, pki, true);
    let (conf_volume, conf_mount) = host_path_mount(
        "kubeconfig",
        &format!("{}/{}", kubernetes_dir, CONTROLLER_MANAGER_KUBECONFIG),
        &format!("{}/{}", kubernetes_dir, CONTROLLER_MANAGER_KUBECONFIG),
        true,
    );
    let mut volumes = vec![pki_volume, conf_volume];
    container.volume_mounts.push(pki_mount);
    container.volume_mounts.push(conf_mount);
    for mount in &cluster.controller_manager.extra_volumes {
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

    fn base_config() -> InitConfiguration {
        let mut cfg = InitConfiguration::default();
        cfg.cluster.kubernetes_version = "v1.19.0".to_string();
        cfg.cluster.certificates_dir = "/etc/kubernetes/pki".to_string();
        cfg.cluster.image_repository = "registry.k8s.io".to_string();
        cfg
    }

    #[test]
    fn pod_subnet_enables_cidr_allocation() {
        let mut cfg = base_config();
        cfg.cluster.networking.pod_subnet = "10.244.0.0/16".to_string();
        let pod = render(&cfg, "/etc/kubernetes");
        let command = &pod.spec.containers[0].command;
        assert!(command.contains(&"--allocate-node-cidrs=true".to_string()));
        assert!(command.contains(&"--cluster-cidr=10.244.0.0/16".to_string()));
        assert!(command.contains(&"--node-cidr-mask-size=24".to_string()));
    }

    #[test]
    fn no_pod_subnet_means_no_cidr_flags() {
        let pod = render(&base_config(), "/etc/kubernetes");
        let command = &pod.spec.containers[0].command;
        assert!(!command.iter().any(|arg| arg.starts_with("--allocate-node-cidrs")));
        assert!(!command.iter().any(|arg| arg.starts_with("--cluster-cidr")));
    }
}
