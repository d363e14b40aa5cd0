// src/manifests/scheduler.rs

use crate::api::internal::InitConfiguration;
use crate::kubeconfig::SCHEDULER_KUBECONFIG;
use crate::manifests::args::build_argument_list;
use crate::manifests::pod::{host_path_mount, Container, Pod, Probe};
use std::collections::BTreeMap;

pub const COMPONENT: &str = "kube-scheduler";

pub fn render(cfg: &InitConfiguration, kubernetes_dir: &str) -> Pod {
    let cluster = &cfg.cluster;
    let kubeconfig = format!("{}/{}", kubernetes_dir, SCHEDULER_KUBECONFIG);
    let mut defaults = BTreeMap::new();
    defaults.insert("bind-address".to_string(), "127.0.0.1".to_string());
    defaults.insert("kubeconfig".to_string(), kubeconfig.clone());
    defaults.insert("authentication-kubeconfig".to_string(), kubeconfig.clone());
    defaults.insert("authorization-kubeconfig".to_string(), kubeconfig.clone());
    defaults.insert("leader-elect".to_string(), "true".to_string());

    let mut command = vec![COMPONENT.to_string()];
    command.extend(build_argument_list(defaults, &cluster.scheduler.extra_args));

    let image = format!("{}/{}:{}", cluster.image_repository, COMPONENT, cluster.kubernetes_version);
    let mut container = Container::new(COMPONENT, image, command);
    container.liveness_probe = Some(Probe::http("127.0.0.1", 10251, "/healthz", "HTTP"));

    let (conf_volume, conf_mount) = host_path_mount("kubeconfig", &kubeconfig, &kubeconfig, true);
    let mut volumes = vec![conf_volume];
    container.volume_mounts.push(conf_mount);
    for mount in &cluster.scheduler.extra_volumes {
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

    #[test]
    fn scheduler_reads_its_own_kubeconfig() {
        let mut cfg = InitConfiguration::default();
        cfg.cluster.kubernetes_version = "v1.19.0".to_string();
        cfg.cluster.image_repository = "registry.k8s.io".to_string();
        let pod = render(&cfg, "/etc/kubernetes");
        let command = &pod.spec.containers[0].command;
        assert!(command.contains(&"--kubeconfig=/etc/kubernetes/scheduler.conf".to_string()));
        assert!(command.contains(&"--leader-elect=true".to_string()));
        assert_eq!(
            pod.spec.containers[0].image,
            "registry.k8s.io/kube-scheduler:v1.19.0"
        );
    }
}
