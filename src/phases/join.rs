// src/phases/join.rs
//
// The `join` workflow for worker nodes: validate the discovery settings,
// then write the bootstrap kubeconfig the kubelet uses to request its
// first client certificate.

use crate::api::internal::JoinConfiguration;
use crate::kubeconfig::{self, BOOTSTRAP_KUBELET_KUBECONFIG};
use crate::phases::runner::{Phase, PhaseError, Runner};
use crate::phases::token;
use crate::utils::logging::Logger;
use std::path::PathBuf;

pub const JOIN_FLAGS: &[&str] = &[
    "--config",
    "--token",
    "--discovery-token-ca-cert-hash",
    "--discovery-token-unsafe-skip-ca-verification",
    "--node-name",
    "--kubernetes-dir",
];

pub struct JoinData {
    pub cfg: JoinConfiguration,
    pub kubernetes_dir: PathBuf,
    pub logger: Box<dyn Logger>,
}

pub fn join_workflow() -> Result<Runner<JoinData>, PhaseError> {
    let mut runner = Runner::new(JOIN_FLAGS);
    runner.append(
        Phase::new("discovery", "validate cluster discovery settings", run_discovery)
            .with_inherit_flags(&[
                "--token",
                "--discovery-token-ca-cert-hash",
                "--discovery-token-unsafe-skip-ca-verification",
            ]),
    )?;
    runner.append(
        Phase::new(
            "kubelet-start",
            "write the bootstrap kubeconfig for the kubelet",
            run_kubelet_start,
        )
        .with_inherit_flags(&["--kubernetes-dir"]),
    )?;
    Ok(runner)
}

fn run_discovery(data: &mut JoinData) -> Result<(), Box<dyn std::error::Error>> {
    let discovery = &data.cfg.discovery;
    if discovery.api_server_endpoint.is_empty() {
        return Err("no API server endpoint to join".into());
    }
    if !token::is_valid_token(&discovery.token) {
        return Err(format!("bootstrap token {:?} is malformed", discovery.token).into());
    }
    if discovery.ca_cert_hashes.is_empty() && !discovery.unsafe_skip_ca_verification {
        return Err(
            "no CA certificate hashes given; pass --discovery-token-ca-cert-hash or explicitly \
             skip verification"
                .into(),
        );
    }
    if discovery.unsafe_skip_ca_verification {
        data.logger.warn_log(
            "Discovery",
            "joining without CA verification, the control plane identity is unverified",
        );
    }
    Ok(())
}

fn run_kubelet_start(data: &mut JoinData) -> Result<(), Box<dyn std::error::Error>> {
    let rendered = kubeconfig::bootstrap_kubelet_config(
        &format!("https://{}", data.cfg.discovery.api_server_endpoint),
        &data.cfg.discovery.token,
        None,
    )?;
    std::fs::create_dir_all(&data.kubernetes_dir)?;
    let path = data.kubernetes_dir.join(BOOTSTRAP_KUBELET_KUBECONFIG);
    kubeconfig::write_private(&path, rendered.as_bytes())?;
    data.logger
        .log(&format!("[join] Wrote {}", BOOTSTRAP_KUBELET_KUBECONFIG));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::internal::Discovery;
    use crate::utils::logging::MemoryLogger;

    fn test_data(dir: &std::path::Path, discovery: Discovery) -> JoinData {
        let mut cfg = JoinConfiguration::default();
        cfg.discovery = discovery;
        cfg.node_registration.name = "worker-0".to_string();
        JoinData {
            cfg,
            kubernetes_dir: dir.to_path_buf(),
            logger: Box::new(MemoryLogger::new()),
        }
    }

    #[test]
    fn join_writes_the_bootstrap_kubeconfig() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = test_data(
            dir.path(),
            Discovery {
                api_server_endpoint: "192.168.0.10:6443".to_string(),
                token: "abcdef.0123456789abcdef".to_string(),
                ca_cert_hashes: vec!["sha256:00".to_string()],
                unsafe_skip_ca_verification: false,
            },
        );
        let mut logger = MemoryLogger::new();
        join_workflow().unwrap().run_all(&mut data, &mut logger).unwrap();

        let rendered =
            std::fs::read_to_string(dir.path().join(BOOTSTRAP_KUBELET_KUBECONFIG)).unwrap();
        assert!(rendered.contains("server: https://192.168.0.10:6443"));
        assert!(rendered.contains("token: abcdef.0123456789abcdef"));
    }

    #[test]
    fn missing_ca_hashes_without_skip_fail_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = test_data(
            dir.path(),
            Discovery {
                api_server_endpoint: "192.168.0.10:6443".to_string(),
                token: "abcdef.0123456789abcdef".to_string(),
                ca_cert_hashes: Vec::new(),
                unsafe_skip_ca_verification: false,
            },
        );
        let mut logger = MemoryLogger::new();
        let error = join_workflow()
            .unwrap()
            .run_all(&mut data, &mut logger)
            .unwrap_err();
        assert!(matches!(error, PhaseError::Failed { ref phase, .. } if phase == "discovery"));
        assert!(!dir.path().join(BOOTSTRAP_KUBELET_KUBECONFIG).exists());
    }

    #[test]
    fn malformed_tokens_fail_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = test_data(
            dir.path(),
            Discovery {
                api_server_endpoint: "192.168.0.10:6443".to_string(),
                token: "short".to_string(),
                ca_cert_hashes: vec!["sha256:00".to_string()],
                unsafe_skip_ca_verification: false,
            },
        );
        let mut logger = MemoryLogger::new();
        assert!(join_workflow().unwrap().run_all(&mut data, &mut logger).is_err());
    }
}
