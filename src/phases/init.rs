// src/phases/init.rs
//
// The `init` workflow. Phase functions share an InitData; anything that
// would normally be posted to the cluster API is rendered as a document
// under <kubernetes dir>/setup/ instead, where an operator (or a later
// uploader) can apply it.

use crate::api::defaults::{CONTROL_PLANE_LABEL, DEFAULT_MANIFESTS_SUBDIR};
use crate::api::internal::InitConfiguration;
use crate::api::Registry;
use crate::cert::{self, pki, CertificateOperations};
use crate::config::upload;
use crate::kubeconfig::KubeConfigGenerator;
use crate::manifests;
use crate::phases::runner::{Phase, PhaseError, Runner};
use crate::phases::token;
use crate::utils::logging::Logger;
use serde_json::json;
use std::path::PathBuf;
use std::{fs, io};
use uuid::Uuid;

/// Flags the init command accepts; phases name the subset they read.
pub const INIT_FLAGS: &[&str] = &[
    "--config",
    "--cert-dir",
    "--kubernetes-dir",
    "--kubernetes-version",
    "--advertise-address",
    "--bind-port",
    "--pod-network-cidr",
    "--service-cidr",
    "--service-dns-domain",
    "--node-name",
    "--dry-run",
];

const SETUP_SUBDIR: &str = "setup";

pub struct InitData {
    pub cfg: InitConfiguration,
    /// Directory rendered into manifests and kubeconfig paths. Writes go
    /// to `write_root`, which only differs under dry run.
    pub kubernetes_dir: String,
    pub write_root: PathBuf,
    pub dry_run: bool,
    pub registry: Registry,
    pub logger: Box<dyn Logger>,
}

impl InitData {
    pub fn new(
        cfg: InitConfiguration,
        kubernetes_dir: String,
        dry_run: bool,
        registry: Registry,
        logger: Box<dyn Logger>,
    ) -> io::Result<Self> {
        let write_root = if dry_run {
            let staged = std::env::temp_dir().join(format!("k8s-bootstrap-dryrun-{}", Uuid::new_v4()));
            fs::create_dir_all(&staged)?;
            staged
        } else {
            PathBuf::from(&kubernetes_dir)
        };
        Ok(InitData {
            cfg,
            kubernetes_dir,
            write_root,
            dry_run,
            registry,
            logger,
        })
    }

    /// The real certificates directory. Reads always consult this, dry
    /// run or not; only writes are redirected to `staged_cert_dir`.
    pub fn cert_dir(&self) -> PathBuf {
        PathBuf::from(&self.cfg.cluster.certificates_dir)
    }

    /// Where a dry run stages newly minted PKI material. Kept with the
    /// rest of the staging root so the operator can inspect it.
    pub fn staged_cert_dir(&self) -> PathBuf {
        self.write_root.join("pki")
    }

    pub fn server_url(&self) -> String {
        if self.cfg.cluster.control_plane_endpoint.is_empty() {
            format!(
                "https://{}:{}",
                self.cfg.local_api_endpoint.advertise_address, self.cfg.local_api_endpoint.bind_port
            )
        } else {
            format!("https://{}", self.cfg.cluster.control_plane_endpoint)
        }
    }

    fn ca_pair(&self) -> Result<(openssl::x509::X509, openssl::pkey::PKey<openssl::pkey::Private>), Box<dyn std::error::Error>>
    {
        // A dry run may have staged a fresh CA, or reused the one in the
        // real directory without copying it.
        let mut dir = self.cert_dir();
        if self.dry_run {
            let staged = self.staged_cert_dir();
            if pki::certificate_path(&staged, "ca").exists() {
                dir = staged;
            }
        }
        let cert = pki::load_certificate(&pki::certificate_path(&dir, "ca"))?;
        let key = pki::load_private_key(&pki::key_path(&dir, "ca"))?;
        Ok((cert, key))
    }

    fn write_setup_document(&mut self, name: &str, contents: &str) -> io::Result<()> {
        let dir = self.write_root.join(SETUP_SUBDIR);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(name), contents)?;
        self.logger
            .log(&format!("[init] Rendered {}/{}", SETUP_SUBDIR, name));
        Ok(())
    }
}

pub fn init_workflow() -> Result<Runner<InitData>, PhaseError> {
    let mut runner = Runner::new(INIT_FLAGS);
    runner.append(
        Phase::new("certs", "generate the cluster PKI", run_certs)
            .with_inherit_flags(&["--config", "--cert-dir", "--dry-run"]),
    )?;
    runner.append(
        Phase::new("kubeconfig", "write kubeconfig files for the admin and components", run_kubeconfig)
            .with_inherit_flags(&["--config", "--cert-dir", "--kubernetes-dir", "--dry-run"]),
    )?;
    runner.append(Phase::container(
        "control-plane",
        "write static pod manifests for the control plane",
        vec![
            Phase::new("apiserver", "kube-apiserver manifest", run_apiserver).with_run_all_siblings(),
            Phase::new("controller-manager", "kube-controller-manager manifest", run_controller_manager),
            Phase::new("scheduler", "kube-scheduler manifest", run_scheduler),
        ],
    ))?;
    runner.append(
        Phase::new("etcd", "write the local etcd manifest", run_etcd)
            .with_inherit_flags(&["--config", "--dry-run"]),
    )?;
    runner.append(Phase::new(
        "upload-config",
        "render the kubeadm-config ConfigMap",
        run_upload_config,
    ))?;
    runner.append(Phase::new(
        "bootstrap-token",
        "render bootstrap token secrets and print the join command",
        run_bootstrap_token,
    ))?;
    runner.append(Phase::new(
        "mark-control-plane",
        "render the control plane node label and taint patch",
        run_mark_control_plane,
    ))?;
    Ok(runner)
}

fn run_certs(data: &mut InitData) -> Result<(), Box<dyn std::error::Error>> {
    let cert_dir = data.cert_dir();
    let staged = data.staged_cert_dir();
    let dry_run = data.dry_run;
    let specs = cert::default_certificate_list(&data.cfg);
    let mut operations = if dry_run {
        CertificateOperations::staged(data.logger.as_mut(), cert_dir, staged)?
    } else {
        CertificateOperations::new(data.logger.as_mut(), cert_dir)
    };
    operations.ensure_certificates(&data.cfg, &specs)?;
    operations.ensure_service_account_keys()?;
    Ok(())
}

fn run_kubeconfig(data: &mut InitData) -> Result<(), Box<dyn std::error::Error>> {
    let (ca_cert, ca_key) = data.ca_pair()?;
    let generator = KubeConfigGenerator::new(data.write_root.clone(), data.server_url(), &ca_cert, &ca_key);
    let node_name = data.cfg.node_registration.name.clone();
    generator.generate_all(&node_name, data.logger.as_mut())?;
    Ok(())
}

fn run_apiserver(data: &mut InitData) -> Result<(), Box<dyn std::error::Error>> {
    let mut warnings = Vec::new();
    let pod = manifests::apiserver::render(&data.cfg, &mut warnings);
    for warning in &warnings {
        data.logger.warn_log(&warning.check, &warning.message);
    }
    manifests::write_manifest(
        &data.write_root.join(DEFAULT_MANIFESTS_SUBDIR),
        &pod,
        data.logger.as_mut(),
    )?;
    Ok(())
}

fn run_controller_manager(data: &mut InitData) -> Result<(), Box<dyn std::error::Error>> {
    let pod = manifests::controller_manager::render(&data.cfg, &data.kubernetes_dir);
    manifests::write_manifest(&data.write_root.join(DEFAULT_MANIFESTS_SUBDIR), &pod, data.logger.as_mut())?;
    Ok(())
}

fn run_scheduler(data: &mut InitData) -> Result<(), Box<dyn std::error::Error>> {
    let pod = manifests::scheduler::render(&data.cfg, &data.kubernetes_dir);
    manifests::write_manifest(&data.write_root.join(DEFAULT_MANIFESTS_SUBDIR), &pod, data.logger.as_mut())?;
    Ok(())
}

fn run_etcd(data: &mut InitData) -> Result<(), Box<dyn std::error::Error>> {
    match manifests::etcd::render(&data.cfg) {
        Some(pod) => {
            manifests::write_manifest(&data.write_root.join(DEFAULT_MANIFESTS_SUBDIR), &pod, data.logger.as_mut())?;
        }
        None => data.logger.log("[etcd] External etcd, nothing to run locally"),
    }
    Ok(())
}

fn run_upload_config(data: &mut InitData) -> Result<(), Box<dyn std::error::Error>> {
    let rendered = upload::uploaded_config_map(&data.cfg, &data.registry)?;
    data.write_setup_document("kubeadm-config.yaml", &rendered)?;
    Ok(())
}

fn run_bootstrap_token(data: &mut InitData) -> Result<(), Box<dyn std::error::Error>> {
    if data.cfg.bootstrap_tokens.is_empty() {
        return Err("no bootstrap token configured".into());
    }
    for i in 0..data.cfg.bootstrap_tokens.len() {
        if data.cfg.bootstrap_tokens[i].token.is_empty() {
            data.cfg.bootstrap_tokens[i].token = token::generate_bootstrap_token()?;
        }
        let entry = data.cfg.bootstrap_tokens[i].clone();
        let rendered = token::bootstrap_token_secret(&entry)
            .ok_or_else(|| format!("bootstrap token {:?} is malformed", entry.token))?;
        let id = entry.token.split('.').next().unwrap_or("token");
        data.write_setup_document(&format!("bootstrap-token-{}.yaml", id), &rendered)?;
    }

    let (ca_cert, _) = data.ca_pair()?;
    let ca_hash = pki::public_key_hash(&ca_cert)?;
    let endpoint = data
        .server_url()
        .trim_start_matches("https://")
        .to_string();
    data.logger.log(&format!(
        "[bootstrap-token] Join this cluster with: join {} --token {} --discovery-token-ca-cert-hash {}",
        endpoint, data.cfg.bootstrap_tokens[0].token, ca_hash
    ));
    Ok(())
}

fn run_mark_control_plane(data: &mut InitData) -> Result<(), Box<dyn std::error::Error>> {
    let taints: Vec<serde_json::Value> = data
        .cfg
        .node_registration
        .taints
        .iter()
        .map(|taint| {
            let mut object = json!({ "key": taint.key, "effect": taint.effect });
            if !taint.value.is_empty() {
                object["value"] = json!(taint.value);
            }
            object
        })
        .collect();
    let patch = json!({
        "metadata": { "labels": { CONTROL_PLANE_LABEL: "" } },
        "spec": { "taints": taints },
    });
    let rendered = serde_json::to_string_pretty(&patch)?;
    data.write_setup_document("mark-control-plane.json", &rendered)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::new_registry;
    use crate::api::internal::{BootstrapToken, Taint};
    use crate::cert::types::{CertificateConfig, ExtendedUsage};
    use crate::utils::logging::MemoryLogger;

    fn test_config(cert_dir: &str) -> InitConfiguration {
        let mut cfg = InitConfiguration::default();
        cfg.cluster.kubernetes_version = "v1.19.0".to_string();
        cfg.cluster.networking.service_subnet = "10.96.0.0/12".to_string();
        cfg.cluster.networking.dns_domain = "cluster.local".to_string();
        cfg.cluster.certificates_dir = cert_dir.to_string();
        cfg.cluster.image_repository = "registry.k8s.io".to_string();
        cfg.local_api_endpoint.advertise_address = "192.168.0.10".to_string();
        cfg.local_api_endpoint.bind_port = 6443;
        cfg.node_registration.name = "cp-0".to_string();
        cfg.node_registration.taints = vec![Taint {
            key: "node-role.kubernetes.io/control-plane".to_string(),
            value: String::new(),
            effect: "NoSchedule".to_string(),
        }];
        cfg.bootstrap_tokens = vec![BootstrapToken {
            token: String::new(),
            ttl_hours: Some(24),
            usages: vec!["authentication".to_string(), "signing".to_string()],
            groups: vec!["system:bootstrappers:kubeadm:default-node-token".to_string()],
            ..Default::default()
        }];
        cfg
    }

    fn test_data(root: &std::path::Path) -> InitData {
        let kubernetes_dir = root.to_str().unwrap().to_string();
        let cert_dir = root.join("pki");
        InitData::new(
            test_config(cert_dir.to_str().unwrap()),
            kubernetes_dir,
            false,
            new_registry(),
            Box::new(MemoryLogger::new()),
        )
        .unwrap()
    }

    #[test]
    fn full_workflow_produces_pki_kubeconfigs_manifests_and_documents() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = test_data(dir.path());
        let mut logger = MemoryLogger::new();

        init_workflow().unwrap().run_all(&mut data, &mut logger).unwrap();

        assert!(dir.path().join("pki/ca.crt").exists());
        assert!(dir.path().join("pki/sa.key").exists());
        assert!(dir.path().join("admin.conf").exists());
        assert!(dir.path().join("manifests/kube-apiserver.yaml").exists());
        assert!(dir.path().join("manifests/etcd.yaml").exists());
        assert!(dir.path().join("setup/kubeadm-config.yaml").exists());
        assert!(dir.path().join("setup/mark-control-plane.json").exists());

        let token = &data.cfg.bootstrap_tokens[0].token;
        assert!(token::is_valid_token(token));
        assert!(dir
            .path()
            .join(format!("setup/bootstrap-token-{}.yaml", token.split('.').next().unwrap()))
            .exists());
    }

    #[test]
    fn dry_run_leaves_the_real_directories_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let kubernetes_dir = dir.path().to_str().unwrap().to_string();
        let mut data = InitData::new(
            test_config(dir.path().join("pki").to_str().unwrap()),
            kubernetes_dir,
            true,
            new_registry(),
            Box::new(MemoryLogger::new()),
        )
        .unwrap();
        let mut logger = MemoryLogger::new();

        init_workflow().unwrap().run_all(&mut data, &mut logger).unwrap();

        assert!(!dir.path().join("pki").exists());
        assert!(!dir.path().join("manifests").exists());
        assert!(data.write_root.join("pki/ca.crt").exists());
        assert!(data.write_root.join("manifests/kube-apiserver.yaml").exists());
        fs::remove_dir_all(&data.write_root).unwrap();
    }

    #[test]
    fn dry_run_still_verifies_the_real_certificate_directory() {
        let dir = tempfile::tempdir().unwrap();
        let real_pki = dir.path().join("pki");

        // Real directory holds a CA plus an apiserver certificate signed
        // by some other CA.
        let ca_key = pki::generate_private_key().unwrap();
        let ca = pki::new_self_signed_ca(&CertificateConfig::authority("kubernetes"), &ca_key)
            .unwrap();
        pki::write_certificate_and_key(&real_pki, "ca", &ca, &ca_key).unwrap();

        let foreign_key = pki::generate_private_key().unwrap();
        let foreign_ca =
            pki::new_self_signed_ca(&CertificateConfig::authority("kubernetes"), &foreign_key)
                .unwrap();
        let leaf_key = pki::generate_private_key().unwrap();
        let leaf = pki::new_signed_certificate(
            &CertificateConfig::leaf("kube-apiserver", &[ExtendedUsage::ServerAuth]),
            &leaf_key,
            &foreign_ca,
            &foreign_key,
        )
        .unwrap();
        pki::write_certificate_and_key(&real_pki, "apiserver", &leaf, &leaf_key).unwrap();

        let mut data = InitData::new(
            test_config(real_pki.to_str().unwrap()),
            dir.path().to_str().unwrap().to_string(),
            true,
            new_registry(),
            Box::new(MemoryLogger::new()),
        )
        .unwrap();
        let mut logger = MemoryLogger::new();
        let mut workflow = init_workflow().unwrap();

        let error = workflow.run_one("certs", &mut data, &mut logger).unwrap_err();
        assert!(
            matches!(error, PhaseError::Failed { ref phase, ref message }
                if phase == "certs" && message.contains("not signed by expected CA"))
        );
        // The mismatched files themselves are left as they were.
        assert!(real_pki.join("apiserver.crt").exists());
        fs::remove_dir_all(&data.write_root).unwrap();
    }

    #[test]
    fn single_control_plane_phase_runs_all_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = test_data(dir.path());
        let mut logger = MemoryLogger::new();
        let mut workflow = init_workflow().unwrap();

        workflow.run_one("apiserver", &mut data, &mut logger).unwrap();

        assert!(dir.path().join("manifests/kube-apiserver.yaml").exists());
        assert!(dir.path().join("manifests/kube-controller-manager.yaml").exists());
        assert!(dir.path().join("manifests/kube-scheduler.yaml").exists());
    }

    #[test]
    fn kubeconfig_phase_fails_without_certificates() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = test_data(dir.path());
        let mut logger = MemoryLogger::new();
        let mut workflow = init_workflow().unwrap();

        let error = workflow.run_one("kubeconfig", &mut data, &mut logger).unwrap_err();
        assert!(matches!(error, PhaseError::Failed { ref phase, .. } if phase == "kubeconfig"));
    }
}
