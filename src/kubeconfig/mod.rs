// src/kubeconfig/mod.rs
//
// Renders the kubeconfig files the control plane components and the admin
// use. Client certificates are minted in memory from the cluster CA and
// embedded base64, so nothing here shells out or touches the PKI
// directory beyond reading the CA pair handed in.

use crate::cert::pki::{self, PkiError};
use crate::cert::types::{CertificateConfig, ExtendedUsage};
use crate::utils::logging::Logger;
use base64::{engine::general_purpose, Engine as _};
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::{fs, io};

pub const ADMIN_KUBECONFIG: &str = "admin.conf";
pub const KUBELET_KUBECONFIG: &str = "kubelet.conf";
pub const CONTROLLER_MANAGER_KUBECONFIG: &str = "controller-manager.conf";
pub const SCHEDULER_KUBECONFIG: &str = "scheduler.conf";
pub const BOOTSTRAP_KUBELET_KUBECONFIG: &str = "bootstrap-kubelet.conf";

const CLUSTER_NAME: &str = "kubernetes";

#[derive(Debug)]
pub enum KubeConfigError {
    Io(io::Error),
    Pki(PkiError),
    Encode(String),
}

impl std::fmt::Display for KubeConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "cannot write kubeconfig: {}", e),
            Self::Pki(e) => write!(f, "cannot mint kubeconfig credential: {}", e),
            Self::Encode(msg) => write!(f, "cannot serialize kubeconfig: {}", msg),
        }
    }
}

impl std::error::Error for KubeConfigError {}

impl From<io::Error> for KubeConfigError {
    fn from(error: io::Error) -> Self {
        KubeConfigError::Io(error)
    }
}

impl From<PkiError> for KubeConfigError {
    fn from(error: PkiError) -> Self {
        KubeConfigError::Pki(error)
    }
}

impl From<openssl::error::ErrorStack> for KubeConfigError {
    fn from(error: openssl::error::ErrorStack) -> Self {
        KubeConfigError::Pki(PkiError::from(error))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct KubeConfig {
    api_version: &'static str,
    kind: &'static str,
    clusters: Vec<NamedCluster>,
    contexts: Vec<NamedContext>,
    current_context: String,
    users: Vec<NamedUser>,
}

#[derive(Serialize)]
struct NamedCluster {
    name: String,
    cluster: Cluster,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct Cluster {
    server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    certificate_authority_data: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    insecure_skip_tls_verify: bool,
}

#[derive(Serialize)]
struct NamedContext {
    name: String,
    context: Context,
}

#[derive(Serialize)]
struct Context {
    cluster: String,
    user: String,
}

#[derive(Serialize)]
struct NamedUser {
    name: String,
    user: User,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "kebab-case")]
struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    client_certificate_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_key_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

fn render(server: &str, ca_data: Option<String>, credential: &str, user: User) -> Result<String, KubeConfigError> {
    let insecure = ca_data.is_none();
    let config = KubeConfig {
        api_version: "v1",
        kind: "Config",
        clusters: vec![NamedCluster {
            name: CLUSTER_NAME.to_string(),
            cluster: Cluster {
                server: server.to_string(),
                certificate_authority_data: ca_data,
                insecure_skip_tls_verify: insecure,
            },
        }],
        contexts: vec![NamedContext {
            name: format!("{}@{}", credential, CLUSTER_NAME),
            context: Context {
                cluster: CLUSTER_NAME.to_string(),
                user: credential.to_string(),
            },
        }],
        current_context: format!("{}@{}", credential, CLUSTER_NAME),
        users: vec![NamedUser {
            name: credential.to_string(),
            user,
        }],
    };
    serde_yaml::to_string(&config).map_err(|e| KubeConfigError::Encode(e.to_string()))
}

pub struct KubeConfigGenerator<'a> {
    out_dir: PathBuf,
    server_url: String,
    ca_cert: &'a X509,
    ca_key: &'a PKey<Private>,
}

impl<'a> KubeConfigGenerator<'a> {
    pub fn new(
        out_dir: impl Into<PathBuf>,
        server_url: String,
        ca_cert: &'a X509,
        ca_key: &'a PKey<Private>,
    ) -> Self {
        KubeConfigGenerator {
            out_dir: out_dir.into(),
            server_url,
            ca_cert,
            ca_key,
        }
    }

    /// The four kubeconfigs an `init` produces, with their well-known
    /// credential subjects.
    pub fn generate_all(
        &self,
        node_name: &str,
        logger: &mut dyn Logger,
    ) -> Result<(), KubeConfigError> {
        self.generate(ADMIN_KUBECONFIG, "kubernetes-admin", &["system:masters"], logger)?;
        self.generate(
            KUBELET_KUBECONFIG,
            &format!("system:node:{}", node_name),
            &["system:nodes"],
            logger,
        )?;
        self.generate(
            CONTROLLER_MANAGER_KUBECONFIG,
            "system:kube-controller-manager",
            &[],
            logger,
        )?;
        self.generate(SCHEDULER_KUBECONFIG, "system:kube-scheduler", &[], logger)?;
        Ok(())
    }

    /// Mint a client certificate for `credential` and write the embedded
    /// kubeconfig. An existing file is trusted and left untouched so
    /// re-runs are cheap and never rotate credentials behind the
    /// operator's back.
    pub fn generate(
        &self,
        file_name: &str,
        credential: &str,
        organizations: &[&str],
        logger: &mut dyn Logger,
    ) -> Result<(), KubeConfigError> {
        let path = self.out_dir.join(file_name);
        if path.exists() {
            logger.log(&format!("[kubeconfig] Using existing {}", file_name));
            return Ok(());
        }

        let mut config = CertificateConfig::leaf(credential, &[ExtendedUsage::ClientAuth]);
        for organization in organizations {
            config = config.with_organization(organization);
        }
        let key = pki::generate_private_key()?;
        let cert = pki::new_signed_certificate(&config, &key, self.ca_cert, self.ca_key)?;

        let rendered = render(
            &self.server_url,
            Some(general_purpose::STANDARD.encode(self.ca_cert.to_pem()?)),
            credential,
            User {
                client_certificate_data: Some(general_purpose::STANDARD.encode(cert.to_pem()?)),
                client_key_data: Some(general_purpose::STANDARD.encode(key.private_key_to_pem_pkcs8()?)),
                token: None,
            },
        )?;

        fs::create_dir_all(&self.out_dir)?;
        write_private(&path, rendered.as_bytes())?;
        logger.log(&format!("[kubeconfig] Wrote {}", file_name));
        Ok(())
    }
}

/// Token-authenticated kubeconfig used by a joining kubelet before it has
/// a client certificate. Without a CA bundle the server can only be taken
/// on trust, which the file says explicitly.
pub fn bootstrap_kubelet_config(
    server_url: &str,
    token: &str,
    ca_pem: Option<&[u8]>,
) -> Result<String, KubeConfigError> {
    render(
        server_url,
        ca_pem.map(|pem| general_purpose::STANDARD.encode(pem)),
        "tls-bootstrap-token-user",
        User {
            token: Some(token.to_string()),
            ..Default::default()
        },
    )
}

pub fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
