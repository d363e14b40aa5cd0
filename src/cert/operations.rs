// src/cert/operations.rs
//
// Decides, per certificate, whether the artifact on disk can be reused or
// a new one must be minted. Re-running with an unchanged configuration is
// a no-op: valid files are left exactly as they are.

use super::pki::{self, PkiError};
use super::types::{CertSpec, CertificateConfig};
use crate::api::internal::InitConfiguration;
use crate::config::timeouts;
use crate::utils::logging::Logger;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::{fs, io};

#[derive(Debug)]
pub enum CertError {
    Pki(PkiError),
    Io(io::Error),
    /// A certificate at rest is not signed by the CA that should have
    /// signed it. Regenerating silently could desynchronize a running
    /// cluster's trust, so this needs operator intervention.
    ChainMismatch { cert: String, ca: String },
    /// The signing CA on disk is hard-expired; nothing it signs would be
    /// accepted.
    ExpiredAuthority { name: String },
    /// A leaf was requested before its declared CA; the cert list is
    /// malformed.
    UnresolvedAuthority { cert: String, ca: String },
}

impl std::fmt::Display for CertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pki(e) => write!(f, "{}", e),
            Self::Io(e) => write!(f, "certificate file operation failed: {}", e),
            Self::ChainMismatch { cert, ca } => write!(
                f,
                "certificate {} is not signed by expected CA {}; remove the stale files \
                 and re-run",
                cert, ca
            ),
            Self::ExpiredAuthority { name } => {
                write!(f, "certificate authority {} has expired", name)
            }
            Self::UnresolvedAuthority { cert, ca } => {
                write!(f, "certificate {} references unknown CA {}", cert, ca)
            }
        }
    }
}

impl std::error::Error for CertError {}

impl From<PkiError> for CertError {
    fn from(error: PkiError) -> Self {
        CertError::Pki(error)
    }
}

impl From<io::Error> for CertError {
    fn from(error: io::Error) -> Self {
        CertError::Io(error)
    }
}

pub struct CertificateOperations<'a> {
    logger: &'a mut dyn Logger,
    cert_dir: PathBuf,
    staging: Option<PathBuf>,
    /// Authorities resolved so far, keyed by cert-list name. Leaves are
    /// signed with the in-memory key, never by re-reading disk.
    authorities: HashMap<String, (X509, PKey<Private>)>,
}

impl<'a> CertificateOperations<'a> {
    pub fn new(logger: &'a mut dyn Logger, cert_dir: impl Into<PathBuf>) -> Self {
        CertificateOperations {
            logger,
            cert_dir: cert_dir.into(),
            staging: None,
            authorities: HashMap::new(),
        }
    }

    /// Dry-run mode: existing artifacts are still read and verified
    /// against `cert_dir`, but anything newly generated lands under
    /// `staging`. The caller owns the staging directory's lifetime.
    pub fn staged(
        logger: &'a mut dyn Logger,
        cert_dir: impl Into<PathBuf>,
        staging: impl Into<PathBuf>,
    ) -> Result<Self, CertError> {
        let staging = staging.into();
        fs::create_dir_all(&staging)?;
        Ok(CertificateOperations {
            logger,
            cert_dir: cert_dir.into(),
            staging: Some(staging),
            authorities: HashMap::new(),
        })
    }

    /// Where newly generated files go: the staging directory in dry-run
    /// mode, the real certificates directory otherwise.
    pub fn write_dir(&self) -> &Path {
        self.staging.as_deref().unwrap_or(&self.cert_dir)
    }

    /// Process the given cert list in order. The list must declare every
    /// CA before its dependents; `default_certificate_list` does.
    pub fn ensure_certificates(
        &mut self,
        cfg: &InitConfiguration,
        specs: &[CertSpec],
    ) -> Result<(), CertError> {
        for spec in specs {
            let config = (spec.config)(cfg);
            if spec.is_ca() {
                self.ensure_authority(spec, &config)?;
            } else {
                self.ensure_leaf(spec, &config)?;
            }
        }
        Ok(())
    }

    fn ensure_authority(
        &mut self,
        spec: &CertSpec,
        config: &CertificateConfig,
    ) -> Result<(), CertError> {
        if let Some((cert, key)) = self.load_existing(spec.base_name)? {
            let days = pki::days_until_expiry(&cert)?;
            if days < 0 {
                return Err(CertError::ExpiredAuthority {
                    name: spec.name.to_string(),
                });
            }
            self.warn_if_near_expiry(spec.name, days);
            self.logger
                .log(&format!("[certs] Using existing {} certificate authority", spec.name));
            self.authorities
                .insert(spec.name.to_string(), (cert, key));
            return Ok(());
        }

        self.logger
            .log(&format!("[certs] Generating {} certificate authority", spec.name));
        let key = pki::generate_private_key()?;
        let cert = pki::new_self_signed_ca(config, &key)?;
        pki::write_certificate_and_key(self.write_dir(), spec.base_name, &cert, &key)?;
        self.authorities.insert(spec.name.to_string(), (cert, key));
        Ok(())
    }

    fn ensure_leaf(&mut self, spec: &CertSpec, config: &CertificateConfig) -> Result<(), CertError> {
        let (ca_cert, ca_key) = self
            .authorities
            .get(spec.ca_name)
            .cloned()
            .ok_or_else(|| CertError::UnresolvedAuthority {
                cert: spec.name.to_string(),
                ca: spec.ca_name.to_string(),
            })?;

        if let Some((cert, _key)) = self.load_existing(spec.base_name)? {
            if !pki::signed_by(&cert, &ca_cert)? {
                return Err(CertError::ChainMismatch {
                    cert: spec.name.to_string(),
                    ca: spec.ca_name.to_string(),
                });
            }
            let days = pki::days_until_expiry(&cert)?;
            if days >= 0 {
                self.warn_if_near_expiry(spec.name, days);
                self.logger.log(&format!(
                    "[certs] Using existing {} certificate and key", spec.name
                ));
                return Ok(());
            }
            self.logger.warn_log(
                "CertificateExpired",
                &format!("certificate {} has expired; regenerating", spec.name),
            );
        }

        self.logger
            .log(&format!("[certs] Generating {} certificate and key", spec.name));
        let key = pki::generate_private_key()?;
        let cert = pki::new_signed_certificate(config, &key, &ca_cert, &ca_key)?;
        pki::write_certificate_and_key(self.write_dir(), spec.base_name, &cert, &key)?;
        Ok(())
    }

    /// The service account signing pair has no certificate to validate;
    /// an existing parseable pair is always reused.
    pub fn ensure_service_account_keys(&mut self) -> Result<(), CertError> {
        for dir in [self.write_dir().to_path_buf(), self.cert_dir.clone()] {
            let key_file = dir.join("sa.key");
            if key_file.exists() && dir.join("sa.pub").exists() {
                pki::load_private_key(&key_file)?;
                self.logger
                    .log("[certs] Using existing sa key pair");
                return Ok(());
            }
        }
        self.logger.log("[certs] Generating sa key pair");
        let key = pki::generate_private_key()?;
        pki::write_service_account_keys(self.write_dir(), &key)?;
        Ok(())
    }

    /// Look for an existing pair: staging first (a dry run may just have
    /// created it), then the real directory. A certificate without its
    /// key counts as absent and gets regenerated.
    fn load_existing(
        &mut self,
        base_name: &str,
    ) -> Result<Option<(X509, PKey<Private>)>, CertError> {
        for dir in [self.write_dir().to_path_buf(), self.cert_dir.clone()] {
            let cert_path = pki::certificate_path(&dir, base_name);
            let key_file = pki::key_path(&dir, base_name);
            if cert_path.exists() {
                if !key_file.exists() {
                    self.logger.warn_log(
                        "MissingKey",
                        &format!(
                            "certificate {} exists without its key; regenerating both",
                            cert_path.display()
                        ),
                    );
                    return Ok(None);
                }
                let cert = pki::load_certificate(&cert_path)?;
                let key = pki::load_private_key(&key_file)?;
                return Ok(Some((cert, key)));
            }
        }
        Ok(None)
    }

    fn warn_if_near_expiry(&mut self, name: &str, days: i32) {
        let warn_below = timeouts::active().certificate_expiry_warning_days;
        if i64::from(days) < warn_below {
            self.logger.warn_log(
                "CertificateExpiration",
                &format!("certificate {} expires in {} days", name, days),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::list::default_certificate_list;
    use crate::utils::logging::MemoryLogger;
    use std::time::SystemTime;

    fn test_config() -> InitConfiguration {
        let mut cfg = InitConfiguration::default();
        cfg.node_registration.name = "cp-0".to_string();
        cfg.local_api_endpoint.advertise_address = "192.168.0.10".to_string();
        cfg.cluster.networking.service_subnet = "10.96.0.0/12".to_string();
        cfg.cluster.networking.dns_domain = "cluster.local".to_string();
        cfg
    }

    fn mtimes(dir: &Path) -> Vec<(PathBuf, SystemTime)> {
        let mut out = Vec::new();
        for entry in walk(dir) {
            let meta = fs::metadata(&entry).unwrap();
            out.push((entry, meta.modified().unwrap()));
        }
        out.sort();
        out
    }

    fn walk(dir: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                files.extend(walk(&path));
            } else {
                files.push(path);
            }
        }
        files
    }

    #[test]
    fn full_list_is_created_then_reused_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config();
        let specs = default_certificate_list(&cfg);

        let mut logger = MemoryLogger::new();
        let mut ops = CertificateOperations::new(&mut logger, dir.path());
        ops.ensure_certificates(&cfg, &specs).unwrap();
        ops.ensure_service_account_keys().unwrap();
        drop(ops);

        assert!(dir.path().join("ca.crt").exists());
        assert!(dir.path().join("apiserver.crt").exists());
        assert!(dir.path().join("etcd/ca.crt").exists());
        assert!(dir.path().join("sa.pub").exists());

        let before = mtimes(dir.path());

        let mut logger = MemoryLogger::new();
        let mut ops = CertificateOperations::new(&mut logger, dir.path());
        ops.ensure_certificates(&cfg, &specs).unwrap();
        ops.ensure_service_account_keys().unwrap();
        drop(ops);

        assert_eq!(before, mtimes(dir.path()));
        assert!(logger.contains("Using existing ca certificate authority"));
    }

    #[test]
    fn stale_leaf_from_foreign_ca_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config();
        let specs = default_certificate_list(&cfg);

        // Generate everything, then replace the kubernetes CA pair so the
        // apiserver cert on disk no longer chains to it.
        let mut logger = MemoryLogger::new();
        let mut ops = CertificateOperations::new(&mut logger, dir.path());
        ops.ensure_certificates(&cfg, &specs).unwrap();
        drop(ops);

        fs::remove_file(dir.path().join("ca.crt")).unwrap();
        fs::remove_file(dir.path().join("ca.key")).unwrap();

        let mut logger = MemoryLogger::new();
        let mut ops = CertificateOperations::new(&mut logger, dir.path());
        let err = ops.ensure_certificates(&cfg, &specs).unwrap_err();
        assert!(matches!(err, CertError::ChainMismatch { .. }));
    }

    #[test]
    fn staged_run_leaves_the_target_directory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("pki");
        let staging = dir.path().join("staging");
        let cfg = test_config();
        let specs = default_certificate_list(&cfg);

        let mut logger = MemoryLogger::new();
        let mut ops = CertificateOperations::staged(&mut logger, &target, &staging).unwrap();
        ops.ensure_certificates(&cfg, &specs).unwrap();
        ops.ensure_service_account_keys().unwrap();
        drop(ops);

        assert!(staging.join("ca.crt").exists());
        assert!(staging.join("sa.key").exists());
        assert!(!target.exists());
    }

    #[test]
    fn staged_run_reuses_and_verifies_the_target_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("pki");
        let staging = dir.path().join("staging");
        let cfg = test_config();
        let specs = default_certificate_list(&cfg);

        let mut logger = MemoryLogger::new();
        let mut ops = CertificateOperations::new(&mut logger, &target);
        ops.ensure_certificates(&cfg, &specs).unwrap();
        drop(ops);

        // Valid artifacts in the target are reused, not re-minted into
        // staging.
        let mut logger = MemoryLogger::new();
        let mut ops = CertificateOperations::staged(&mut logger, &target, &staging).unwrap();
        ops.ensure_certificates(&cfg, &specs).unwrap();
        drop(ops);
        assert!(!staging.join("ca.crt").exists());
        assert!(logger.contains("Using existing ca certificate authority"));

        // A leaf in the target signed by a CA other than the one that
        // would be used is still fatal under staging.
        fs::remove_file(target.join("ca.crt")).unwrap();
        fs::remove_file(target.join("ca.key")).unwrap();
        let mut logger = MemoryLogger::new();
        let mut ops = CertificateOperations::staged(&mut logger, &target, &staging).unwrap();
        let err = ops.ensure_certificates(&cfg, &specs).unwrap_err();
        assert!(matches!(err, CertError::ChainMismatch { .. }));
    }

    #[test]
    fn leaf_before_its_ca_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config();
        let specs = default_certificate_list(&cfg);
        let leaf_only: Vec<_> = specs.iter().filter(|s| !s.is_ca()).cloned().collect();

        let mut logger = MemoryLogger::new();
        let mut ops = CertificateOperations::new(&mut logger, dir.path());
        let err = ops.ensure_certificates(&cfg, &leaf_only).unwrap_err();
        assert!(matches!(err, CertError::UnresolvedAuthority { .. }));
    }

    #[test]
    fn external_etcd_list_creates_no_etcd_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config();
        cfg.cluster.etcd = crate::api::internal::Etcd::External(
            crate::api::internal::ExternalEtcd {
                endpoints: vec!["https://etcd0:2379".to_string()],
                ..Default::default()
            },
        );
        let specs = default_certificate_list(&cfg);

        let mut logger = MemoryLogger::new();
        let mut ops = CertificateOperations::new(&mut logger, dir.path());
        ops.ensure_certificates(&cfg, &specs).unwrap();
        drop(ops);

        assert!(!dir.path().join("etcd").exists());
        assert!(!dir.path().join("apiserver-etcd-client.crt").exists());
    }
}
