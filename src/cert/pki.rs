// src/cert/pki.rs
//
// The actual X.509 plumbing, kept apart from the decide-what-to-create
// logic in operations.rs. Everything here is in-memory except the PEM
// read/write helpers, which write through a temp file and rename so a
// crash never leaves a half-written key behind.

use super::types::{AltName, CertificateConfig, ExtendedUsage};
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::rsa::Rsa;
use openssl::sha::sha256;
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509Builder, X509NameBuilder, X509Ref, X509};
use std::path::{Path, PathBuf};
use std::{fs, io};
use uuid::Uuid;

const RSA_KEY_BITS: u32 = 2048;

#[derive(Debug)]
pub enum PkiError {
    OpenSsl(ErrorStack),
    Io(io::Error),
    Parse(String),
}

impl std::fmt::Display for PkiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenSsl(e) => write!(f, "crypto operation failed: {}", e),
            Self::Io(e) => write!(f, "PKI file operation failed: {}", e),
            Self::Parse(msg) => write!(f, "cannot parse PKI material: {}", msg),
        }
    }
}

impl std::error::Error for PkiError {}

impl From<ErrorStack> for PkiError {
    fn from(error: ErrorStack) -> Self {
        PkiError::OpenSsl(error)
    }
}

impl From<io::Error> for PkiError {
    fn from(error: io::Error) -> Self {
        PkiError::Io(error)
    }
}

pub fn generate_private_key() -> Result<PKey<Private>, PkiError> {
    let rsa = Rsa::generate(RSA_KEY_BITS)?;
    Ok(PKey::from_rsa(rsa)?)
}

pub fn new_self_signed_ca(
    config: &CertificateConfig,
    key: &PKeyRef<Private>,
) -> Result<X509, PkiError> {
    let subject = subject_name(config)?;
    let serial = random_serial()?;
    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(config.validity_days)?;
    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&subject)?;
    builder.set_issuer_name(&subject)?;
    builder.set_pubkey(key)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;

    builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
    builder.append_extension(
        KeyUsage::new()
            .critical()
            .digital_signature()
            .key_cert_sign()
            .crl_sign()
            .build()?,
    )?;

    builder.sign(key, MessageDigest::sha256())?;
    Ok(builder.build())
}

pub fn new_signed_certificate(
    config: &CertificateConfig,
    key: &PKeyRef<Private>,
    ca_cert: &X509Ref,
    ca_key: &PKeyRef<Private>,
) -> Result<X509, PkiError> {
    let subject = subject_name(config)?;
    let serial = random_serial()?;
    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(config.validity_days)?;
    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&subject)?;
    builder.set_issuer_name(ca_cert.subject_name())?;
    builder.set_pubkey(key)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;

    builder.append_extension(BasicConstraints::new().critical().build()?)?;
    builder.append_extension(
        KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .build()?,
    )?;
    if !config.usages.is_empty() {
        let mut eku = ExtendedKeyUsage::new();
        for usage in &config.usages {
            match usage {
                ExtendedUsage::ServerAuth => eku.server_auth(),
                ExtendedUsage::ClientAuth => eku.client_auth(),
            };
        }
        builder.append_extension(eku.build()?)?;
    }
    if !config.alt_names.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for alt_name in &config.alt_names {
            match alt_name {
                AltName::Dns(name) => san.dns(name),
                AltName::Ip(ip) => san.ip(&ip.to_string()),
            };
        }
        let extension = san.build(&builder.x509v3_context(Some(ca_cert), None))?;
        builder.append_extension(extension)?;
    }

    builder.sign(ca_key, MessageDigest::sha256())?;
    Ok(builder.build())
}

/// True when `cert` was signed by `ca`'s key.
pub fn signed_by(cert: &X509Ref, ca: &X509Ref) -> Result<bool, PkiError> {
    let ca_key = ca.public_key()?;
    Ok(cert.verify(&ca_key)?)
}

/// Whole days until the certificate's notAfter; negative once expired.
pub fn days_until_expiry(cert: &X509Ref) -> Result<i32, PkiError> {
    let now = Asn1Time::days_from_now(0)?;
    let diff = now.diff(cert.not_after())?;
    Ok(diff.days)
}

/// The `sha256:<hex>` hash of the certificate's subject public key info,
/// as used for join discovery validation.
pub fn public_key_hash(cert: &X509Ref) -> Result<String, PkiError> {
    let der = cert.public_key()?.public_key_to_der()?;
    Ok(format!("sha256:{}", hex::encode(sha256(&der))))
}

pub fn certificate_path(dir: &Path, base_name: &str) -> PathBuf {
    dir.join(format!("{}.crt", base_name))
}

pub fn key_path(dir: &Path, base_name: &str) -> PathBuf {
    dir.join(format!("{}.key", base_name))
}

pub fn load_certificate(path: &Path) -> Result<X509, PkiError> {
    let pem = fs::read(path)?;
    X509::from_pem(&pem).map_err(|e| PkiError::Parse(format!("{}: {}", path.display(), e)))
}

pub fn load_private_key(path: &Path) -> Result<PKey<Private>, PkiError> {
    let pem = fs::read(path)?;
    PKey::private_key_from_pem(&pem)
        .map_err(|e| PkiError::Parse(format!("{}: {}", path.display(), e)))
}

pub fn write_certificate_and_key(
    dir: &Path,
    base_name: &str,
    cert: &X509Ref,
    key: &PKeyRef<Private>,
) -> Result<(), PkiError> {
    let cert_path = certificate_path(dir, base_name);
    if let Some(parent) = cert_path.parent() {
        fs::create_dir_all(parent)?;
    }
    write_atomic(&cert_path, &cert.to_pem()?, 0o644)?;
    write_atomic(&key_path(dir, base_name), &key.private_key_to_pem_pkcs8()?, 0o600)?;
    Ok(())
}

/// Service account signing keys: a bare RSA pair, no X.509 wrapper.
pub fn write_service_account_keys(dir: &Path, key: &PKeyRef<Private>) -> Result<(), PkiError> {
    fs::create_dir_all(dir)?;
    write_atomic(&dir.join("sa.key"), &key.private_key_to_pem_pkcs8()?, 0o600)?;
    write_atomic(&dir.join("sa.pub"), &key.public_key_to_pem()?, 0o644)?;
    Ok(())
}

fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<(), PkiError> {
    let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
    fs::write(&tmp, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn subject_name(config: &CertificateConfig) -> Result<openssl::x509::X509Name, PkiError> {
    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("CN", &config.common_name)?;
    for organization in &config.organization {
        name.append_entry_by_text("O", organization)?;
    }
    Ok(name.build())
}

fn random_serial() -> Result<Asn1Integer, PkiError> {
    let mut serial = BigNum::new()?;
    serial.rand(64, MsbOption::MAYBE_ZERO, false)?;
    Ok(serial.to_asn1_integer()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::types::ExtendedUsage;

    #[test]
    fn self_signed_ca_verifies_itself() {
        let key = generate_private_key().unwrap();
        let ca = new_self_signed_ca(&CertificateConfig::authority("kubernetes"), &key).unwrap();
        assert!(signed_by(&ca, &ca).unwrap());
        assert!(days_until_expiry(&ca).unwrap() > 3600);
    }

    #[test]
    fn leaf_verifies_against_its_ca_only() {
        let ca_key = generate_private_key().unwrap();
        let ca = new_self_signed_ca(&CertificateConfig::authority("kubernetes"), &ca_key).unwrap();
        let other_key = generate_private_key().unwrap();
        let other_ca =
            new_self_signed_ca(&CertificateConfig::authority("front-proxy-ca"), &other_key)
                .unwrap();

        let leaf_key = generate_private_key().unwrap();
        let config = CertificateConfig::leaf("kube-apiserver", &[ExtendedUsage::ServerAuth])
            .with_alt_names(vec![
                AltName::dns("kubernetes"),
                AltName::Ip("10.96.0.1".parse().unwrap()),
            ]);
        let leaf = new_signed_certificate(&config, &leaf_key, &ca, &ca_key).unwrap();

        assert!(signed_by(&leaf, &ca).unwrap());
        assert!(!signed_by(&leaf, &other_ca).unwrap());
    }

    #[test]
    fn written_pair_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let key = generate_private_key().unwrap();
        let ca = new_self_signed_ca(&CertificateConfig::authority("kubernetes"), &key).unwrap();

        write_certificate_and_key(dir.path(), "ca", &ca, &key).unwrap();

        let loaded = load_certificate(&certificate_path(dir.path(), "ca")).unwrap();
        assert_eq!(loaded.to_pem().unwrap(), ca.to_pem().unwrap());
        load_private_key(&key_path(dir.path(), "ca")).unwrap();
    }

    #[test]
    fn public_key_hash_is_prefixed_sha256() {
        let key = generate_private_key().unwrap();
        let ca = new_self_signed_ca(&CertificateConfig::authority("kubernetes"), &key).unwrap();
        let hash = public_key_hash(&ca).unwrap();
        assert!(hash.starts_with("sha256:"));
        assert_eq!(hash.len(), "sha256:".len() + 64);
    }
}
