// src/cert/verification.rs
//
// Read-only inspection of the certificates directory, for the
// `certs check-expiration` command. Parsing uses x509-parser: nothing in
// here ever needs a private key or mutates the files it looks at.

use chrono::{DateTime, TimeZone, Utc};
use glob::glob;
use serde::Serialize;
use std::io;
use std::path::Path;

#[derive(Debug)]
pub enum VerificationError {
    Io(io::Error),
    Pattern(String),
    Parse { path: String, message: String },
}

impl std::fmt::Display for VerificationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "cannot read certificate: {}", e),
            Self::Pattern(msg) => write!(f, "bad certificate glob: {}", msg),
            Self::Parse { path, message } => {
                write!(f, "cannot parse certificate {}: {}", path, message)
            }
        }
    }
}

impl std::error::Error for VerificationError {}

impl From<io::Error> for VerificationError {
    fn from(error: io::Error) -> Self {
        VerificationError::Io(error)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CertificateExpiration {
    /// Path relative to the certificates directory, without extension.
    pub name: String,
    pub subject: String,
    pub issuer: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires: DateTime<Utc>,
    pub days_remaining: i64,
    pub is_ca: bool,
}

/// Inspect every `*.crt` under the certificates directory (including the
/// etcd subdirectory) and report residual validity.
pub fn check_expiration(cert_dir: &Path) -> Result<Vec<CertificateExpiration>, VerificationError> {
    let pattern = format!("{}/**/*.crt", cert_dir.display());
    let mut report = Vec::new();

    for entry in glob(&pattern).map_err(|e| VerificationError::Pattern(e.to_string()))? {
        let path = entry.map_err(|e| VerificationError::Pattern(e.to_string()))?;
        report.push(inspect_certificate(cert_dir, &path)?);
    }

    report.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(report)
}

fn inspect_certificate(
    cert_dir: &Path,
    path: &Path,
) -> Result<CertificateExpiration, VerificationError> {
    let parse_error = |message: String| VerificationError::Parse {
        path: path.display().to_string(),
        message,
    };

    let pem_bytes = std::fs::read(path)?;
    let (_, pem) = x509_parser::pem::parse_x509_pem(&pem_bytes)
        .map_err(|e| parse_error(e.to_string()))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| parse_error(e.to_string()))?;

    let not_after = cert.validity().not_after.timestamp();
    let expires = Utc
        .timestamp_opt(not_after, 0)
        .single()
        .ok_or_else(|| parse_error("notAfter is out of range".to_string()))?;
    let days_remaining = (expires - Utc::now()).num_days();

    let name = path
        .strip_prefix(cert_dir)
        .unwrap_or(path)
        .with_extension("")
        .display()
        .to_string();

    Ok(CertificateExpiration {
        name,
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        expires,
        days_remaining,
        is_ca: cert.is_ca(),
    })
}

pub fn format_expiration_table(report: &[CertificateExpiration]) -> String {
    let mut out = String::from("CERTIFICATE                   EXPIRES               RESIDUAL  CA\n");
    for row in report {
        out.push_str(&format!(
            "{:<29} {:<21} {:>6}d  {}\n",
            row.name,
            row.expires.format("%Y-%m-%d %H:%M UTC"),
            row.days_remaining,
            if row.is_ca { "yes" } else { "no" },
        ));
    }
    out
}
