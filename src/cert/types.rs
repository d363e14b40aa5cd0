// src/cert/types.rs
use crate::api::internal::InitConfiguration;
use std::net::IpAddr;

/// Subject alternative name entry. IPs and DNS names end up in different
/// SAN slots, so the distinction is kept from the start.
#[derive(Debug, Clone, PartialEq)]
pub enum AltName {
    Dns(String),
    Ip(IpAddr),
}

impl AltName {
    pub fn dns(name: impl Into<String>) -> Self {
        AltName::Dns(name.into())
    }

    /// Parse a string as an IP address, falling back to a DNS name.
    pub fn parse(value: &str) -> Self {
        match value.parse::<IpAddr>() {
            Ok(ip) => AltName::Ip(ip),
            Err(_) => AltName::Dns(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExtendedUsage {
    ServerAuth,
    ClientAuth,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CertificateConfig {
    pub common_name: String,
    pub organization: Vec<String>,
    pub alt_names: Vec<AltName>,
    pub usages: Vec<ExtendedUsage>,
    pub validity_days: u32,
    pub is_ca: bool,
}

impl CertificateConfig {
    pub fn authority(common_name: &str) -> Self {
        CertificateConfig {
            common_name: common_name.to_string(),
            organization: Vec::new(),
            alt_names: Vec::new(),
            usages: Vec::new(),
            validity_days: 3650,
            is_ca: true,
        }
    }

    pub fn leaf(common_name: &str, usages: &[ExtendedUsage]) -> Self {
        CertificateConfig {
            common_name: common_name.to_string(),
            organization: Vec::new(),
            alt_names: Vec::new(),
            usages: usages.to_vec(),
            validity_days: 375,
            is_ca: false,
        }
    }

    pub fn with_organization(mut self, organization: &str) -> Self {
        self.organization.push(organization.to_string());
        self
    }

    pub fn with_alt_names(mut self, alt_names: Vec<AltName>) -> Self {
        self.alt_names = alt_names;
        self
    }
}

/// Describes one certificate/key pair the cluster needs. `ca_name` is empty
/// when the entry is itself an authority; dependents name their signer and
/// must come after it in any list handed to the operations layer.
#[derive(Clone)]
pub struct CertSpec {
    pub name: &'static str,
    /// File stem under the certificates directory, possibly with a
    /// subdirectory (`etcd/server`).
    pub base_name: &'static str,
    pub ca_name: &'static str,
    pub config: fn(&InitConfiguration) -> CertificateConfig,
}

impl CertSpec {
    pub fn is_ca(&self) -> bool {
        self.ca_name.is_empty()
    }
}

impl std::fmt::Debug for CertSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertSpec")
            .field("name", &self.name)
            .field("base_name", &self.base_name)
            .field("ca_name", &self.ca_name)
            .finish()
    }
}
