// src/cert/mod.rs
pub mod list;
pub mod operations;
pub mod pki;
pub mod types;
pub mod verification;

pub use list::default_certificate_list;
pub use operations::{CertError, CertificateOperations};
pub use types::{AltName, CertSpec, CertificateConfig, ExtendedUsage};
