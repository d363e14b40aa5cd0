// src/phases/token.rs
//
// Bootstrap token handling: generation, validation against the wire
// format, and the Secret document the kubelet bootstrap flow consumes.

use crate::api::internal::BootstrapToken;
use crate::cert::pki::PkiError;
use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

const TOKEN_ID_LEN: usize = 6;
const TOKEN_SECRET_LEN: usize = 16;
const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Random token in the `[a-z0-9]{6}.[a-z0-9]{16}` wire format.
pub fn generate_bootstrap_token() -> Result<String, PkiError> {
    let mut bytes = [0u8; TOKEN_ID_LEN + TOKEN_SECRET_LEN];
    openssl::rand::rand_bytes(&mut bytes)?;
    let mut token = String::with_capacity(TOKEN_ID_LEN + 1 + TOKEN_SECRET_LEN);
    for (i, byte) in bytes.iter().enumerate() {
        if i == TOKEN_ID_LEN {
            token.push('.');
        }
        token.push(TOKEN_ALPHABET[*byte as usize % TOKEN_ALPHABET.len()] as char);
    }
    Ok(token)
}

pub fn is_valid_token(token: &str) -> bool {
    let mut parts = token.splitn(2, '.');
    let id = parts.next().unwrap_or("");
    let secret = parts.next().unwrap_or("");
    id.len() == TOKEN_ID_LEN
        && secret.len() == TOKEN_SECRET_LEN
        && id.bytes().chain(secret.bytes()).all(|b| TOKEN_ALPHABET.contains(&b))
}

#[derive(Serialize)]
struct Secret {
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    kind: &'static str,
    metadata: SecretMeta,
    #[serde(rename = "type")]
    secret_type: &'static str,
    #[serde(rename = "stringData")]
    string_data: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct SecretMeta {
    name: String,
    namespace: &'static str,
}

/// Renders the `bootstrap-token-<id>` Secret for a token. Returns None
/// for tokens that do not match the wire format.
pub fn bootstrap_token_secret(token: &BootstrapToken) -> Option<String> {
    if !is_valid_token(&token.token) {
        return None;
    }
    let (id, secret) = token.token.split_once('.')?;

    let mut data = BTreeMap::new();
    data.insert("token-id".to_string(), id.to_string());
    data.insert("token-secret".to_string(), secret.to_string());
    if !token.description.is_empty() {
        data.insert("description".to_string(), token.description.clone());
    }
    if let Some(ttl_hours) = token.ttl_hours {
        let expiration = Utc::now() + Duration::hours(ttl_hours as i64);
        data.insert(
            "expiration".to_string(),
            expiration.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        );
    }
    for usage in &token.usages {
        data.insert(format!("usage-bootstrap-{}", usage), "true".to_string());
    }
    if !token.groups.is_empty() {
        data.insert("auth-extra-groups".to_string(), token.groups.join(","));
    }

    let document = Secret {
        api_version: "v1",
        kind: "Secret",
        metadata: SecretMeta {
            name: format!("bootstrap-token-{}", id),
            namespace: "kube-system",
        },
        secret_type: "bootstrap.kubernetes.io/token",
        string_data: data,
    };
    serde_yaml::to_string(&document).ok()
}
