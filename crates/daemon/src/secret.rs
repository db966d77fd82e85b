// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Secret sink: resolves symbolic credential references from ordered
//! backends. First hit wins. Raw secret values are handed to drivers at
//! construction time and nowhere else.
//!
//! Backends:
//! - `env` — process environment, reference name used verbatim.
//! - `file:<path>` — JSON map on disk, either plain or an AES-256-GCM
//!   envelope unlocked by `HEARTH_SECRETS_PASSPHRASE`.
//! - `manager:<url>` — external secret manager, `GET <url>/v1/secret/<name>`
//!   returning `{"value": "..."}`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use serde::Deserialize;

/// Env var holding the passphrase for encrypted secrets files.
pub const PASSPHRASE_ENV: &str = "HEARTH_SECRETS_PASSPHRASE";

const PBKDF2_ITERATIONS: u32 = 120_000;
const MANAGER_TIMEOUT: Duration = Duration::from_secs(5);

/// One configured backend, in resolution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretBackend {
    Env,
    File(PathBuf),
    Manager(String),
}

impl SecretBackend {
    /// Parse a backend spec string from config: `env`, `file:<path>`,
    /// `manager:<url>`.
    pub fn parse(spec: &str) -> Result<Self, SecretError> {
        if spec == "env" {
            return Ok(Self::Env);
        }
        if let Some(path) = spec.strip_prefix("file:") {
            return Ok(Self::File(PathBuf::from(path)));
        }
        if let Some(url) = spec.strip_prefix("manager:") {
            return Ok(Self::Manager(url.trim_end_matches('/').to_owned()));
        }
        Err(SecretError::BadBackendSpec(spec.to_owned()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("unrecognized secrets backend spec: {0}")]
    BadBackendSpec(String),
    #[error("failed to read secrets file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("secrets file {path} is not a JSON string map")]
    FileFormat { path: PathBuf },
    #[error("secrets file {path} is encrypted and {PASSPHRASE_ENV} is not set")]
    MissingPassphrase { path: PathBuf },
    #[error("failed to decrypt secrets file {path}")]
    Decrypt { path: PathBuf },
    #[error("failed to encrypt secrets payload")]
    Encrypt,
}

/// Encrypted secrets file envelope, all fields base64.
#[derive(Debug, Deserialize)]
struct EncryptedEnvelope {
    kdf: String,
    salt: String,
    nonce: String,
    ciphertext: String,
}

/// Resolves credential references against the configured backend chain.
pub struct SecretStore {
    backends: Vec<SecretBackend>,
    /// Contents of file backends, decrypted and loaded once at construction.
    file_secrets: Vec<HashMap<String, String>>,
    client: reqwest::Client,
}

impl SecretStore {
    /// Build a store from config backend specs. File backends are read (and
    /// decrypted) eagerly so a bad file fails at startup, not mid-probe.
    pub fn from_specs(specs: &[String]) -> Result<Self, SecretError> {
        let mut backends = Vec::with_capacity(specs.len());
        for spec in specs {
            backends.push(SecretBackend::parse(spec)?);
        }
        if backends.is_empty() {
            backends.push(SecretBackend::Env);
        }

        let mut file_secrets = Vec::new();
        for backend in &backends {
            if let SecretBackend::File(path) = backend {
                file_secrets.push(load_secrets_file(path)?);
            }
        }

        let client = reqwest::Client::builder()
            .timeout(MANAGER_TIMEOUT)
            .build()
            .unwrap_or_default();

        Ok(Self { backends, file_secrets, client })
    }

    /// Resolve a symbolic reference. First backend with a hit wins.
    pub async fn resolve(&self, name: &str) -> Option<String> {
        let mut file_idx = 0;
        for backend in &self.backends {
            match backend {
                SecretBackend::Env => {
                    if let Ok(value) = std::env::var(name) {
                        if !value.is_empty() {
                            return Some(value);
                        }
                    }
                }
                SecretBackend::File(_) => {
                    let secrets = self.file_secrets.get(file_idx);
                    file_idx += 1;
                    if let Some(value) = secrets.and_then(|m| m.get(name)) {
                        return Some(value.clone());
                    }
                }
                SecretBackend::Manager(url) => {
                    if let Some(value) = self.fetch_from_manager(url, name).await {
                        return Some(value);
                    }
                }
            }
        }
        None
    }

    async fn fetch_from_manager(&self, url: &str, name: &str) -> Option<String> {
        #[derive(Deserialize)]
        struct ManagerResponse {
            value: String,
        }

        let endpoint = format!("{url}/v1/secret/{name}");
        let resp = match self.client.get(&endpoint).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(name, err = %e, "secret manager unreachable");
                return None;
            }
        };
        if !resp.status().is_success() {
            return None;
        }
        resp.json::<ManagerResponse>().await.ok().map(|r| r.value)
    }
}

/// Read a secrets file: plain JSON string map, or an encrypted envelope.
fn load_secrets_file(path: &Path) -> Result<HashMap<String, String>, SecretError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|source| SecretError::FileRead { path: path.to_path_buf(), source })?;

    if let Ok(envelope) = serde_json::from_str::<EncryptedEnvelope>(&contents) {
        return decrypt_envelope(path, &envelope);
    }

    serde_json::from_str::<HashMap<String, String>>(&contents)
        .map_err(|_| SecretError::FileFormat { path: path.to_path_buf() })
}

fn decrypt_envelope(
    path: &Path,
    envelope: &EncryptedEnvelope,
) -> Result<HashMap<String, String>, SecretError> {
    if envelope.kdf != "pbkdf2-sha256" {
        return Err(SecretError::Decrypt { path: path.to_path_buf() });
    }
    let passphrase = std::env::var(PASSPHRASE_ENV)
        .map_err(|_| SecretError::MissingPassphrase { path: path.to_path_buf() })?;

    let b64 = base64::engine::general_purpose::STANDARD;
    let salt = b64
        .decode(&envelope.salt)
        .map_err(|_| SecretError::Decrypt { path: path.to_path_buf() })?;
    let nonce = b64
        .decode(&envelope.nonce)
        .map_err(|_| SecretError::Decrypt { path: path.to_path_buf() })?;
    let ciphertext = b64
        .decode(&envelope.ciphertext)
        .map_err(|_| SecretError::Decrypt { path: path.to_path_buf() })?;
    if nonce.len() != 12 {
        return Err(SecretError::Decrypt { path: path.to_path_buf() });
    }

    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(
        passphrase.as_bytes(),
        &salt,
        PBKDF2_ITERATIONS,
        &mut key,
    );

    let cipher = Aes256Gcm::new((&key).into());
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
        .map_err(|_| SecretError::Decrypt { path: path.to_path_buf() })?;

    serde_json::from_slice::<HashMap<String, String>>(&plaintext)
        .map_err(|_| SecretError::FileFormat { path: path.to_path_buf() })
}

/// Encrypt a secrets map into the envelope format. Used by tests and by
/// operators preparing a secrets file out of band.
pub fn encrypt_secrets(
    secrets: &HashMap<String, String>,
    passphrase: &str,
    salt: &[u8; 16],
    nonce: &[u8; 12],
) -> Result<String, SecretError> {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);

    let b64 = base64::engine::general_purpose::STANDARD;
    let plaintext = serde_json::to_vec(secrets).map_err(|_| SecretError::Encrypt)?;
    let cipher = Aes256Gcm::new((&key).into());
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(nonce), plaintext.as_ref())
        .map_err(|_| SecretError::Encrypt)?;

    serde_json::to_string_pretty(&serde_json::json!({
        "kdf": "pbkdf2-sha256",
        "salt": b64.encode(salt),
        "nonce": b64.encode(nonce),
        "ciphertext": b64.encode(ciphertext),
    }))
    .map_err(|_| SecretError::Encrypt)
}

#[cfg(test)]
#[path = "secret_tests.rs"]
mod tests;
