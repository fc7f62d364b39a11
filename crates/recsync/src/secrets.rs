//! Secret resolution and refresh-token sealing.
//!
//! Secrets resolve from multiple sources in priority order, supporting
//! flexible deployment scenarios:
//!
//! 1. **Direct value** - For quick local testing
//! 2. **File reference** - For Docker secrets pattern (`/run/secrets/...`)
//! 3. **Env var reference** - For Kubernetes/production
//!
//! Mailbox refresh tokens are sealed at rest with AES-256-GCM under a key
//! supplied out-of-band via `RECSYNC_TOKEN_KEY`.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use secrecy::SecretString;
use std::fs;

use crate::config::Environment;

/// Error type for secret resolution and sealing failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Encryption key required: {0} must be set in production")]
    MissingKey(&'static str),

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Decryption error: {0}")]
    DecryptionError(String),

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),
}

/// Result type for secret operations.
pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from multiple sources in priority order:
/// 1. Direct value (if provided and non-empty)
/// 2. File contents (if path provided)
/// 3. Environment variable (if name provided)
///
/// Returns the resolved secret wrapped in `SecretString`, or an error if
/// no source provides a valid value.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    // Priority 1: Direct value
    if let Some(value) = direct {
        if !value.is_empty() {
            return Ok(SecretString::from(value.to_string()));
        }
    }

    // Priority 2: File
    if let Some(path) = file_path {
        if !path.is_empty() {
            let expanded = expand_home(path);
            match fs::read_to_string(&expanded) {
                Ok(content) => return Ok(SecretString::from(content.trim().to_string())),
                Err(e) => {
                    return Err(SecretError::FileReadError {
                        path: expanded,
                        source: e,
                    })
                }
            }
        }
    }

    // Priority 3: Environment variable
    if let Some(var_name) = env_var {
        if !var_name.is_empty() {
            match std::env::var(var_name) {
                Ok(value) => {
                    // Env vars may carry trailing newlines.
                    let trimmed = value.trim();
                    return Ok(SecretString::from(trimmed));
                }
                Err(std::env::VarError::NotPresent) => {
                    return Err(SecretError::EnvVarNotSet {
                        name: var_name.to_string(),
                    })
                }
                Err(std::env::VarError::NotUnicode(_)) => {
                    return Err(SecretError::EnvVarNotUnicode {
                        name: var_name.to_string(),
                    })
                }
            }
        }
    }

    Err(SecretError::NoSourceProvided)
}

/// Resolves a secret, returning None if no source is provided instead of
/// an error. Useful for optional secrets.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Checks if at least one secret source is configured (non-empty).
pub fn has_secret_source(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> bool {
    direct.is_some_and(|s| !s.is_empty())
        || file_path.is_some_and(|s| !s.is_empty())
        || env_var.is_some_and(|s| !s.is_empty())
}

/// Expands `~` to the user's home directory.
///
/// Works cross-platform: checks HOME (Unix) then USERPROFILE (Windows).
/// `~user/path` syntax is not supported.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            if path == "~" {
                return home.to_string_lossy().into_owned();
            }
            return path.replacen("~", &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

// ============================================
// Token Vault
// ============================================

/// Encryption key environment variable name.
pub const TOKEN_KEY_ENV_VAR: &str = "RECSYNC_TOKEN_KEY";

/// Nonce size for AES-256-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

/// Marker prefix for values stored by an unsealed vault.
const PLAIN_PREFIX: &str = "plain:";

/// Seals refresh tokens at rest.
///
/// With a key (64-character hex string, 32 bytes) the vault encrypts with
/// AES-256-GCM and stores `hex(nonce || ciphertext)`. Without a key the
/// behavior depends on the environment: development falls back to a marked
/// reversible encoding, production refuses to start.
pub struct TokenVault {
    mode: VaultMode,
}

enum VaultMode {
    Sealed(Box<Aes256Gcm>),
    Unsealed,
}

impl TokenVault {
    /// Creates a vault from `RECSYNC_TOKEN_KEY`.
    ///
    /// A missing key is a hard error in production and a warned fallback
    /// in development.
    pub fn from_env(environment: Environment) -> Result<Self> {
        match std::env::var(TOKEN_KEY_ENV_VAR) {
            Ok(key_hex) => Self::from_hex_key(&key_hex),
            Err(_) => match environment {
                Environment::Production => Err(SecretError::MissingKey(TOKEN_KEY_ENV_VAR)),
                Environment::Development => {
                    log::warn!(
                        "{} not set; storing refresh tokens with reversible encoding only",
                        TOKEN_KEY_ENV_VAR
                    );
                    Ok(Self::unsealed())
                }
            },
        }
    }

    /// Creates a sealing vault from a hex-encoded 32-byte key.
    pub fn from_hex_key(key_hex: &str) -> Result<Self> {
        let key_bytes = hex_decode(key_hex)
            .map_err(|e| SecretError::InvalidKey(format!("Invalid hex key: {}", e)))?;

        if key_bytes.len() != 32 {
            return Err(SecretError::InvalidKey(format!(
                "Key must be 32 bytes (64 hex chars), got {} bytes",
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| SecretError::InvalidKey(format!("Failed to create cipher: {}", e)))?;

        Ok(Self {
            mode: VaultMode::Sealed(Box::new(cipher)),
        })
    }

    /// Creates a keyless vault (development fallback and tests).
    pub fn unsealed() -> Self {
        Self {
            mode: VaultMode::Unsealed,
        }
    }

    /// Whether this vault actually encrypts.
    pub fn is_sealed(&self) -> bool {
        matches!(self.mode, VaultMode::Sealed(_))
    }

    /// Seals a token for storage.
    ///
    /// Sealed format: `hex(<12-byte nonce><ciphertext>)`. Unsealed vaults
    /// store a `plain:`-prefixed reversible encoding instead.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        match &self.mode {
            VaultMode::Sealed(cipher) => {
                let nonce_bytes = rand_bytes::<NONCE_SIZE>()?;
                let nonce = Nonce::from_slice(&nonce_bytes);

                let ciphertext = cipher
                    .encrypt(nonce, plaintext.as_bytes())
                    .map_err(|e| SecretError::EncryptionError(e.to_string()))?;

                // Prepend nonce to ciphertext
                let mut combined = nonce_bytes.to_vec();
                combined.extend(ciphertext);

                Ok(hex_encode(&combined))
            }
            VaultMode::Unsealed => {
                let encoded = base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    plaintext.as_bytes(),
                );
                Ok(format!("{}{}", PLAIN_PREFIX, encoded))
            }
        }
    }

    /// Unseals a stored token.
    ///
    /// A sealed vault also accepts `plain:` values (written before a key
    /// was configured) with a warning, so adding a key later does not break
    /// existing connections.
    pub fn decrypt(&self, stored: &str) -> Result<String> {
        if let Some(encoded) = stored.strip_prefix(PLAIN_PREFIX) {
            if self.is_sealed() {
                log::warn!("Reading a token stored before sealing was enabled");
            }
            let bytes =
                base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)
                    .map_err(|e| {
                        SecretError::DecryptionError(format!("Invalid plain encoding: {}", e))
                    })?;
            return String::from_utf8(bytes)
                .map_err(|e| SecretError::DecryptionError(format!("Invalid UTF-8: {}", e)));
        }

        let cipher = match &self.mode {
            VaultMode::Sealed(cipher) => cipher,
            VaultMode::Unsealed => {
                return Err(SecretError::DecryptionError(format!(
                    "Token was sealed; {} is required to read it",
                    TOKEN_KEY_ENV_VAR
                )))
            }
        };

        let combined = hex_decode(stored)
            .map_err(|e| SecretError::DecryptionError(format!("Invalid hex: {}", e)))?;

        if combined.len() < NONCE_SIZE {
            return Err(SecretError::DecryptionError(
                "Ciphertext too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext_bytes = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| SecretError::DecryptionError(e.to_string()))?;

        String::from_utf8(plaintext_bytes)
            .map_err(|e| SecretError::DecryptionError(format!("Invalid UTF-8: {}", e)))
    }
}

/// Encodes bytes as lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let mut result = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        result.push(HEX_CHARS[(byte >> 4) as usize] as char);
        result.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
    }
    result
}

/// Decodes hex string to bytes.
fn hex_decode(hex: &str) -> std::result::Result<Vec<u8>, String> {
    if !hex.len().is_multiple_of(2) {
        return Err("Hex string must have even length".to_string());
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| format!("Invalid hex at position {}: {}", i, e))
        })
        .collect()
}

/// Generates random bytes using getrandom.
fn rand_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    // Use getrandom for cryptographically secure random bytes
    // This is available on all platforms including WASM
    getrandom::fill(&mut bytes).map_err(|e| {
        SecretError::EncryptionError(format!("Failed to generate random bytes: {}", e))
    })?;
    Ok(bytes)
}
