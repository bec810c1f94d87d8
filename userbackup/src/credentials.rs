//! Encryption secrets for the command line.
//!
//! Secrets are never accepted as arguments. A base64 raw key in
//! `USERBACKUP_KEY` wins over a password in `USERBACKUP_PASSWORD`; with
//! neither set the password is read from the terminal.

use userbackup_core::{ChunkEncryptor, Result, UserBackupError};
use zeroize::Zeroizing;

/// Base64 32-byte AES key
pub const KEY_ENV: &str = "USERBACKUP_KEY";
/// Password for Argon2id key derivation
pub const PASSWORD_ENV: &str = "USERBACKUP_PASSWORD";

/// Whether a prompted password protects a new artifact or opens one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// Asks twice and requires both entries to match
    Create,
    /// Asks once
    Unlock,
}

/// Where the encryption secret comes from.
pub enum SecretSource {
    /// Base64 key text
    RawKey(Zeroizing<String>),
    Password(Zeroizing<String>),
    /// Ask on the terminal
    Prompt,
}

impl std::fmt::Debug for SecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::RawKey(_) => "RawKey",
            Self::Password(_) => "Password",
            Self::Prompt => "Prompt",
        };
        f.write_str(kind)
    }
}

impl SecretSource {
    /// Picks a source from the two environment values; blank values count
    /// as unset.
    pub fn select(key: Option<String>, password: Option<String>) -> Self {
        let present = |value: Option<String>| value.filter(|v| !v.trim().is_empty()).map(Zeroizing::new);

        if let Some(key) = present(key) {
            Self::RawKey(key)
        } else if let Some(password) = present(password) {
            Self::Password(password)
        } else {
            Self::Prompt
        }
    }

    /// Reads [`KEY_ENV`] and [`PASSWORD_ENV`].
    pub fn from_env() -> Self {
        Self::select(std::env::var(KEY_ENV).ok(), std::env::var(PASSWORD_ENV).ok())
    }
}

/// Reads a password from the terminal without echo.
#[cfg(feature = "encryption")]
fn prompt_password(mode: PromptMode) -> Result<Zeroizing<String>> {
    let read = |prompt: &str| {
        rpassword::prompt_password(prompt)
            .map(Zeroizing::new)
            .map_err(|e| UserBackupError::configuration(format!("Failed to read password: {}", e)))
    };

    let password = read("Enter encryption password: ")?;
    if password.is_empty() {
        return Err(UserBackupError::configuration("Password cannot be empty"));
    }

    if mode == PromptMode::Create {
        let confirm = read("Confirm encryption password: ")?;
        if *password != *confirm {
            return Err(UserBackupError::configuration("Passwords do not match"));
        }
    }

    Ok(password)
}

/// Builds the chunk encryptor for `source`, prompting if needed.
///
/// # Errors
/// Returns a `Configuration` error for a malformed key, an unreadable or
/// mismatched password, or a build without the `encryption` feature.
#[cfg(feature = "encryption")]
pub fn encryptor(source: SecretSource, mode: PromptMode, chunk_size: usize) -> Result<ChunkEncryptor> {
    use std::sync::Arc;
    use userbackup_core::encryption::AesGcmCipher;

    let cipher = match source {
        SecretSource::RawKey(key) => AesGcmCipher::with_base64_key(&key)?,
        SecretSource::Password(password) => AesGcmCipher::with_password(password.as_str()),
        SecretSource::Prompt => AesGcmCipher::with_password(prompt_password(mode)?.as_str()),
    };

    tracing::debug!("Using {:?} for chunk encryption", cipher);
    Ok(ChunkEncryptor::with_chunk_size(Arc::new(cipher), chunk_size))
}

#[cfg(not(feature = "encryption"))]
pub fn encryptor(_source: SecretSource, _mode: PromptMode, _chunk_size: usize) -> Result<ChunkEncryptor> {
    Err(UserBackupError::configuration(
        "Encryption not available. Compile with --features encryption",
    ))
}
