//! AES-GCM-256 cipher provider with Argon2id key derivation.
//!
//! Each sealed block becomes one unit: the base64 encoding of a compact JSON
//! object holding the algorithm, nonce, ciphertext, tag and, for
//! password-derived keys, the KDF parameters. A reader with the password can
//! therefore open any unit on its own.
//!
//! # Security Guarantees
//! - AES-GCM-256 authenticated encryption with a fresh 96-bit nonce per unit
//! - Argon2id (v1.3, 64 MiB, t=3, p=4, 16-byte salt) for password keys
//! - Derived and raw keys are zeroed on drop
//! - Unit KDF parameters are capped at 256 MiB, t=10, p=16, and a reader
//!   derives keys for at most two parameter sets
//!
//! # Cryptographic Standards
//! - AES-GCM: NIST SP 800-38D
//! - Argon2id: RFC 9106

use super::chunked::CipherProvider;
use crate::Result;
use crate::error::UserBackupError;
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, rand_core::RngCore},
};
use argon2::{
    Argon2, Params, Version,
    password_hash::{PasswordHasher, SaltString},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use zeroize::Zeroizing;

const ALGORITHM: &str = "AES-GCM-256";

/// NIST SP 800-38D §8.2.1
const AES_GCM_NONCE_SIZE: usize = 12;

/// NIST SP 800-38D §5.2.1, full-length tag
const AES_GCM_TAG_SIZE: usize = 16;

/// AES-256
const AES_KEY_SIZE: usize = 32;

/// RFC 9106 §4 minimum
const ARGON2_SALT_SIZE: usize = 16;

/// 64 MiB, in KiB
const ARGON2_MEMORY_COST: u32 = 65536;

const ARGON2_TIME_COST: u32 = 3;

const ARGON2_PARALLELISM: u32 = 4;

/// 256 MiB, in KiB
const ARGON2_MAX_MEMORY_COST: u32 = 262_144;

const ARGON2_MAX_TIME_COST: u32 = 10;

const ARGON2_MAX_PARALLELISM: u32 = 16;

/// Distinct parameter sets a password cipher derives keys for
const MAX_DERIVED_KEYS: usize = 2;

type KeyBytes = Zeroizing<[u8; AES_KEY_SIZE]>;

/// Argon2id parameters embedded in every password-derived unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Random salt, at least 16 bytes
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    /// Memory cost in KiB
    #[serde(rename = "m")]
    pub memory_cost: u32,
    /// Iterations
    #[serde(rename = "t")]
    pub time_cost: u32,
    /// Lanes
    #[serde(rename = "p")]
    pub parallelism: u32,
    /// Argon2 version, always `1.3`
    #[serde(rename = "v")]
    pub version: String,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::new()
    }
}

impl KdfParams {
    /// Creates parameters with a random 16-byte salt.
    pub fn new() -> Self {
        let mut salt = vec![0u8; ARGON2_SALT_SIZE];
        OsRng.fill_bytes(&mut salt);

        Self {
            salt,
            memory_cost: ARGON2_MEMORY_COST,
            time_cost: ARGON2_TIME_COST,
            parallelism: ARGON2_PARALLELISM,
            version: "1.3".to_string(),
        }
    }

    /// Rejects parameters weaker than the defaults or too costly to derive.
    ///
    /// Checked before any derivation, including for parameters read from a
    /// unit.
    ///
    /// # Errors
    /// Returns a `Configuration` error naming the first parameter out of
    /// range.
    pub fn validate(&self) -> Result<()> {
        if self.salt.len() < ARGON2_SALT_SIZE {
            return Err(UserBackupError::configuration(format!(
                "Salt must be at least {} bytes",
                ARGON2_SALT_SIZE
            )));
        }
        if !(ARGON2_MEMORY_COST..=ARGON2_MAX_MEMORY_COST).contains(&self.memory_cost) {
            return Err(UserBackupError::configuration(format!(
                "Memory cost must be between {} and {} KiB, got {}",
                ARGON2_MEMORY_COST, ARGON2_MAX_MEMORY_COST, self.memory_cost
            )));
        }
        if !(ARGON2_TIME_COST..=ARGON2_MAX_TIME_COST).contains(&self.time_cost) {
            return Err(UserBackupError::configuration(format!(
                "Time cost must be between {} and {} iterations, got {}",
                ARGON2_TIME_COST, ARGON2_MAX_TIME_COST, self.time_cost
            )));
        }
        if !(1..=ARGON2_MAX_PARALLELISM).contains(&self.parallelism) {
            return Err(UserBackupError::configuration(format!(
                "Parallelism must be between 1 and {}, got {}",
                ARGON2_MAX_PARALLELISM, self.parallelism
            )));
        }
        if self.version != "1.3" {
            return Err(UserBackupError::configuration(format!(
                "Unsupported Argon2 version: {}",
                self.version
            )));
        }
        Ok(())
    }

    /// Derives the AES-256 key for `password`.
    fn derive_key(&self, password: &str) -> Result<KeyBytes> {
        self.validate()?;

        let params = Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(AES_KEY_SIZE),
        )
        .map_err(|e| UserBackupError::configuration(format!("Invalid Argon2 parameters: {}", e)))?;

        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

        let salt_string = SaltString::encode_b64(&self.salt)
            .map_err(|e| UserBackupError::configuration(format!("Invalid salt: {}", e)))?;

        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt_string)
            .map_err(|e| UserBackupError::configuration(format!("Key derivation failed: {}", e)))?;

        let hash = password_hash
            .hash
            .ok_or_else(|| UserBackupError::configuration("Key derivation produced no output"))?;

        if hash.as_bytes().len() != AES_KEY_SIZE {
            return Err(UserBackupError::configuration(format!(
                "Key derivation produced incorrect key length: expected {}, got {}",
                AES_KEY_SIZE,
                hash.as_bytes().len()
            )));
        }

        let mut key = Zeroizing::new([0u8; AES_KEY_SIZE]);
        key.copy_from_slice(hash.as_bytes());
        Ok(key)
    }
}

/// The decoded form of one ciphertext unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedUnit {
    #[serde(rename = "alg")]
    algorithm: String,
    #[serde(with = "b64")]
    nonce: Vec<u8>,
    #[serde(rename = "ct", with = "b64")]
    ciphertext: Vec<u8>,
    #[serde(rename = "tag", with = "b64")]
    auth_tag: Vec<u8>,
    #[serde(rename = "kdf", default, skip_serializing_if = "Option::is_none")]
    kdf_params: Option<KdfParams>,
}

impl SealedUnit {
    fn decode(unit: &str) -> Result<Self> {
        let json = STANDARD
            .decode(unit.trim())
            .map_err(|_| UserBackupError::decryption("unit is not valid base64"))?;
        let sealed: Self = serde_json::from_slice(&json)
            .map_err(|_| UserBackupError::decryption("unit header is malformed"))?;
        sealed.validate()?;
        Ok(sealed)
    }

    fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| UserBackupError::configuration(format!("Cannot encode unit: {}", e)))?;
        Ok(STANDARD.encode(json))
    }

    fn validate(&self) -> Result<()> {
        if self.algorithm != ALGORITHM {
            return Err(UserBackupError::decryption(format!(
                "Unsupported encryption algorithm: {}",
                self.algorithm
            )));
        }
        if self.nonce.len() != AES_GCM_NONCE_SIZE {
            return Err(UserBackupError::decryption(format!(
                "Invalid nonce length: expected {}, got {}",
                AES_GCM_NONCE_SIZE,
                self.nonce.len()
            )));
        }
        if self.auth_tag.len() != AES_GCM_TAG_SIZE {
            return Err(UserBackupError::decryption(format!(
                "Invalid authentication tag length: expected {}, got {}",
                AES_GCM_TAG_SIZE,
                self.auth_tag.len()
            )));
        }
        Ok(())
    }
}

enum Secret {
    Raw(KeyBytes),
    Password(Zeroizing<String>),
}

struct DerivedKey {
    params: KdfParams,
    key: KeyBytes,
}

/// AES-GCM-256 [`CipherProvider`].
///
/// Password ciphers derive a key on first use and remember the keys they
/// derive, one per distinct parameter set, up to `MAX_DERIVED_KEYS`. Units
/// with further parameter sets are rejected.
pub struct AesGcmCipher {
    secret: Secret,
    derived: Mutex<Vec<DerivedKey>>,
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.secret {
            Secret::Raw(_) => "raw-key",
            Secret::Password(_) => "password",
        };
        f.debug_struct("AesGcmCipher")
            .field("mode", &mode)
            .finish_non_exhaustive()
    }
}

impl AesGcmCipher {
    /// Creates a cipher whose keys are derived from `password`.
    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            secret: Secret::Password(Zeroizing::new(password.into())),
            derived: Mutex::new(Vec::new()),
        }
    }

    /// Creates a cipher with password keys derived under `params`.
    ///
    /// # Errors
    /// Returns a `Configuration` error if `params` are too weak.
    pub fn with_password_and_params(password: impl Into<String>, params: KdfParams) -> Result<Self> {
        let password = Zeroizing::new(password.into());
        let key = params.derive_key(&password)?;

        Ok(Self {
            secret: Secret::Password(password),
            derived: Mutex::new(vec![DerivedKey { params, key }]),
        })
    }

    /// Creates a cipher from an externally managed 32-byte key.
    ///
    /// # Errors
    /// Returns a `Configuration` error for any other key length.
    pub fn with_key(key: &[u8]) -> Result<Self> {
        if key.len() != AES_KEY_SIZE {
            return Err(UserBackupError::configuration(format!(
                "Encryption key must be {} bytes, got {}",
                AES_KEY_SIZE,
                key.len()
            )));
        }
        let mut bytes = Zeroizing::new([0u8; AES_KEY_SIZE]);
        bytes.copy_from_slice(key);

        Ok(Self {
            secret: Secret::Raw(bytes),
            derived: Mutex::new(Vec::new()),
        })
    }

    /// Creates a raw-key cipher from a base64-encoded 32-byte key.
    ///
    /// # Errors
    /// Returns a `Configuration` error if the text is not base64 or has the
    /// wrong length.
    pub fn with_base64_key(encoded: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            STANDARD
                .decode(encoded.trim())
                .map_err(|_| UserBackupError::configuration("Encryption key is not valid base64"))?,
        );
        Self::with_key(&bytes)
    }

    fn lock_derived(&self) -> std::sync::MutexGuard<'_, Vec<DerivedKey>> {
        self.derived.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Key and parameters used for sealing.
    fn sealing_key(&self) -> Result<(KeyBytes, Option<KdfParams>)> {
        match &self.secret {
            Secret::Raw(key) => Ok((key.clone(), None)),
            Secret::Password(password) => {
                let mut derived = self.lock_derived();
                if derived.is_empty() {
                    let params = KdfParams::new();
                    let key = params.derive_key(password)?;
                    derived.push(DerivedKey { params, key });
                }
                let first = &derived[0];
                Ok((first.key.clone(), Some(first.params.clone())))
            }
        }
    }

    /// Key for opening a unit sealed under `params`.
    fn opening_key(&self, params: Option<&KdfParams>) -> Result<KeyBytes> {
        match (&self.secret, params) {
            (Secret::Raw(key), _) => Ok(key.clone()),
            (Secret::Password(_), None) => Err(UserBackupError::decryption(
                "unit has no key derivation parameters; a raw key is required",
            )),
            (Secret::Password(password), Some(params)) => {
                let mut derived = self.lock_derived();
                if let Some(known) = derived.iter().find(|d| d.params == *params) {
                    return Ok(known.key.clone());
                }
                if derived.len() >= MAX_DERIVED_KEYS {
                    return Err(UserBackupError::decryption(format!(
                        "too many distinct key derivation parameters (limit {})",
                        MAX_DERIVED_KEYS
                    )));
                }
                let key = params.derive_key(password).map_err(|e| {
                    UserBackupError::decryption(format!("cannot derive key for unit: {}", e))
                })?;
                derived.push(DerivedKey {
                    params: params.clone(),
                    key: key.clone(),
                });
                Ok(key)
            }
        }
    }
}

impl CipherProvider for AesGcmCipher {
    fn encrypt_block(&self, plaintext: &[u8]) -> Result<String> {
        let (key, kdf_params) = self.sealing_key()?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| UserBackupError::configuration(format!("Encryption failed: {}", e)))?;

        // AES-GCM appends the tag to the ciphertext
        if ciphertext.len() < AES_GCM_TAG_SIZE {
            return Err(UserBackupError::configuration(
                "Encrypted block shorter than its authentication tag",
            ));
        }
        let (payload, auth_tag) = ciphertext.split_at(ciphertext.len() - AES_GCM_TAG_SIZE);

        SealedUnit {
            algorithm: ALGORITHM.to_string(),
            nonce: nonce.to_vec(),
            ciphertext: payload.to_vec(),
            auth_tag: auth_tag.to_vec(),
            kdf_params,
        }
        .encode()
    }

    fn decrypt_unit(&self, unit: &str) -> Result<Vec<u8>> {
        let sealed = SealedUnit::decode(unit)?;
        let key = self.opening_key(sealed.kdf_params.as_ref())?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key));

        let mut full_ciphertext = sealed.ciphertext;
        full_ciphertext.extend_from_slice(&sealed.auth_tag);

        cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), full_ciphertext.as_slice())
            .map_err(|_| {
                UserBackupError::decryption("authentication failed (wrong key or corrupted data)")
            })
    }
}

/// Serde adapter storing bytes as standard base64 text.
mod b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_cipher() -> AesGcmCipher {
        AesGcmCipher::with_key(&[0x42u8; 32]).unwrap()
    }

    #[test]
    fn test_kdf_params_new() {
        let params = KdfParams::new();

        assert_eq!(params.salt.len(), 16);
        assert_eq!(params.memory_cost, 65536);
        assert_eq!(params.time_cost, 3);
        assert_eq!(params.parallelism, 4);
        assert_eq!(params.version, "1.3");
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_kdf_params_validation() {
        let mut params = KdfParams::new();

        params.salt = vec![0u8; 15];
        assert!(params.validate().is_err());
        params.salt = vec![0u8; 16];
        assert!(params.validate().is_ok());

        params.memory_cost = 32768;
        assert!(params.validate().is_err());
        params.memory_cost = 65536;

        params.time_cost = 2;
        assert!(params.validate().is_err());
        params.time_cost = 3;

        params.parallelism = 0;
        assert!(params.validate().is_err());
        params.parallelism = 1;
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_kdf_params_upper_bounds() {
        let mut params = KdfParams::new();

        params.memory_cost = 262_144;
        assert!(params.validate().is_ok());
        params.memory_cost = 262_145;
        assert!(params.validate().is_err());
        params.memory_cost = u32::MAX;
        assert!(params.validate().is_err());
        params.memory_cost = 65536;

        params.time_cost = 10;
        assert!(params.validate().is_ok());
        params.time_cost = 11;
        assert!(params.validate().is_err());
        params.time_cost = 3;

        params.parallelism = 16;
        assert!(params.validate().is_ok());
        params.parallelism = 17;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_oversized_kdf_params_rejected_before_derivation() {
        let writer = AesGcmCipher::with_password("pw");
        let mut sealed = SealedUnit::decode(&writer.encrypt_block(b"x").unwrap()).unwrap();
        sealed.kdf_params.as_mut().unwrap().memory_cost = u32::MAX;
        let unit = sealed.encode().unwrap();

        let reader = AesGcmCipher::with_password("pw");
        assert!(matches!(
            reader.decrypt_unit(&unit),
            Err(UserBackupError::Decryption { .. })
        ));
        assert!(reader.lock_derived().is_empty());
    }

    #[test]
    fn test_derived_key_cache_is_bounded() {
        let writer = AesGcmCipher::with_password("pw");
        let unit = writer.encrypt_block(b"chunk").unwrap();
        let sealed = SealedUnit::decode(&unit).unwrap();

        let with_salt = |byte: u8| {
            let mut other = sealed.clone();
            other.kdf_params.as_mut().unwrap().salt = vec![byte; 16];
            other.encode().unwrap()
        };

        let reader = AesGcmCipher::with_password("pw");
        assert_eq!(reader.decrypt_unit(&unit).unwrap(), b"chunk");
        // derives a second key, which then fails authentication
        assert!(reader.decrypt_unit(&with_salt(1)).is_err());
        assert_eq!(reader.lock_derived().len(), 2);

        let message = reader.decrypt_unit(&with_salt(2)).unwrap_err().to_string();
        assert!(message.contains("too many"), "{}", message);
        assert_eq!(reader.lock_derived().len(), 2);

        // known parameters still open
        assert_eq!(reader.decrypt_unit(&unit).unwrap(), b"chunk");
    }

    #[test]
    fn test_raw_key_roundtrip_and_unit_shape() {
        let cipher = raw_cipher();
        let unit = cipher.encrypt_block(b"sensitive rows").unwrap();

        assert!(!unit.contains('\n'));
        let header: serde_json::Value =
            serde_json::from_slice(&STANDARD.decode(&unit).unwrap()).unwrap();
        assert_eq!(header["alg"], "AES-GCM-256");
        assert!(header.get("kdf").is_none());

        assert_eq!(cipher.decrypt_unit(&unit).unwrap(), b"sensitive rows");
    }

    #[test]
    fn test_nonce_uniqueness() {
        let cipher = raw_cipher();
        let a = SealedUnit::decode(&cipher.encrypt_block(b"same").unwrap()).unwrap();
        let b = SealedUnit::decode(&cipher.encrypt_block(b"same").unwrap()).unwrap();

        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let unit = raw_cipher().encrypt_block(b"secret").unwrap();
        let other = AesGcmCipher::with_key(&[0x24u8; 32]).unwrap();

        let result = other.decrypt_unit(&unit);
        assert!(matches!(result, Err(UserBackupError::Decryption { .. })));
    }

    #[test]
    fn test_tampered_unit_fails() {
        let cipher = raw_cipher();
        let mut sealed = SealedUnit::decode(&cipher.encrypt_block(b"secret data").unwrap()).unwrap();
        sealed.ciphertext[0] ^= 1;
        let tampered = sealed.encode().unwrap();

        assert!(matches!(
            cipher.decrypt_unit(&tampered),
            Err(UserBackupError::Decryption { .. })
        ));
    }

    #[test]
    fn test_malformed_units_rejected() {
        let cipher = raw_cipher();
        assert!(cipher.decrypt_unit("%%% not base64").is_err());
        assert!(cipher.decrypt_unit(&STANDARD.encode(b"{}")).is_err());

        let mut sealed = SealedUnit::decode(&cipher.encrypt_block(b"x").unwrap()).unwrap();
        sealed.nonce = vec![0u8; 11];
        let message = cipher
            .decrypt_unit(&sealed.encode().unwrap())
            .unwrap_err()
            .to_string();
        assert!(message.contains("Invalid nonce length"));

        sealed.nonce = vec![0u8; 12];
        sealed.algorithm = "AES-CBC-256".to_string();
        let message = cipher
            .decrypt_unit(&sealed.encode().unwrap())
            .unwrap_err()
            .to_string();
        assert!(message.contains("Unsupported encryption algorithm"));
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(AesGcmCipher::with_key(&[0u8; 16]).is_err());
        assert!(AesGcmCipher::with_base64_key("not base64!").is_err());
        assert!(AesGcmCipher::with_base64_key(&STANDARD.encode([1u8; 32])).is_ok());
    }

    #[test]
    fn test_password_encryption_roundtrip() {
        let writer = AesGcmCipher::with_password("correct horse");
        let first = writer.encrypt_block(b"chunk one").unwrap();
        let second = writer.encrypt_block(b"chunk two").unwrap();

        let a = SealedUnit::decode(&first).unwrap();
        let b = SealedUnit::decode(&second).unwrap();
        // one derivation per session: both units share the salt
        assert_eq!(a.kdf_params, b.kdf_params);
        assert_eq!(a.kdf_params.as_ref().unwrap().salt.len(), 16);

        let reader = AesGcmCipher::with_password("correct horse");
        assert_eq!(reader.decrypt_unit(&first).unwrap(), b"chunk one");
        assert_eq!(reader.decrypt_unit(&second).unwrap(), b"chunk two");

        let wrong = AesGcmCipher::with_password("battery staple");
        assert!(matches!(
            wrong.decrypt_unit(&first),
            Err(UserBackupError::Decryption { .. })
        ));
    }

    #[test]
    fn test_password_cipher_needs_kdf_params() {
        let unit = raw_cipher().encrypt_block(b"raw").unwrap();
        let reader = AesGcmCipher::with_password("pw");
        assert!(matches!(
            reader.decrypt_unit(&unit),
            Err(UserBackupError::Decryption { .. })
        ));
    }
}
