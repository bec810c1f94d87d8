//! Encryption of backup artifacts.
//!
//! # Module Structure
//! - `chunked`: Fixed-size block splitting and the line-per-unit artifact
//!   format, over any [`CipherProvider`]
//! - `encryption`: AES-GCM-256 provider with Argon2id key derivation
//!   (feature-gated)
//!
//! # Security Guarantees
//! - Every block is sealed independently with a fresh random nonce
//! - Authentication failure of any unit rejects the whole artifact
//! - Key material lives in `Zeroizing` containers and is cleared on drop

pub mod chunked;

#[cfg(feature = "encryption")]
pub mod encryption;

pub use chunked::{ChunkEncryptor, ChunkStats, CipherProvider, EncryptedChunk};

#[cfg(feature = "encryption")]
pub use encryption::{AesGcmCipher, KdfParams};
