//! Chunked, independently decryptable encryption.
//!
//! An encrypted artifact is a sequence of text lines. Each line is one
//! self-describing ciphertext unit produced by a [`CipherProvider`] from at
//! most `chunk_size` bytes of plaintext. Units carry their own nonce and tag,
//! so each decrypts on its own; plaintext is the in-order concatenation.
//!
//! Older artifacts consist of a single unit with no line break at all;
//! [`ChunkEncryptor::decrypt`] reads both shapes.

use crate::Result;
use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::UserBackupError;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zeroize::Zeroizing;

/// A symmetric authenticated cipher under one externally managed key.
pub trait CipherProvider: Send + Sync {
    /// Seals one plaintext block into a single-line text unit.
    ///
    /// # Errors
    /// Returns error if the key is unusable or sealing fails.
    fn encrypt_block(&self, plaintext: &[u8]) -> Result<String>;

    /// Opens one unit produced by [`CipherProvider::encrypt_block`].
    ///
    /// # Errors
    /// Returns a `Decryption` error if the unit is malformed or fails
    /// authentication.
    fn decrypt_unit(&self, unit: &str) -> Result<Vec<u8>>;
}

/// One sealed block and its position in the artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedChunk {
    /// Zero-based block index
    pub ordinal: u64,
    /// Sealed unit text, without the trailing newline
    pub unit: String,
}

/// Counters for one encryption pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkStats {
    /// Units written
    pub chunks: u64,
    /// Bytes read from the source
    pub plaintext_bytes: u64,
    /// Bytes written, newlines included
    pub ciphertext_bytes: u64,
}

/// Splits byte streams into blocks and seals each one.
#[derive(Clone)]
pub struct ChunkEncryptor {
    cipher: Arc<dyn CipherProvider>,
    chunk_size: usize,
}

impl std::fmt::Debug for ChunkEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkEncryptor")
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl ChunkEncryptor {
    /// Creates an encryptor with 5 MiB blocks.
    pub fn new(cipher: Arc<dyn CipherProvider>) -> Self {
        Self::with_chunk_size(cipher, DEFAULT_CHUNK_SIZE)
    }

    /// Creates an encryptor; a zero chunk size is raised to 1.
    pub fn with_chunk_size(cipher: Arc<dyn CipherProvider>, chunk_size: usize) -> Self {
        Self {
            cipher,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Plaintext bytes per block.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Seals one block.
    pub fn seal(&self, ordinal: u64, block: &[u8]) -> Result<EncryptedChunk> {
        let unit = self.cipher.encrypt_block(block)?;
        if unit.contains(['\n', '\r']) {
            return Err(UserBackupError::configuration(
                "cipher produced a unit spanning several lines",
            ));
        }
        Ok(EncryptedChunk { ordinal, unit })
    }

    /// Reads `source` to the end in fixed-size blocks and writes one sealed
    /// unit per line to `sink`.
    ///
    /// Only the final block may be shorter than the chunk size. Empty input
    /// produces no units.
    ///
    /// # Errors
    /// Returns an `Io` error if reading or writing fails, or the cipher's
    /// error if sealing fails.
    pub async fn encrypt<W, R>(&self, sink: &mut W, source: &mut R) -> Result<ChunkStats>
    where
        W: AsyncWrite + Unpin + Send,
        R: AsyncRead + Unpin + Send,
    {
        let mut stats = ChunkStats::default();
        let mut block = Zeroizing::new(vec![0u8; self.chunk_size]);

        loop {
            let filled = fill_block(source, &mut block).await?;
            if filled == 0 {
                break;
            }

            let chunk = self.seal(stats.chunks, &block[..filled])?;
            sink.write_all(chunk.unit.as_bytes())
                .await
                .map_err(|e| UserBackupError::io("Failed to write encrypted chunk", e))?;
            sink.write_all(b"\n")
                .await
                .map_err(|e| UserBackupError::io("Failed to write encrypted chunk", e))?;

            tracing::trace!("Sealed chunk {} ({} bytes)", chunk.ordinal, filled);
            stats.chunks += 1;
            stats.plaintext_bytes += filled as u64;
            stats.ciphertext_bytes += chunk.unit.len() as u64 + 1;

            if filled < self.chunk_size {
                break;
            }
        }

        sink.flush()
            .await
            .map_err(|e| UserBackupError::io("Failed to flush encrypted output", e))?;

        tracing::debug!(
            "Encrypted {} bytes into {} chunks",
            stats.plaintext_bytes,
            stats.chunks
        );
        Ok(stats)
    }

    /// Decrypts a whole artifact.
    ///
    /// Input without line breaks is one unit; otherwise each non-blank line
    /// is a unit, opened in order and concatenated.
    ///
    /// # Errors
    /// Returns a `Decryption` error if the input is not text or any unit
    /// fails to open.
    pub fn decrypt(&self, input: &[u8]) -> Result<Vec<u8>> {
        let text = std::str::from_utf8(input)
            .map_err(|_| UserBackupError::decryption("encrypted artifact is not valid UTF-8"))?;
        let trimmed = text.trim();

        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        if !trimmed.contains(['\n', '\r']) {
            return self.cipher.decrypt_unit(trimmed);
        }

        let mut plaintext = Vec::new();
        for (index, line) in trimmed
            .split(['\n', '\r'])
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .enumerate()
        {
            let block = self.cipher.decrypt_unit(line).map_err(|e| match e {
                UserBackupError::Decryption { context } => {
                    UserBackupError::decryption(format!("chunk {}: {}", index, context))
                }
                other => other,
            })?;
            plaintext.extend_from_slice(&block);
        }

        Ok(plaintext)
    }

    /// Decrypts an artifact and parses the plaintext as JSON.
    ///
    /// # Errors
    /// `Decryption` as for [`ChunkEncryptor::decrypt`], `Format` if the
    /// reassembled plaintext is not a JSON document.
    pub fn decrypt_document(&self, input: &[u8]) -> Result<serde_json::Value> {
        let plaintext = Zeroizing::new(self.decrypt(input)?);
        serde_json::from_slice(&plaintext).map_err(|e| UserBackupError::Format {
            context: "decrypted backup is not valid JSON".to_string(),
            source: e,
        })
    }
}

/// Reads until `block` is full or the source ends; returns the byte count.
async fn fill_block<R>(source: &mut R, block: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin + Send,
{
    let mut filled = 0;
    while filled < block.len() {
        let read = source
            .read(&mut block[filled..])
            .await
            .map_err(|e| UserBackupError::io("Failed to read plaintext for encryption", e))?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}
