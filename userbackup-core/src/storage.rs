//! Durable backup artifacts on disk.
//!
//! Artifacts are written to a hidden temporary file next to their final
//! path and renamed into place only after every byte (and every encrypted
//! chunk) has been written and synced. A failed save leaves nothing at the
//! final path and removes its temporary file.

use crate::Result;
use crate::aggregate::BackupDocument;
use crate::error::UserBackupError;
use crate::security::chunked::{ChunkEncryptor, ChunkStats};
use crate::serializer::{SerializeStats, StreamingSerializer};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};

/// Extension appended to encrypted artifacts.
pub const ENCRYPTED_EXTENSION: &str = "enc";

/// Capacity of the in-process pipe between serializer and encryptor.
const PIPE_CAPACITY: usize = 64 * 1024;

/// What a save produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArtifact {
    /// Final path, including `.enc` when encrypted
    pub path: PathBuf,
    /// Counters from writing the plaintext document
    pub serialize: SerializeStats,
    /// Present when the artifact was encrypted
    pub encryption: Option<ChunkStats>,
}

/// `{base_dir}/{user_id}/{YYYY-MM-DD}/{HH-MM-SS}.json`
///
/// # Example
/// ```rust
/// use chrono::TimeZone;
/// use userbackup_core::storage::backup_path;
///
/// let at = chrono::Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
/// let path = backup_path("backups", 42, at);
/// assert_eq!(path, std::path::Path::new("backups/42/2024-03-09/14-05-07.json"));
/// ```
pub fn backup_path(base_dir: impl AsRef<Path>, user_id: i64, at: DateTime<Utc>) -> PathBuf {
    base_dir
        .as_ref()
        .join(user_id.to_string())
        .join(at.format("%Y-%m-%d").to_string())
        .join(format!("{}.json", at.format("%H-%M-%S")))
}

/// Returns `path` with `.enc` appended to its file name.
pub fn encrypted_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ENCRYPTED_EXTENSION);
    PathBuf::from(name)
}

/// True when `path` carries the `.enc` extension.
pub fn is_encrypted_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ENCRYPTED_EXTENSION))
}

/// Removes the temporary file unless the save completed.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed
            && let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(
                "Failed to remove temporary file {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

fn temp_path_for(final_path: &Path) -> PathBuf {
    let file_name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".to_string());
    final_path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()))
}

/// Serializes `document` to `path`, encrypting when `encryptor` is given.
///
/// With an encryptor the final path gains a `.enc` suffix and plaintext
/// never touches the disk: serializer output is piped straight into the
/// encryptor.
///
/// # Errors
/// `Io` for filesystem failures, plus anything the serializer or the
/// encryptor reports. No file exists at the final path after an error.
pub async fn save_backup(
    path: &Path,
    document: &BackupDocument,
    encryptor: Option<&ChunkEncryptor>,
) -> Result<SavedArtifact> {
    let final_path = match encryptor {
        Some(_) => encrypted_path(path),
        None => path.to_path_buf(),
    };

    if let Some(parent) = final_path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            UserBackupError::io(format!("Failed to create directory {}", parent.display()), e)
        })?;
    }

    let temp_path = temp_path_for(&final_path);
    let mut guard = TempFileGuard::new(temp_path.clone());

    let file = tokio::fs::File::create(&temp_path).await.map_err(|e| {
        UserBackupError::io(
            format!("Failed to create temporary file {}", temp_path.display()),
            e,
        )
    })?;
    let mut writer = BufWriter::new(file);

    let serializer = StreamingSerializer::new();
    let (serialize, encryption) = match encryptor {
        None => (serializer.write(&mut writer, document).await?, None),
        Some(encryptor) => {
            let (mut plain_tx, mut plain_rx) = tokio::io::duplex(PIPE_CAPACITY);

            let produce = async {
                let stats = serializer.write(&mut plain_tx, document).await?;
                plain_tx
                    .shutdown()
                    .await
                    .map_err(|e| UserBackupError::io("Failed to close plaintext pipe", e))?;
                drop(plain_tx);
                Ok::<_, UserBackupError>(stats)
            };
            let consume = encryptor.encrypt(&mut writer, &mut plain_rx);

            let (serialize, encryption) = tokio::try_join!(produce, consume)?;
            (serialize, Some(encryption))
        }
    };

    writer
        .flush()
        .await
        .map_err(|e| UserBackupError::io("Failed to flush backup file", e))?;
    let file = writer.into_inner();
    file.sync_all()
        .await
        .map_err(|e| UserBackupError::io("Failed to sync backup file", e))?;
    drop(file);

    tokio::fs::rename(&temp_path, &final_path).await.map_err(|e| {
        UserBackupError::io(
            format!("Failed to move backup into {}", final_path.display()),
            e,
        )
    })?;
    guard.disarm();

    tracing::info!(
        "Saved backup to {} ({} tables, {} rows)",
        final_path.display(),
        serialize.tables,
        serialize.rows
    );

    Ok(SavedArtifact {
        path: final_path,
        serialize,
        encryption,
    })
}

/// Reads an artifact back as JSON.
///
/// Files ending in `.enc` are decrypted with `encryptor`; anything else is
/// parsed as plain JSON.
///
/// # Errors
/// - `Io` if the file cannot be read
/// - `Configuration` for an encrypted file without an encryptor
/// - `Decryption` / `Format` as reported by [`ChunkEncryptor::decrypt_document`]
pub async fn load_backup(
    path: &Path,
    encryptor: Option<&ChunkEncryptor>,
) -> Result<serde_json::Value> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        UserBackupError::io(format!("Failed to read backup {}", path.display()), e)
    })?;

    if is_encrypted_path(path) {
        let encryptor = encryptor.ok_or_else(|| {
            UserBackupError::configuration(format!(
                "{} is encrypted; a password or key is required",
                path.display()
            ))
        })?;
        return encryptor.decrypt_document(&bytes);
    }

    serde_json::from_slice(&bytes).map_err(|e| UserBackupError::Format {
        context: format!("{} is not valid JSON", path.display()),
        source: e,
    })
}
