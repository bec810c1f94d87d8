//! Core library for per-user data backup and deletion.
//!
//! Given a [`UserIdentity`], this crate finds the rows the user owns in
//! every table of every configured database, streams them into a single
//! JSON artifact (optionally encrypted in independently decryptable
//! chunks), and can later delete exactly the same rows.
//!
//! # Security Guarantees
//! - Fetch paths only issue `SELECT` statements
//! - Deletes are always scoped by a resolved, non-empty `IN (...)` filter
//! - Filter values are bound parameters, never interpolated
//! - Connection credentials are redacted from logs and errors
//! - AES-GCM encryption with a fresh random nonce per chunk
//!
//! # Architecture
//! `catalog -> tables -> FilterResolver -> RowStreamer -> BackupAggregator
//! -> StreamingSerializer -> [ChunkEncryptor] -> artifact`
//!
//! Deletion shares everything up to the resolver and ends in batched
//! deletes instead of serialization.

pub mod adapters;
pub mod aggregate;
pub mod backup;
pub mod config;
pub mod deletion;
pub mod error;
pub mod filter;
pub mod logging;
pub mod models;
pub mod security;
pub mod serializer;
pub mod storage;
pub mod stream;
mod sweep;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use adapters::{
    ConnectionCatalog, DatabaseAdapter, SchemaInspector, SqlExecutor, StaticCatalog,
    create_adapter,
};
pub use aggregate::{BackupAggregator, BackupDocument};
pub use backup::{BackupSummary, FetchReport, UserBackupService};
pub use config::{BackupConfig, ConnectionSpec, TableOverride};
pub use deletion::{DeletionEngine, DeletionReport};
pub use error::{Result, UserBackupError};
pub use filter::{FilterResolver, SkipReason};
pub use models::{ColumnSet, FilterSpec, FilterValue, IdentityList, Row, UserIdentity};
pub use security::{ChunkEncryptor, CipherProvider};
pub use serializer::StreamingSerializer;
pub use stream::{RowSequence, RowStreamer};
pub use sweep::SkippedTable;

#[cfg(feature = "encryption")]
pub use security::encryption;
