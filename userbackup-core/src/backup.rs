//! User data backup service.
//!
//! [`UserBackupService`] sweeps every table of every connection in its
//! catalog, streams the rows owned by one [`UserIdentity`] and writes them
//! as one artifact.
//!
//! # Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use userbackup_core::adapters::StaticCatalog;
//! use userbackup_core::backup::UserBackupService;
//! use userbackup_core::config::{BackupConfig, ConnectionSpec};
//! use userbackup_core::models::UserIdentity;
//!
//! # async fn example() -> userbackup_core::Result<()> {
//! let specs = vec!["main=sqlite://./app.db".parse::<ConnectionSpec>()?];
//! let catalog = StaticCatalog::connect(&specs).await?;
//! let config = BackupConfig::new("backups").with_encryption(false);
//!
//! let mut service = UserBackupService::new(Arc::new(catalog), config)?;
//! let identity = UserIdentity::new(1).with_accounts(vec![1001]);
//! let summary = service.save_backup_to_file(&identity, None).await?;
//! println!("{} rows in {}", summary.rows, summary.path.display());
//! # Ok(())
//! # }
//! ```

use crate::Result;
use crate::adapters::ConnectionCatalog;
use crate::aggregate::{BackupAggregator, BackupDocument};
use crate::config::BackupConfig;
use crate::error::UserBackupError;
use crate::filter::FilterResolver;
use crate::models::{FilterValue, UserIdentity};
use crate::security::chunked::ChunkEncryptor;
use crate::storage::{backup_path, save_backup};
use crate::stream::{RowSequence, RowStreamer};
use crate::sweep::{SkippedTable, TablePlan, list_tables, record_skip, resolve_table};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// One table stream contributed to a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSource {
    /// Connection name from the catalog
    pub connection: String,
    /// Table name
    pub table: String,
    /// Identifier column the rows are filtered by
    pub column: String,
    /// Bound identifier values
    pub values: Vec<FilterValue>,
}

/// What a fetch resolved, before any row is read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    /// Included streams, in fetch order
    pub sources: Vec<TableSource>,
    /// Tables left out, with the reason
    pub skipped: Vec<SkippedTable>,
}

/// Outcome of [`UserBackupService::save_backup_to_file`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupSummary {
    /// Final artifact path
    pub path: PathBuf,
    /// Tables written
    pub tables: usize,
    /// Rows written
    pub rows: u64,
    /// Bytes on disk
    pub bytes: u64,
    /// Ciphertext units written, when encrypted
    pub chunks: Option<u64>,
    /// Tables left out of the artifact
    pub skipped: Vec<SkippedTable>,
}

/// Fetches and saves per-user backups.
pub struct UserBackupService {
    catalog: Arc<dyn ConnectionCatalog>,
    config: BackupConfig,
    resolver: FilterResolver,
    aggregator: BackupAggregator,
}

impl std::fmt::Debug for UserBackupService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserBackupService")
            .field("connections", &self.catalog.list_connections())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl UserBackupService {
    /// Creates a service over `catalog`.
    ///
    /// # Errors
    /// Returns a `Configuration` error if `config` is invalid.
    pub fn new(catalog: Arc<dyn ConnectionCatalog>, config: BackupConfig) -> Result<Self> {
        config.validate()?;
        let resolver = FilterResolver::from_config(&config);

        Ok(Self {
            catalog,
            config,
            resolver,
            aggregator: BackupAggregator::new(),
        })
    }

    /// Resolves every table and collects one lazy row sequence per table
    /// and connection.
    ///
    /// Starts a new aggregation session. No row is read until the returned
    /// document is serialized; tables without a resolvable filter or with
    /// no identifier values are left out of the document.
    ///
    /// # Errors
    /// Returns a `Connection` error if a connection or its table list is
    /// unavailable. Per-table introspection failures are skips.
    pub async fn fetch_all_user_data(
        &mut self,
        identity: &UserIdentity,
    ) -> Result<(BackupDocument, FetchReport)> {
        self.aggregator.clear();
        let mut report = FetchReport::default();

        tracing::info!("Collecting data for user {}", identity.user_id);

        for connection in self.catalog.list_connections() {
            let adapter = self.catalog.connection(&connection).await?;
            let tables = list_tables(&connection, adapter.as_ref()).await?;
            let streamer = RowStreamer::with_page_size(adapter.clone(), self.config.page_size);

            tracing::debug!(
                "Connection '{}' ({}) has {} tables",
                connection,
                adapter.database_type(),
                tables.len()
            );

            for table in tables {
                let plan = resolve_table(
                    adapter.as_ref(),
                    &self.resolver,
                    &self.config.ignored_tables,
                    &table,
                    identity,
                )
                .await?;

                match plan {
                    TablePlan::Resolved(spec) => {
                        tracing::debug!(
                            "Including {}.{} by '{}' ({} values)",
                            connection,
                            table,
                            spec.column,
                            spec.values.len()
                        );
                        report.sources.push(TableSource {
                            connection: connection.clone(),
                            table: table.clone(),
                            column: spec.column.clone(),
                            values: spec.values.clone(),
                        });
                        let sequence = RowSequence::new(&table, streamer.stream(Some(spec)));
                        self.aggregator.append(table, sequence);
                    }
                    TablePlan::Skipped(reason) => {
                        record_skip(&mut report.skipped, &connection, &table, &reason);
                    }
                }
            }
        }

        tracing::info!(
            "Resolved {} table streams, skipped {} tables",
            report.sources.len(),
            report.skipped.len()
        );

        Ok((self.aggregator.snapshot(), report))
    }

    /// Fetches the user's data and writes it under
    /// `{base_dir}/{user_id}/{YYYY-MM-DD}/{HH-MM-SS}.json`.
    ///
    /// # Errors
    /// Returns a `Configuration` error when encryption is enabled but no
    /// encryptor is given, and otherwise anything fetch, serialization,
    /// encryption or the filesystem reports. Nothing is left at the final
    /// path after an error.
    pub async fn save_backup_to_file(
        &mut self,
        identity: &UserIdentity,
        encryptor: Option<&ChunkEncryptor>,
    ) -> Result<BackupSummary> {
        let encryptor = match (self.config.encrypt, encryptor) {
            (true, None) => {
                return Err(UserBackupError::configuration(
                    "encryption is enabled but no key or password was provided",
                ));
            }
            (true, Some(encryptor)) => Some(encryptor),
            (false, _) => None,
        };

        let (document, report) = self.fetch_all_user_data(identity).await?;
        let path = backup_path(&self.config.base_dir, identity.user_id, chrono::Utc::now());

        let saved = save_backup(&path, &document, encryptor).await?;

        Ok(BackupSummary {
            path: saved.path,
            tables: saved.serialize.tables,
            rows: saved.serialize.rows,
            bytes: saved
                .encryption
                .map_or(saved.serialize.bytes, |stats| stats.ciphertext_bytes),
            chunks: saved.encryption.map(|stats| stats.chunks),
            skipped: report.skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{DatabaseAdapter, StaticCatalog};
    use crate::serializer::StreamingSerializer;
    use crate::test_support::MemoryAdapter;
    use serde_json::json;

    fn catalog_with(adapters: Vec<(&str, Arc<MemoryAdapter>)>) -> Arc<StaticCatalog> {
        let mut catalog = StaticCatalog::new();
        for (name, adapter) in adapters {
            catalog = catalog.with_adapter(name, adapter as Arc<dyn DatabaseAdapter>);
        }
        Arc::new(catalog)
    }

    fn service(catalog: Arc<StaticCatalog>, config: BackupConfig) -> UserBackupService {
        UserBackupService::new(catalog, config).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_issues_no_queries_until_serialized() {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter.create_table("orders", &["id", "user_id"]);
        adapter.insert("orders", vec![json!(1), json!(1)]);

        let mut service = service(
            catalog_with(vec![("main", adapter.clone())]),
            BackupConfig::default(),
        );
        let (document, report) = service
            .fetch_all_user_data(&UserIdentity::new(1))
            .await
            .unwrap();

        assert_eq!(report.sources.len(), 1);
        assert_eq!(adapter.select_calls(), 0);

        let mut sink = Vec::new();
        StreamingSerializer::new()
            .write(&mut sink, &document)
            .await
            .unwrap();
        assert_eq!(adapter.select_calls(), 1);
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&sink).unwrap(),
            json!({"orders": [{"id": 1, "user_id": 1}]})
        );
    }

    #[tokio::test]
    async fn test_same_table_on_two_connections_is_concatenated() {
        let a = Arc::new(MemoryAdapter::new());
        a.create_table("orders", &["id", "user_id"]);
        a.insert("orders", vec![json!(1), json!(1)]);
        let b = Arc::new(MemoryAdapter::new());
        b.create_table("orders", &["id", "user_id"]);
        b.insert("orders", vec![json!(2), json!(1)]);

        let mut service = service(
            catalog_with(vec![("a", a), ("b", b)]),
            BackupConfig::default(),
        );
        let (document, _) = service
            .fetch_all_user_data(&UserIdentity::new(1))
            .await
            .unwrap();

        let mut sink = Vec::new();
        StreamingSerializer::new()
            .write(&mut sink, &document)
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(sink).unwrap(),
            r#"{"orders":[{"id":1,"user_id":1},{"id":2,"user_id":1}]}"#
        );
    }

    #[tokio::test]
    async fn test_skips_are_reported_not_fatal() {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter.create_table("orders", &["id", "user_id"]);
        adapter.create_table("settings", &["key", "value"]);
        adapter.create_table("broken", &["id", "user_id"]);
        adapter.create_table("migrations", &["id", "user_id"]);
        adapter.fail_columns_on("broken");

        let config =
            BackupConfig::default().with_ignored_tables(vec!["migrations".to_string()]);
        let mut service = service(catalog_with(vec![("main", adapter)]), config);
        let (document, report) = service
            .fetch_all_user_data(&UserIdentity::new(1))
            .await
            .unwrap();

        assert_eq!(document.table_names(), vec!["orders"]);
        let skipped: Vec<&str> = report.skipped.iter().map(|s| s.table.as_str()).collect();
        assert_eq!(skipped, vec!["settings", "broken", "migrations"]);
    }

    #[tokio::test]
    async fn test_unreachable_connection_aborts() {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter.fail_list_tables();

        let mut service = service(catalog_with(vec![("main", adapter)]), BackupConfig::default());
        let result = service.fetch_all_user_data(&UserIdentity::new(1)).await;
        assert!(matches!(result, Err(UserBackupError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_connection_lost_during_introspection_aborts() {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter.create_table("accounts", &["id", "user_id"]);
        adapter.create_table("orders", &["id", "user_id"]);
        adapter.insert("orders", vec![json!(1), json!(1)]);
        adapter.lose_connection_on_columns("accounts");

        let dir = tempfile::tempdir().unwrap();
        let config = BackupConfig::new(dir.path()).with_encryption(false);
        let mut service = service(catalog_with(vec![("main", adapter.clone())]), config);

        let result = service.fetch_all_user_data(&UserIdentity::new(1)).await;
        assert!(matches!(result, Err(UserBackupError::Connection { .. })));

        let result = service.save_backup_to_file(&UserIdentity::new(1), None).await;
        assert!(matches!(result, Err(UserBackupError::Connection { .. })));
        assert_eq!(adapter.select_calls(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_new_fetch_clears_previous_session() {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter.create_table("orders", &["id", "user_id"]);

        let mut service = service(catalog_with(vec![("main", adapter)]), BackupConfig::default());
        service.fetch_all_user_data(&UserIdentity::new(1)).await.unwrap();
        let (document, _) = service.fetch_all_user_data(&UserIdentity::new(2)).await.unwrap();

        let sources: Vec<usize> = document.tables().map(|(_, s)| s.len()).collect();
        assert_eq!(sources, vec![1]);
    }

    #[tokio::test]
    async fn test_encryption_requires_encryptor() {
        let dir = tempfile::tempdir().unwrap();
        let config = BackupConfig::new(dir.path());
        let mut service = service(catalog_with(vec![]), config);

        let result = service
            .save_backup_to_file(&UserIdentity::new(1), None)
            .await;
        assert!(matches!(result, Err(UserBackupError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_save_plain_backup_layout() {
        let dir = tempfile::tempdir().unwrap();
        let config = BackupConfig::new(dir.path()).with_encryption(false);
        let mut service = service(catalog_with(vec![]), config);

        let summary = service
            .save_backup_to_file(&UserIdentity::new(42), None)
            .await
            .unwrap();

        let relative = summary.path.strip_prefix(dir.path()).unwrap();
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "42");
        assert_eq!(parts[1].len(), "YYYY-MM-DD".len());
        assert!(parts[2].ends_with(".json"));
        assert_eq!(std::fs::read_to_string(&summary.path).unwrap(), "{}");
        assert_eq!(summary.chunks, None);
    }
}
