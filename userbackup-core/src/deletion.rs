//! Batched deletion of a user's rows.
//!
//! The engine walks the same catalog and applies the same table resolution
//! as a backup fetch, then issues `DELETE ... WHERE column IN (batch)` per
//! table. A table is only touched when its filter resolved to a non-empty
//! value list.
//!
//! # Failure Semantics
//! - The first failing batch stops the run; later batches and tables are
//!   not attempted
//! - Batches already executed stay committed; there is no cross-table
//!   transaction
//! - Tables are processed in catalog order with no foreign-key ordering

use crate::Result;
use crate::adapters::ConnectionCatalog;
use crate::config::BackupConfig;
use crate::error::UserBackupError;
use crate::filter::FilterResolver;
use crate::models::UserIdentity;
use crate::sweep::{SkippedTable, TablePlan, list_tables, record_skip, resolve_table};
use serde::Serialize;
use std::sync::Arc;

/// Rows removed from one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDeletion {
    /// Connection name
    pub connection: String,
    /// Table name
    pub table: String,
    /// Identifier column of the `IN (...)` filter
    pub column: String,
    /// Statements executed
    pub batches: usize,
    /// Rows reported as affected
    pub rows_deleted: u64,
}

/// Outcome of a completed deletion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    /// Tables that were deleted from, in processing order
    pub tables: Vec<TableDeletion>,
    /// Tables left alone
    pub skipped: Vec<SkippedTable>,
}

impl DeletionReport {
    /// Rows deleted across all tables.
    pub fn total_rows_deleted(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_deleted).sum()
    }

    /// Statements executed across all tables.
    pub fn total_batches(&self) -> usize {
        self.tables.iter().map(|t| t.batches).sum()
    }
}

/// Deletes everything a [`UserIdentity`] owns across a catalog.
pub struct DeletionEngine {
    catalog: Arc<dyn ConnectionCatalog>,
    resolver: FilterResolver,
    ignored_tables: Vec<String>,
    batch_size: usize,
}

impl std::fmt::Debug for DeletionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeletionEngine")
            .field("connections", &self.catalog.list_connections())
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl DeletionEngine {
    /// Creates an engine using the resolver settings, ignored tables and
    /// batch size of `config`.
    ///
    /// # Errors
    /// Returns a `Configuration` error if `config` is invalid.
    pub fn new(catalog: Arc<dyn ConnectionCatalog>, config: &BackupConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            catalog,
            resolver: FilterResolver::from_config(config),
            ignored_tables: config.ignored_tables.clone(),
            batch_size: config.delete_batch_size,
        })
    }

    /// Deletes the rows of `identity` from every in-scope table.
    ///
    /// `ignored_tables` is added to the tables ignored by configuration.
    ///
    /// # Errors
    /// - `Connection` if a connection or its table list is unavailable
    /// - `DeletionBatch` naming the connection, table and batch index that
    ///   failed, and how many rows that table had already lost
    pub async fn delete_user_data(
        &self,
        identity: &UserIdentity,
        ignored_tables: &[String],
    ) -> Result<DeletionReport> {
        let mut ignored = self.ignored_tables.clone();
        ignored.extend(ignored_tables.iter().cloned());

        let mut report = DeletionReport::default();

        tracing::info!("Deleting data for user {}", identity.user_id);

        for connection in self.catalog.list_connections() {
            let adapter = self.catalog.connection(&connection).await?;
            let tables = list_tables(&connection, adapter.as_ref()).await?;

            for table in tables {
                let plan =
                    resolve_table(adapter.as_ref(), &self.resolver, &ignored, &table, identity)
                        .await?;

                let spec = match plan {
                    TablePlan::Resolved(spec) => spec,
                    TablePlan::Skipped(reason) => {
                        record_skip(&mut report.skipped, &connection, &table, &reason);
                        continue;
                    }
                };

                let mut deletion = TableDeletion {
                    connection: connection.clone(),
                    table: table.clone(),
                    column: spec.column.clone(),
                    batches: 0,
                    rows_deleted: 0,
                };

                for (index, batch) in spec.values.chunks(self.batch_size).enumerate() {
                    let affected = adapter
                        .delete_where_in(&table, &spec.column, batch)
                        .await
                        .map_err(|e| {
                            tracing::error!(
                                "Delete batch {} on {}.{} failed: {}",
                                index,
                                connection,
                                table,
                                e
                            );
                            UserBackupError::DeletionBatch {
                                connection: connection.clone(),
                                table: table.clone(),
                                batch: index,
                                rows_deleted: deletion.rows_deleted,
                                source: Box::new(e),
                            }
                        })?;

                    tracing::trace!(
                        "Batch {} of {} values removed {} rows from {}.{}",
                        index,
                        batch.len(),
                        affected,
                        connection,
                        table
                    );
                    deletion.batches += 1;
                    deletion.rows_deleted += affected;
                }

                tracing::debug!(
                    "Deleted {} rows from {}.{} in {} batches",
                    deletion.rows_deleted,
                    connection,
                    table,
                    deletion.batches
                );
                report.tables.push(deletion);
            }
        }

        tracing::info!(
            "Deleted {} rows from {} tables",
            report.total_rows_deleted(),
            report.tables.len()
        );

        Ok(report)
    }
}
