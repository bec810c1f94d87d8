//! Catalog traversal shared by fetch and delete.
//!
//! Both pipelines walk every table of every connection and decide per table
//! whether it is in scope through [`resolve_table`]. Keeping that decision
//! in one place is what makes fetch and delete agree on what a user owns.

use crate::Result;
use crate::adapters::DatabaseAdapter;
use crate::error::UserBackupError;
use crate::filter::{FilterResolver, SkipReason};
use crate::models::{FilterSpec, UserIdentity};
use serde::Serialize;

/// A table that took no part in a run, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedTable {
    /// Connection name
    pub connection: String,
    /// Table name
    pub table: String,
    /// Human-readable skip reason
    pub reason: String,
}

/// Per-table outcome of resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TablePlan {
    Resolved(FilterSpec),
    Skipped(SkipReason),
}

/// Lists the tables of one connection.
///
/// A failure here concerns the whole connection, so it is reported as a
/// `Connection` error.
pub(crate) async fn list_tables(connection: &str, adapter: &dyn DatabaseAdapter) -> Result<Vec<String>> {
    adapter.list_tables().await.map_err(|e| match e {
        UserBackupError::Connection { .. } => e,
        other => UserBackupError::connection_failed(
            format!("Failed to list tables on connection '{}'", connection),
            other,
        ),
    })
}

/// Decides whether `table` is in scope for `identity`.
///
/// # Errors
/// Only errors that are not local to the table propagate; a failed column
/// listing becomes [`SkipReason::Introspection`].
pub(crate) async fn resolve_table(
    adapter: &dyn DatabaseAdapter,
    resolver: &FilterResolver,
    ignored: &[String],
    table: &str,
    identity: &UserIdentity,
) -> Result<TablePlan> {
    if ignored.iter().any(|t| t == table) {
        return Ok(TablePlan::Skipped(SkipReason::Ignored));
    }

    if !adapter.has_table(table).await? {
        return Ok(TablePlan::Skipped(SkipReason::MissingTable));
    }

    let columns = match adapter.list_columns(table).await {
        Ok(columns) => columns,
        Err(e) if e.is_table_local() => {
            return Ok(TablePlan::Skipped(SkipReason::Introspection(e.to_string())));
        }
        Err(e) => return Err(e),
    };

    Ok(match resolver.filter_spec(table, &columns, identity) {
        Ok(spec) => TablePlan::Resolved(spec),
        Err(reason) => TablePlan::Skipped(reason),
    })
}

/// Logs a skip at a level matching its reason and records it.
pub(crate) fn record_skip(
    skipped: &mut Vec<SkippedTable>,
    connection: &str,
    table: &str,
    reason: &SkipReason,
) {
    match reason {
        SkipReason::Introspection(_) => {
            tracing::warn!("Skipping {}.{}: {}", connection, table, reason);
        }
        SkipReason::Ignored => {
            tracing::trace!("Skipping {}.{}: {}", connection, table, reason);
        }
        _ => {
            tracing::debug!("Skipping {}.{}: {}", connection, table, reason);
        }
    }

    skipped.push(SkippedTable {
        connection: connection.to_string(),
        table: table.to_string(),
        reason: reason.to_string(),
    });
}
