//! Database collaborator traits and the adapter factory.
//!
//! The backup and deletion pipelines never talk to a driver directly. They
//! see a [`ConnectionCatalog`] of named connections, each of which is a
//! [`DatabaseAdapter`]: a [`SchemaInspector`] for table and column metadata
//! plus a [`SqlExecutor`] for the two parameterized statements the core
//! issues.
//!
//! # Security
//! - Values always travel as bound parameters; only identifiers are
//!   interpolated, after dialect quoting
//! - Connection strings are redacted in every log line and error

pub mod catalog;
pub mod helpers;

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use crate::Result;
use crate::models::{ColumnSet, DatabaseType, FilterSpec, FilterValue, Row};
use async_trait::async_trait;
use std::sync::Arc;

pub use catalog::{ConnectionCatalog, StaticCatalog};

/// Table and column metadata for one connection.
#[async_trait]
pub trait SchemaInspector: Send + Sync {
    /// Lists every user table of the connection.
    ///
    /// # Errors
    /// Failure here concerns the whole connection and is fatal to a sweep.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Checks whether `table` currently exists.
    async fn has_table(&self, table: &str) -> Result<bool>;

    /// Lists the columns of `table` in ordinal order.
    ///
    /// # Errors
    /// Returns `SchemaIntrospection` when only this table is affected.
    async fn list_columns(&self, table: &str) -> Result<ColumnSet>;
}

/// The parameterized statements issued against one connection.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Fetches one page of
    /// `SELECT * FROM table WHERE column IN (values) ORDER BY column`.
    ///
    /// An empty value list yields an empty page without querying.
    async fn select_page(&self, filter: &FilterSpec, offset: u64, limit: usize)
    -> Result<Vec<Row>>;

    /// Runs `DELETE FROM table WHERE column IN (batch)` and returns the
    /// affected row count.
    ///
    /// # Errors
    /// An empty batch is rejected: an unscoped delete is never issued.
    async fn delete_where_in(&self, table: &str, column: &str, batch: &[FilterValue])
    -> Result<u64>;
}

/// One database connection as seen by the core.
///
/// # Object Safety
/// Used as `Arc<dyn DatabaseAdapter>`; row streams hold such a handle so
/// they can outlive the call that created them.
pub trait DatabaseAdapter: SchemaInspector + SqlExecutor {
    /// Returns the database type this adapter handles
    fn database_type(&self) -> DatabaseType;
}

/// Creates a database adapter from a connection string.
///
/// # Errors
/// Returns error if the scheme is unrecognized, the driver is not compiled
/// in, or the connection cannot be opened.
///
/// # Example
/// ```rust,no_run
/// use userbackup_core::adapters::create_adapter;
///
/// # async fn example() -> userbackup_core::Result<()> {
/// let adapter = create_adapter("sqlite://./app.db").await?;
/// let tables = adapter.list_tables().await?;
/// println!("Found {} tables", tables.len());
/// # Ok(())
/// # }
/// ```
pub async fn create_adapter(connection_string: &str) -> Result<Arc<dyn DatabaseAdapter>> {
    let database_type = detect_database_type(connection_string)?;

    match database_type {
        #[cfg(feature = "mysql")]
        DatabaseType::MySQL => {
            let adapter = mysql::MySqlAdapter::new(connection_string).await?;
            Ok(Arc::new(adapter))
        }
        #[cfg(not(feature = "mysql"))]
        DatabaseType::MySQL => Err(crate::error::UserBackupError::unsupported_feature(
            "MySQL adapter",
            "Compile with --features mysql to enable MySQL support",
        )),
        #[cfg(feature = "sqlite")]
        DatabaseType::SQLite => {
            let adapter = sqlite::SqliteAdapter::new(connection_string).await?;
            Ok(Arc::new(adapter))
        }
        #[cfg(not(feature = "sqlite"))]
        DatabaseType::SQLite => Err(crate::error::UserBackupError::unsupported_feature(
            "SQLite adapter",
            "Compile with --features sqlite to enable SQLite support",
        )),
    }
}

/// Detects the database type from a connection string.
///
/// # Errors
/// Returns error if the connection string format is unrecognized
pub fn detect_database_type(connection_string: &str) -> Result<DatabaseType> {
    if connection_string.starts_with("mysql://") || connection_string.starts_with("mariadb://") {
        Ok(DatabaseType::MySQL)
    } else if connection_string.starts_with("sqlite:")
        || connection_string == ":memory:"
        || connection_string.ends_with(".db")
        || connection_string.ends_with(".sqlite")
        || connection_string.ends_with(".sqlite3")
    {
        Ok(DatabaseType::SQLite)
    } else {
        Err(crate::error::UserBackupError::configuration(
            "Unrecognized database connection string format",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_database_type() {
        assert_eq!(
            detect_database_type("mysql://app@localhost/main").unwrap(),
            DatabaseType::MySQL
        );
        assert_eq!(
            detect_database_type("sqlite::memory:").unwrap(),
            DatabaseType::SQLite
        );
        assert_eq!(
            detect_database_type("sqlite://./data/app.db").unwrap(),
            DatabaseType::SQLite
        );
        assert_eq!(
            detect_database_type("/var/lib/app/main.sqlite3").unwrap(),
            DatabaseType::SQLite
        );
        assert!(detect_database_type("postgres://localhost/db").is_err());
    }
}
