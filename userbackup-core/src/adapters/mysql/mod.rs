//! MySQL / MariaDB database adapter.
//!
//! # Module Structure
//! - `rows`: Conversion of MySQL rows into backup [`Row`]s
//!
//! # MySQL-Specific Features
//! - Tables and columns come from `information_schema` for the current
//!   `DATABASE()`
//! - `CAST(... AS CHAR)` guards against binary-typed catalog columns on
//!   MySQL 8

pub mod rows;

use super::helpers::{Dialect, delete_sql, map_introspection_error, map_sqlx_error, select_page_sql};
use super::{DatabaseAdapter, SchemaInspector, SqlExecutor};
use crate::Result;
use crate::error::UserBackupError;
use crate::models::{ColumnInfo, ColumnKind, ColumnSet, DatabaseType, FilterSpec, FilterValue, Row};
use async_trait::async_trait;
use sqlx::MySqlPool;
use sqlx::mysql::{MySql, MySqlArguments, MySqlPoolOptions};
use sqlx::query::Query;
use std::time::Duration;

const MAX_CONNECTIONS: u32 = 4;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// MySQL database adapter with connection pooling.
pub struct MySqlAdapter {
    /// Connection pool
    pub pool: MySqlPool,
}

impl std::fmt::Debug for MySqlAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The connection url is intentionally omitted
        f.debug_struct("MySqlAdapter").finish_non_exhaustive()
    }
}

impl MySqlAdapter {
    /// Creates a pooled adapter.
    ///
    /// The pool connects lazily; the first statement surfaces an
    /// unreachable server as a `Connection` error.
    ///
    /// # Errors
    /// Returns error if the connection string cannot be parsed.
    pub async fn new(connection_string: &str) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .test_before_acquire(true)
            .connect_lazy(connection_string)
            .map_err(|e| UserBackupError::connection_failed("Invalid MySQL connection string", e))?;

        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Closes the connection pool gracefully
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &'q FilterValue,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        FilterValue::Integer(v) => query.bind(*v),
        FilterValue::Text(v) => query.bind(v.as_str()),
    }
}

#[async_trait]
impl SchemaInspector for MySqlAdapter {
    async fn list_tables(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT CAST(TABLE_NAME AS CHAR) FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' \
             ORDER BY TABLE_NAME",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("Failed to list MySQL tables", e))
    }

    async fn has_table(&self, table: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(format!("Failed to look up table '{}'", table), e))?;

        Ok(count > 0)
    }

    async fn list_columns(&self, table: &str) -> Result<ColumnSet> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT CAST(COLUMN_NAME AS CHAR), CAST(COLUMN_TYPE AS CHAR) \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
             ORDER BY ORDINAL_POSITION",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            map_introspection_error(table, "information_schema.COLUMNS failed", e)
        })?;

        Ok(ColumnSet::new(rows.into_iter().map(|(name, declared)| {
            ColumnInfo::new(name, ColumnKind::from_declared_type(&declared))
        })))
    }
}

#[async_trait]
impl SqlExecutor for MySqlAdapter {
    async fn select_page(
        &self,
        filter: &FilterSpec,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Row>> {
        if filter.values.is_empty() {
            return Ok(Vec::new());
        }

        let sql = select_page_sql(Dialect::MySql, filter);
        let mut query = sqlx::query(&sql);
        for value in &filter.values {
            query = bind_value(query, value);
        }
        let limit = u64::try_from(limit)
            .map_err(|_| UserBackupError::configuration("page size exceeds u64"))?;
        query = query.bind(limit).bind(offset);

        let rows = query.fetch_all(&self.pool).await.map_err(|e| {
            map_sqlx_error(format!("Failed to read page of table '{}'", filter.table), e)
        })?;

        rows.iter()
            .map(|row| rows::row_to_json(row, &filter.table))
            .collect()
    }

    async fn delete_where_in(
        &self,
        table: &str,
        column: &str,
        batch: &[FilterValue],
    ) -> Result<u64> {
        if batch.is_empty() {
            return Err(UserBackupError::query_rejected(format!(
                "refusing DELETE on '{}' without filter values",
                table
            )));
        }

        let sql = delete_sql(Dialect::MySql, table, column, batch.len());
        let mut query = sqlx::query(&sql);
        for value in batch {
            query = bind_value(query, value);
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(format!("Failed to delete from '{}'", table), e))?;

        Ok(result.rows_affected())
    }
}

impl DatabaseAdapter for MySqlAdapter {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }
}
