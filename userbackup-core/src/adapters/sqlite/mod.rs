//! SQLite database adapter.
//!
//! # Module Structure
//! - `connection`: Connection string handling and pool creation
//! - `rows`: Conversion of SQLite rows into backup [`Row`]s
//!
//! # SQLite-Specific Features
//! - Uses `sqlite_master` to enumerate tables
//! - Uses `PRAGMA table_info()` for column names and declared types
//! - Supports both file-based and in-memory databases

pub mod connection;
pub mod rows;

use super::helpers::{Dialect, delete_sql, map_introspection_error, map_sqlx_error, select_page_sql};
use super::{DatabaseAdapter, SchemaInspector, SqlExecutor};
use crate::Result;
use crate::error::UserBackupError;
use crate::models::{ColumnInfo, ColumnKind, ColumnSet, DatabaseType, FilterSpec, FilterValue, Row};
use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteArguments, Sqlite};
use sqlx::query::Query;

/// SQLite database adapter.
pub struct SqliteAdapter {
    /// Connection pool (single connection for in-memory databases)
    pub pool: SqlitePool,
    /// Original connection string (kept for reference, public for test access)
    pub connection_string: String,
}

impl std::fmt::Debug for SqliteAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAdapter")
            .field("is_in_memory", &self.is_in_memory())
            .finish_non_exhaustive()
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q FilterValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        FilterValue::Integer(v) => query.bind(*v),
        FilterValue::Text(v) => query.bind(v.as_str()),
    }
}

#[async_trait]
impl SchemaInspector for SqliteAdapter {
    async fn list_tables(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("Failed to list SQLite tables", e))
    }

    async fn has_table(&self, table: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(format!("Failed to look up table '{}'", table), e))?;

        Ok(count > 0)
    }

    async fn list_columns(&self, table: &str) -> Result<ColumnSet> {
        use sqlx::Row as _;

        let pragma = format!("PRAGMA table_info({})", Dialect::Sqlite.quote(table));
        let rows = sqlx::query(&pragma)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                map_introspection_error(table, "PRAGMA table_info failed", e)
            })?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get("name").map_err(|e| {
                UserBackupError::introspection_failed(table, "column name unreadable", e)
            })?;
            let declared: String = row.try_get("type").unwrap_or_default();
            columns.push(ColumnInfo::new(name, ColumnKind::from_declared_type(&declared)));
        }

        Ok(ColumnSet::new(columns))
    }
}

#[async_trait]
impl SqlExecutor for SqliteAdapter {
    async fn select_page(
        &self,
        filter: &FilterSpec,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Row>> {
        if filter.values.is_empty() {
            return Ok(Vec::new());
        }

        let sql = select_page_sql(Dialect::Sqlite, filter);
        let mut query = sqlx::query(&sql);
        for value in &filter.values {
            query = bind_value(query, value);
        }
        let limit = i64::try_from(limit)
            .map_err(|_| UserBackupError::configuration("page size exceeds i64"))?;
        let offset = i64::try_from(offset)
            .map_err(|_| UserBackupError::query_rejected("page offset exceeds i64"))?;
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

        let sql = delete_sql(Dialect::Sqlite, table, column, batch.len());
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

impl DatabaseAdapter for SqliteAdapter {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }
}
