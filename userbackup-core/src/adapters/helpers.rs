//! Helper utilities for SQL adapter implementations.
//!
//! Statement text is built here once for every dialect so the fetch and
//! delete paths of each adapter cannot drift apart.

use crate::models::FilterSpec;

/// Identifier quoting style of a SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `"name"`, doubled quotes inside
    Sqlite,
    /// `` `name` ``, doubled backticks inside
    MySql,
}

impl Dialect {
    /// Quotes an identifier for interpolation into statement text.
    pub fn quote(&self, identifier: &str) -> String {
        match self {
            Dialect::Sqlite => format!("\"{}\"", identifier.replace('"', "\"\"")),
            Dialect::MySql => format!("`{}`", identifier.replace('`', "``")),
        }
    }
}

/// Returns `?, ?, ?` with `count` placeholders.
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Builds the paged select for `filter`.
///
/// Binds, in order: every filter value, then `LIMIT`, then `OFFSET`.
pub fn select_page_sql(dialect: Dialect, filter: &FilterSpec) -> String {
    let column = dialect.quote(&filter.column);
    format!(
        "SELECT * FROM {} WHERE {} IN ({}) ORDER BY {} LIMIT ? OFFSET ?",
        dialect.quote(&filter.table),
        column,
        placeholders(filter.values.len()),
        column
    )
}

/// Builds `DELETE FROM table WHERE column IN (...)` for `count` values.
pub fn delete_sql(dialect: Dialect, table: &str, column: &str, count: usize) -> String {
    format!(
        "DELETE FROM {} WHERE {} IN ({})",
        dialect.quote(table),
        dialect.quote(column),
        placeholders(count)
    )
}

#[cfg(any(feature = "sqlite", feature = "mysql"))]
fn is_connection_error(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

/// Converts a sqlx error, separating unreachable databases from failed
/// statements.
#[cfg(any(feature = "sqlite", feature = "mysql"))]
pub fn map_sqlx_error(context: impl Into<String>, error: sqlx::Error) -> crate::error::UserBackupError {
    use crate::error::UserBackupError;

    if is_connection_error(&error) {
        UserBackupError::connection_failed(context, error)
    } else {
        UserBackupError::query_failed(context, error)
    }
}

/// Converts a sqlx error raised while reading the columns of `table`.
///
/// Only statement failures are local to the table; a lost connection
/// stays a `Connection` error and aborts the whole run.
#[cfg(any(feature = "sqlite", feature = "mysql"))]
pub fn map_introspection_error(
    table: &str,
    context: impl Into<String>,
    error: sqlx::Error,
) -> crate::error::UserBackupError {
    use crate::error::UserBackupError;

    if is_connection_error(&error) {
        let context = format!("{} for table '{}'", context.into(), table);
        UserBackupError::connection_failed(context, error)
    } else {
        UserBackupError::introspection_failed(table, context, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FilterValue;

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(Dialect::Sqlite.quote("users"), "\"users\"");
        assert_eq!(Dialect::Sqlite.quote("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(Dialect::MySql.quote("users"), "`users`");
        assert_eq!(Dialect::MySql.quote("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_select_page_sql() {
        let filter = FilterSpec {
            table: "transactions".to_string(),
            column: "account_id".to_string(),
            values: vec![FilterValue::Integer(1), FilterValue::Integer(2)],
        };

        assert_eq!(
            select_page_sql(Dialect::Sqlite, &filter),
            "SELECT * FROM \"transactions\" WHERE \"account_id\" IN (?, ?) \
             ORDER BY \"account_id\" LIMIT ? OFFSET ?"
        );
        assert_eq!(
            select_page_sql(Dialect::MySql, &filter),
            "SELECT * FROM `transactions` WHERE `account_id` IN (?, ?) \
             ORDER BY `account_id` LIMIT ? OFFSET ?"
        );
    }

    #[cfg(any(feature = "sqlite", feature = "mysql"))]
    #[test]
    fn test_introspection_errors_keep_connection_loss() {
        use crate::error::UserBackupError;

        let lost = map_introspection_error("users", "PRAGMA table_info failed", sqlx::Error::PoolClosed);
        assert!(matches!(lost, UserBackupError::Connection { .. }));
        assert!(!lost.is_table_local());

        let local = map_introspection_error("users", "PRAGMA table_info failed", sqlx::Error::RowNotFound);
        match &local {
            UserBackupError::SchemaIntrospection { table, .. } => assert_eq!(table, "users"),
            other => panic!("expected introspection error, got {:?}", other),
        }
        assert!(local.is_table_local());
    }

    #[cfg(any(feature = "sqlite", feature = "mysql"))]
    #[test]
    fn test_sqlx_error_classes() {
        use crate::error::UserBackupError;

        assert!(matches!(
            map_sqlx_error("read", sqlx::Error::PoolTimedOut),
            UserBackupError::Connection { .. }
        ));
        assert!(matches!(
            map_sqlx_error("read", sqlx::Error::RowNotFound),
            UserBackupError::QueryExecution { .. }
        ));
    }

    #[test]
    fn test_delete_sql() {
        assert_eq!(
            delete_sql(Dialect::Sqlite, "positions", "active_id", 3),
            "DELETE FROM \"positions\" WHERE \"active_id\" IN (?, ?, ?)"
        );
    }
}
