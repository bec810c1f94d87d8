//! SQLite connection handling.
//!
//! # Connection Modes
//! - File-based: `sqlite:///path/to/database.db` or `sqlite://./relative.db`
//! - Bare paths ending in `.db`, `.sqlite` or `.sqlite3`
//! - In-memory: `sqlite::memory:` or `:memory:`

use super::SqliteAdapter;
use crate::Result;
use crate::error::UserBackupError;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

const MAX_FILE_CONNECTIONS: u32 = 4;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

impl SqliteAdapter {
    /// Opens a SQLite database.
    ///
    /// In-memory databases get a single-connection pool so every statement
    /// sees the same database.
    ///
    /// # Errors
    /// Returns a `Connection` error if the database cannot be opened.
    pub async fn new(connection_string: &str) -> Result<Self> {
        let normalized = normalize_connection_string(connection_string);

        let options = SqliteConnectOptions::from_str(&normalized).map_err(|e| {
            UserBackupError::configuration(format!("Invalid SQLite connection string: {}", e))
        })?;

        let pool_options = if is_in_memory(&normalized) {
            // the database lives exactly as long as its only connection
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(MAX_FILE_CONNECTIONS)
        };

        let pool = pool_options
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| UserBackupError::connection_failed("Failed to open SQLite database", e))?;

        Ok(Self {
            pool,
            connection_string: normalized,
        })
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            connection_string: "sqlite::memory:".to_string(),
        }
    }

    /// Checks if the connection is to an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        is_in_memory(&self.connection_string)
    }

    /// Closes the connection pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn is_in_memory(connection_string: &str) -> bool {
    connection_string.contains(":memory:") || connection_string.contains("mode=memory")
}

/// Normalizes shorthand forms to a SQLite URL.
fn normalize_connection_string(connection_string: &str) -> String {
    if connection_string == ":memory:" {
        return "sqlite::memory:".to_string();
    }
    if connection_string.starts_with("sqlite:") {
        return connection_string.to_string();
    }
    format!("sqlite://{}", connection_string)
}
