//! Configuration for backup and deletion runs.
//!
//! # Security
//! These structs never hold passwords or keys. Connection URLs may contain
//! credentials, so [`ConnectionSpec`] redacts them in `Debug` and `Display`.

use crate::error::{UserBackupError, redact_database_url};
use crate::models::IdentityList;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default rows per page when streaming a table.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Default number of values per `DELETE ... IN (...)` statement.
pub const DEFAULT_DELETE_BATCH_SIZE: usize = 500;

/// Default plaintext block size for chunked encryption: 5 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// A table keyed by its own identity column.
///
/// The override wins over every column-name heuristic for that table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOverride {
    /// Table the override applies to
    pub table: String,
    /// Column compared against the identity list
    pub column: String,
    /// Which identifiers of the user the column holds
    pub identity: IdentityList,
}

impl TableOverride {
    /// Creates an override for `table`.
    pub fn new(table: impl Into<String>, column: impl Into<String>, identity: IdentityList) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            identity,
        }
    }

    /// `users.id` holds the user id, `user_subaccounts.id` the account ids.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("users", "id", IdentityList::User),
            Self::new("user_subaccounts", "id", IdentityList::Accounts),
        ]
    }
}

/// A named database connection.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    /// Name used in reports and logs
    pub name: String,
    /// Database URL, credentials included; never logged unredacted
    pub url: String,
}

impl ConnectionSpec {
    /// Creates a connection spec.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

impl std::str::FromStr for ConnectionSpec {
    type Err = UserBackupError;

    /// Parses `name=url`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, url) = s.split_once('=').ok_or_else(|| {
            UserBackupError::configuration("connection must be given as name=url")
        })?;
        let name = name.trim();
        let url = url.trim();

        if name.is_empty() {
            return Err(UserBackupError::configuration("connection name cannot be empty"));
        }
        if url.is_empty() {
            return Err(UserBackupError::configuration(format!(
                "connection '{}' has an empty url",
                name
            )));
        }

        Ok(Self::new(name, url))
    }
}

impl std::fmt::Debug for ConnectionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSpec")
            .field("name", &self.name)
            .field("url", &redact_database_url(&self.url))
            .finish()
    }
}

impl std::fmt::Display for ConnectionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.name, redact_database_url(&self.url))
    }
}

/// Settings shared by fetch, save and delete.
///
/// # Example
/// ```rust
/// use userbackup_core::config::BackupConfig;
///
/// let config = BackupConfig::new("/var/backups/users")
///     .with_namespace("prod")
///     .with_ignored_tables(vec!["migrations".to_string()]);
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.page_size, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Root directory for backup artifacts
    pub base_dir: PathBuf,
    /// Whether saved artifacts are encrypted
    pub encrypt: bool,
    /// Plaintext bytes per ciphertext unit
    pub chunk_size: usize,
    /// Rows per page while streaming
    pub page_size: usize,
    /// Values per delete statement
    pub delete_batch_size: usize,
    /// Prefix for textual user ids, e.g. `prod` gives `prod-42`
    pub namespace: Option<String>,
    /// Tables never read nor deleted
    pub ignored_tables: Vec<String>,
    /// Tables resolved by name rather than by column heuristics
    pub table_overrides: Vec<TableOverride>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("backups"),
            encrypt: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            delete_batch_size: DEFAULT_DELETE_BATCH_SIZE,
            namespace: None,
            ignored_tables: Vec::new(),
            table_overrides: TableOverride::defaults(),
        }
    }
}

impl BackupConfig {
    /// Creates a config rooted at `base_dir` with defaults elsewhere.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    /// Validates configuration parameters.
    ///
    /// # Errors
    /// Returns error if a size is zero or the namespace is blank.
    pub fn validate(&self) -> crate::Result<()> {
        if self.page_size == 0 {
            return Err(UserBackupError::configuration(
                "page_size must be greater than 0",
            ));
        }

        if self.delete_batch_size == 0 {
            return Err(UserBackupError::configuration(
                "delete_batch_size must be greater than 0",
            ));
        }

        if self.chunk_size == 0 {
            return Err(UserBackupError::configuration(
                "chunk_size must be greater than 0",
            ));
        }

        if let Some(namespace) = &self.namespace
            && namespace.trim().is_empty()
        {
            return Err(UserBackupError::configuration(
                "namespace cannot be blank when set",
            ));
        }

        for table_override in &self.table_overrides {
            if table_override.table.is_empty() || table_override.column.is_empty() {
                return Err(UserBackupError::configuration(
                    "table overrides need both a table and a column",
                ));
            }
        }

        Ok(())
    }

    /// Prefixes textual `user_id` values with `{namespace}-`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Replaces the ignored table list.
    pub fn with_ignored_tables(mut self, tables: Vec<String>) -> Self {
        self.ignored_tables = tables;
        self
    }

    /// Builder method to toggle encryption.
    pub fn with_encryption(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }

    /// Builder method to set the rows fetched per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Builder method to set the values per `DELETE` statement.
    pub fn with_delete_batch_size(mut self, batch_size: usize) -> Self {
        self.delete_batch_size = batch_size;
        self
    }

    /// Builder method to set the plaintext bytes per encrypted chunk.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Returns true if `table` is never read or deleted.
    pub fn is_ignored(&self, table: &str) -> bool {
        self.ignored_tables.iter().any(|t| t == table)
    }
}
