//! Core data models shared by the backup and deletion pipelines.
//!
//! These types describe *whose* rows are wanted ([`UserIdentity`]), how a
//! table is filtered ([`FilterSpec`]), what a table looks like
//! ([`ColumnSet`]) and what a fetched record is ([`Row`]).

use serde::{Deserialize, Serialize};

/// One fetched record: column name to scalar or null, in column order.
///
/// Backed by `serde_json::Map` with `preserve_order`, so the encoded object
/// keeps the column order the database returned.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseType {
    /// MySQL or MariaDB
    MySQL,
    /// SQLite file or in-memory database
    SQLite,
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseType::MySQL => write!(f, "MySQL"),
            DatabaseType::SQLite => write!(f, "SQLite"),
        }
    }
}

/// The identifiers that define "this user's data".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// The user's own id
    pub user_id: i64,
    /// Accounts (subaccounts) owned by the user
    #[serde(default)]
    pub account_ids: Vec<i64>,
    /// Assets (actives) owned by the user
    #[serde(default)]
    pub active_ids: Vec<i64>,
}

impl UserIdentity {
    /// Creates an identity with no accounts or actives.
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            account_ids: Vec::new(),
            active_ids: Vec::new(),
        }
    }

    /// Builder method to set account ids.
    pub fn with_accounts(mut self, account_ids: Vec<i64>) -> Self {
        self.account_ids = account_ids;
        self
    }

    /// Builder method to set active ids.
    pub fn with_actives(mut self, active_ids: Vec<i64>) -> Self {
        self.active_ids = active_ids;
        self
    }

    /// Returns the id list selected by `list`.
    pub fn ids(&self, list: IdentityList) -> Vec<i64> {
        match list {
            IdentityList::User => vec![self.user_id],
            IdentityList::Accounts => self.account_ids.clone(),
            IdentityList::Actives => self.active_ids.clone(),
        }
    }
}

/// Which of the identity's id lists a filter column draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityList {
    /// `[user_id]`
    User,
    /// `account_ids`
    Accounts,
    /// `active_ids`
    Actives,
}

/// A value bound into an `IN (...)` predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// Numeric identifier
    Integer(i64),
    /// Textual identifier, namespaced when configured
    Text(String),
}

impl std::fmt::Display for FilterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterValue::Integer(v) => write!(f, "{}", v),
            FilterValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Integer(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

/// Normalized column type, only as fine-grained as filtering needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    /// Declared as a character or text type
    Textual,
    /// Anything else
    Other,
}

impl ColumnKind {
    /// Classifies a declared SQL type name.
    ///
    /// Follows SQLite affinity rule 2 (CHAR/CLOB/TEXT) and extends it with
    /// the MySQL string families.
    ///
    /// # Example
    /// ```rust
    /// use userbackup_core::models::ColumnKind;
    ///
    /// assert_eq!(ColumnKind::from_declared_type("VARCHAR(36)"), ColumnKind::Textual);
    /// assert_eq!(ColumnKind::from_declared_type("bigint unsigned"), ColumnKind::Other);
    /// ```
    pub fn from_declared_type(declared: &str) -> Self {
        let upper = declared.trim().to_uppercase();
        const TEXTUAL_MARKERS: &[&str] = &["CHAR", "CLOB", "TEXT", "STRING", "ENUM", "SET("];

        if TEXTUAL_MARKERS.iter().any(|marker| upper.contains(marker)) {
            ColumnKind::Textual
        } else {
            ColumnKind::Other
        }
    }
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name as reported by the database
    pub name: String,
    /// Normalized declared type
    pub kind: ColumnKind,
}

impl ColumnInfo {
    /// Creates a column description.
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Ordered set of columns for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSet {
    columns: Vec<ColumnInfo>,
}

impl ColumnSet {
    /// Builds a set, dropping repeated names (first occurrence wins).
    pub fn new(columns: impl IntoIterator<Item = ColumnInfo>) -> Self {
        let mut unique: Vec<ColumnInfo> = Vec::new();
        for column in columns {
            if !unique.iter().any(|c| c.name == column.name) {
                unique.push(column);
            }
        }
        Self { columns: unique }
    }

    /// Builds a set where every column has kind [`ColumnKind::Other`].
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self::new(
            names
                .iter()
                .map(|n| ColumnInfo::new(n.as_ref(), ColumnKind::Other)),
        )
    }

    /// Returns true if a column is named exactly `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Kind of the column `name`, if present.
    pub fn kind_of(&self, name: &str) -> Option<ColumnKind> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.kind)
    }

    /// Columns in table order.
    pub fn iter(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter()
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true for a table without columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Resolved filter for one table: `column IN (values)`.
///
/// A table has either exactly one `FilterSpec` or none at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Table to filter
    pub table: String,
    /// Identifier column
    pub column: String,
    /// Values bound into `IN (...)`; never empty for a resolved table
    pub values: Vec<FilterValue>,
}
