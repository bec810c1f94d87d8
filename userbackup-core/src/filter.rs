//! Filter column resolution for tables of unknown schema.
//!
//! Decides which column of a table identifies the user's rows and which
//! identifier list goes into its `IN (...)` predicate. Fetch and delete both
//! go through [`FilterResolver::filter_spec`], so they always agree on what
//! a user owns.
//!
//! # Resolution Order
//! 1. Table-name override (e.g. `users` is keyed by its own `id`)
//! 2. First present column of [`FILTER_COLUMN_PRIORITY`]
//! 3. Otherwise the table is out of scope
//!
//! Nothing in this module touches a database.

use crate::config::{BackupConfig, TableOverride};
use crate::models::{ColumnKind, ColumnSet, FilterSpec, FilterValue, IdentityList, UserIdentity};

/// Column names scanned, in order, when no override applies.
pub const FILTER_COLUMN_PRIORITY: &[&str] = &[
    "user_id",
    "account_id",
    "from_account_id",
    "to_account_id",
    "active_id",
];

/// Columns whose values are the user's account ids.
const ACCOUNT_COLUMNS: &[&str] = &[
    "account_id",
    "from_account_id",
    "to_account_id",
    "subaccount_id",
];

/// Why a table took no part in a fetch or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Listed in the ignored tables
    Ignored,
    /// The catalog listed it but the table no longer exists
    MissingTable,
    /// Its columns could not be listed
    Introspection(String),
    /// No filter column could be resolved
    UnresolvedFilter,
    /// A column resolved but the identity has no ids for it
    EmptyValueSet { column: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Ignored => write!(f, "ignored by configuration"),
            SkipReason::MissingTable => write!(f, "table does not exist"),
            SkipReason::Introspection(message) => write!(f, "introspection failed: {}", message),
            SkipReason::UnresolvedFilter => write!(f, "no filter column"),
            SkipReason::EmptyValueSet { column } => {
                write!(f, "no identifier values for column '{}'", column)
            }
        }
    }
}

/// Pure resolver from (table, columns, identity) to a [`FilterSpec`].
#[derive(Debug, Clone, Default)]
pub struct FilterResolver {
    overrides: Vec<TableOverride>,
    namespace: Option<String>,
}

impl FilterResolver {
    /// Creates a resolver with explicit overrides and tenant namespace.
    pub fn new(overrides: Vec<TableOverride>, namespace: Option<String>) -> Self {
        Self {
            overrides,
            namespace,
        }
    }

    /// Creates a resolver from the overrides and namespace of `config`.
    pub fn from_config(config: &BackupConfig) -> Self {
        Self::new(config.table_overrides.clone(), config.namespace.clone())
    }

    fn override_for(&self, table: &str) -> Option<&TableOverride> {
        self.overrides.iter().find(|o| o.table == table)
    }

    /// Resolves the filter column of `table`, if any.
    ///
    /// # Example
    /// ```rust
    /// use userbackup_core::config::TableOverride;
    /// use userbackup_core::filter::FilterResolver;
    /// use userbackup_core::models::ColumnSet;
    ///
    /// let resolver = FilterResolver::new(TableOverride::defaults(), None);
    /// let columns = ColumnSet::from_names(&["id", "account_id", "active_id"]);
    ///
    /// assert_eq!(resolver.resolve_filter("orders", &columns).as_deref(), Some("account_id"));
    /// assert_eq!(resolver.resolve_filter("users", &columns).as_deref(), Some("id"));
    /// ```
    pub fn resolve_filter(&self, table: &str, columns: &ColumnSet) -> Option<String> {
        if let Some(table_override) = self.override_for(table) {
            return Some(table_override.column.clone());
        }

        FILTER_COLUMN_PRIORITY
            .iter()
            .find(|candidate| columns.contains(candidate))
            .map(|candidate| (*candidate).to_string())
    }

    /// Maps a resolved column to the identifier list it filters on.
    ///
    /// An empty result means the table must be skipped.
    pub fn build_values(&self, table: &str, column: &str, identity: &UserIdentity) -> Vec<i64> {
        if let Some(table_override) = self.override_for(table)
            && table_override.column == column
        {
            return identity.ids(table_override.identity);
        }

        if column == "user_id" {
            return identity.ids(IdentityList::User);
        }

        if ACCOUNT_COLUMNS.contains(&column) {
            return identity.ids(IdentityList::Accounts);
        }

        if column == "active_id" {
            return identity.ids(IdentityList::Actives);
        }

        // A column we cannot scope: deleting or exporting nothing beats
        // guessing.
        Vec::new()
    }

    /// Converts ids to bind values, prefixing textual `user_id` columns.
    pub fn prepare_values(&self, column: &str, columns: &ColumnSet, ids: Vec<i64>) -> Vec<FilterValue> {
        let textual_identity =
            column == "user_id" && columns.kind_of(column) == Some(ColumnKind::Textual);

        match (&self.namespace, textual_identity) {
            (Some(namespace), true) => ids
                .into_iter()
                .map(|id| FilterValue::Text(format!("{}-{}", namespace, id)))
                .collect(),
            _ => ids.into_iter().map(FilterValue::Integer).collect(),
        }
    }

    /// Resolves column and values for `table` in one step.
    ///
    /// # Errors
    /// Returns the [`SkipReason`] when the table has no filter column or the
    /// identity has no ids for it.
    pub fn filter_spec(
        &self,
        table: &str,
        columns: &ColumnSet,
        identity: &UserIdentity,
    ) -> Result<FilterSpec, SkipReason> {
        let column = self
            .resolve_filter(table, columns)
            .ok_or(SkipReason::UnresolvedFilter)?;

        let ids = self.build_values(table, &column, identity);
        if ids.is_empty() {
            return Err(SkipReason::EmptyValueSet { column });
        }

        let values = self.prepare_values(&column, columns, ids);

        Ok(FilterSpec {
            table: table.to_string(),
            column,
            values,
        })
    }
}
