//! In-memory adapter for unit tests.
//!
//! Tables are plain vectors of JSON values; every statement is counted and
//! individual tables can be told to fail.

use crate::Result;
use crate::adapters::{DatabaseAdapter, SchemaInspector, SqlExecutor};
use crate::error::UserBackupError;
use crate::models::{ColumnSet, DatabaseType, FilterSpec, FilterValue, Row};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Mutex;

struct MemoryTable {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[derive(Default)]
struct State {
    tables: Vec<MemoryTable>,
    select_calls: usize,
    delete_batches: Vec<usize>,
    fail_list_tables: bool,
    fail_columns: HashSet<String>,
    lost_on_columns: HashSet<String>,
    fail_selects: HashSet<String>,
    fail_deletes: HashSet<String>,
}

#[derive(Default)]
pub(crate) struct MemoryAdapter {
    state: Mutex<State>,
}

fn matches(value: &Value, filter: &FilterValue) -> bool {
    match filter {
        FilterValue::Integer(i) => value.as_i64() == Some(*i),
        FilterValue::Text(s) => value.as_str() == Some(s.as_str()),
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

impl MemoryAdapter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn create_table(&self, name: &str, columns: &[&str]) {
        self.state().tables.push(MemoryTable {
            name: name.to_string(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            rows: Vec::new(),
        });
    }

    pub(crate) fn insert(&self, table: &str, values: Vec<Value>) {
        let mut state = self.state();
        let table = state.tables.iter_mut().find(|t| t.name == table).unwrap();
        assert_eq!(table.columns.len(), values.len());
        table.rows.push(values);
    }

    pub(crate) fn row_count(&self, table: &str) -> usize {
        self.state()
            .tables
            .iter()
            .find(|t| t.name == table)
            .map_or(0, |t| t.rows.len())
    }

    pub(crate) fn select_calls(&self) -> usize {
        self.state().select_calls
    }

    pub(crate) fn delete_batch_sizes(&self) -> Vec<usize> {
        self.state().delete_batches.clone()
    }

    pub(crate) fn fail_list_tables(&self) {
        self.state().fail_list_tables = true;
    }

    pub(crate) fn fail_columns_on(&self, table: &str) {
        self.state().fail_columns.insert(table.to_string());
    }

    /// Drops the connection when the columns of `table` are listed.
    pub(crate) fn lose_connection_on_columns(&self, table: &str) {
        self.state().lost_on_columns.insert(table.to_string());
    }

    pub(crate) fn fail_selects_on(&self, table: &str) {
        self.state().fail_selects.insert(table.to_string());
    }

    pub(crate) fn fail_deletes_on(&self, table: &str) {
        self.state().fail_deletes.insert(table.to_string());
    }
}

#[async_trait]
impl SchemaInspector for MemoryAdapter {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let state = self.state();
        if state.fail_list_tables {
            return Err(UserBackupError::query_rejected("catalog unavailable"));
        }
        Ok(state.tables.iter().map(|t| t.name.clone()).collect())
    }

    async fn has_table(&self, table: &str) -> Result<bool> {
        Ok(self.state().tables.iter().any(|t| t.name == table))
    }

    async fn list_columns(&self, table: &str) -> Result<ColumnSet> {
        let state = self.state();
        if state.lost_on_columns.contains(table) {
            return Err(UserBackupError::connection_failed(
                format!("Failed to list columns of '{}'", table),
                std::io::Error::from(std::io::ErrorKind::ConnectionReset),
            ));
        }
        if state.fail_columns.contains(table) {
            return Err(UserBackupError::introspection_failed(
                table,
                "column listing failed",
                std::io::Error::other("injected"),
            ));
        }
        Ok(state
            .tables
            .iter()
            .find(|t| t.name == table)
            .map(|t| ColumnSet::from_names(&t.columns))
            .unwrap_or_default())
    }
}

#[async_trait]
impl SqlExecutor for MemoryAdapter {
    async fn select_page(&self, filter: &FilterSpec, offset: u64, limit: usize) -> Result<Vec<Row>> {
        if filter.values.is_empty() {
            return Ok(Vec::new());
        }

        let mut state = self.state();
        state.select_calls += 1;
        if state.fail_selects.contains(&filter.table) {
            return Err(UserBackupError::query_rejected("page query failed"));
        }

        let Some(table) = state.tables.iter().find(|t| t.name == filter.table) else {
            return Err(UserBackupError::query_rejected("no such table"));
        };
        let Some(index) = table.columns.iter().position(|c| *c == filter.column) else {
            return Err(UserBackupError::query_rejected("no such column"));
        };

        let mut matching: Vec<&Vec<Value>> = table
            .rows
            .iter()
            .filter(|row| filter.values.iter().any(|v| matches(&row[index], v)))
            .collect();
        matching.sort_by(|a, b| compare(&a[index], &b[index]));

        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(limit)
            .map(|values| {
                table
                    .columns
                    .iter()
                    .cloned()
                    .zip(values.iter().cloned())
                    .collect::<Row>()
            })
            .collect())
    }

    async fn delete_where_in(&self, table: &str, column: &str, batch: &[FilterValue]) -> Result<u64> {
        if batch.is_empty() {
            return Err(UserBackupError::query_rejected("empty delete batch"));
        }

        let mut state = self.state();
        if state.fail_deletes.contains(table) {
            return Err(UserBackupError::query_rejected("lock wait timeout"));
        }
        state.delete_batches.push(batch.len());

        let Some(target) = state.tables.iter_mut().find(|t| t.name == table) else {
            return Err(UserBackupError::query_rejected("no such table"));
        };
        let Some(index) = target.columns.iter().position(|c| c == column) else {
            return Err(UserBackupError::query_rejected("no such column"));
        };

        let before = target.rows.len();
        target
            .rows
            .retain(|row| !batch.iter().any(|v| matches(&row[index], v)));
        Ok((before - target.rows.len()) as u64)
    }
}

impl DatabaseAdapter for MemoryAdapter {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }
}
