//! Per-session collection of unconsumed row sequences.
//!
//! A [`BackupAggregator`] is filled table by table during one fetch and
//! turned into a [`BackupDocument`] with [`BackupAggregator::snapshot`].
//! Neither step polls a stream; the serializer is the only consumer.
//!
//! The aggregator is owned by exactly one in-flight fetch. Call
//! [`BackupAggregator::clear`] before starting another session on the same
//! instance.

use crate::models::Row;
use crate::stream::RowSequence;

/// Ordered table name to row sequences mapping.
///
/// Tables keep the order of their first append; the sequences of one table
/// keep append order.
#[derive(Debug, Clone, Default)]
pub struct BackupDocument {
    tables: Vec<(String, Vec<RowSequence>)>,
}

impl BackupDocument {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a document from already materialized rows, one sequence per
    /// table.
    pub fn from_rows(tables: Vec<(String, Vec<Row>)>) -> Self {
        let mut document = Self::new();
        for (table, rows) in tables {
            let sequence = RowSequence::from_rows(&table, rows);
            document.push(table, sequence);
        }
        document
    }

    fn push(&mut self, table: String, sequence: RowSequence) {
        match self.tables.iter_mut().find(|(name, _)| *name == table) {
            Some((_, sequences)) => sequences.push(sequence),
            None => self.tables.push((table, vec![sequence])),
        }
    }

    /// Iterates `(table, sequences)` in first-append order.
    pub fn tables(&self) -> impl Iterator<Item = (&str, &[RowSequence])> {
        self.tables
            .iter()
            .map(|(name, sequences)| (name.as_str(), sequences.as_slice()))
    }

    /// Table names in first-append order.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Number of distinct tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if no table was appended.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Returns true once every sequence has been taken.
    pub fn is_drained(&self) -> bool {
        self.tables
            .iter()
            .flat_map(|(_, sequences)| sequences)
            .all(RowSequence::is_consumed)
    }
}

/// Collects row sequences for one backup session.
#[derive(Debug, Default)]
pub struct BackupAggregator {
    document: BackupDocument,
}

impl BackupAggregator {
    /// Starts an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `sequence` under `table` without polling it.
    ///
    /// Appending to a known table adds the sequence after the earlier
    /// ones, so contributions from several connections are concatenated.
    pub fn append(&mut self, table: impl Into<String>, sequence: RowSequence) {
        let table = table.into();
        tracing::trace!("Appending sequence for table '{}'", table);
        self.document.push(table, sequence);
    }

    /// Returns the current mapping without consuming anything.
    ///
    /// The returned document shares its sequences with the aggregator, so
    /// draining it marks them consumed here as well.
    pub fn snapshot(&self) -> BackupDocument {
        self.document.clone()
    }

    /// Resets to an empty session.
    pub fn clear(&mut self) {
        self.document = BackupDocument::new();
    }

    /// Returns true if nothing was appended since the last clear.
    pub fn is_empty(&self) -> bool {
        self.document.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;

    fn row(id: i64) -> Row {
        let mut row = Row::new();
        row.insert("id".to_string(), json!(id));
        row
    }

    #[test]
    fn test_append_order_and_concatenation() {
        let mut aggregator = BackupAggregator::new();
        aggregator.append("users", RowSequence::from_rows("users", vec![row(1)]));
        aggregator.append("orders", RowSequence::from_rows("orders", vec![row(10)]));
        aggregator.append("users", RowSequence::from_rows("users", vec![row(2)]));

        let document = aggregator.snapshot();
        assert_eq!(document.table_names(), vec!["users", "orders"]);

        let counts: Vec<usize> = document.tables().map(|(_, s)| s.len()).collect();
        assert_eq!(counts, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_snapshot_does_not_consume() {
        let mut aggregator = BackupAggregator::new();
        aggregator.append("users", RowSequence::from_rows("users", vec![row(1), row(2)]));

        let first = aggregator.snapshot();
        let second = aggregator.snapshot();
        assert!(!first.is_drained());

        let (_, sequences) = first.tables().next().unwrap();
        let rows: Vec<Row> = sequences[0].take().unwrap().try_collect().await.unwrap();
        assert_eq!(rows, vec![row(1), row(2)]);

        // both snapshots refer to the same single-pass sequence
        assert!(second.is_drained());
    }

    #[test]
    fn test_clear_starts_a_new_session() {
        let mut aggregator = BackupAggregator::new();
        aggregator.append("users", RowSequence::from_rows("users", vec![row(1)]));
        let old = aggregator.snapshot();

        aggregator.clear();
        assert!(aggregator.is_empty());
        assert!(aggregator.snapshot().is_empty());
        assert_eq!(old.len(), 1);
    }

    #[test]
    fn test_empty_document_is_drained() {
        let document = BackupDocument::new();
        assert!(document.is_empty());
        assert!(document.is_drained());
    }
}
