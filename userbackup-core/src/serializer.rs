//! Incremental JSON encoding of a [`BackupDocument`].
//!
//! The serializer drains every sequence of the document exactly once and
//! writes `{"table":[row,...],...}` to an async byte sink as it goes. Only
//! the row being encoded is held in memory; the sink decides how much it
//! buffers.

use crate::Result;
use crate::aggregate::BackupDocument;
use crate::error::UserBackupError;
use crate::models::Row;
use futures::TryStreamExt;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Counters collected while writing one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerializeStats {
    /// Top-level keys written
    pub tables: usize,
    /// Row objects written
    pub rows: u64,
    /// Bytes written to the sink
    pub bytes: u64,
}

/// Writes backup documents as one compact JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingSerializer;

impl StreamingSerializer {
    /// Creates a serializer.
    pub fn new() -> Self {
        Self
    }

    /// Drains `document` into `sink`.
    ///
    /// Tables come out in first-append order, sequences in append order and
    /// rows in yield order. An empty document is written as `{}`.
    ///
    /// # Errors
    /// - `Encoding` if a row holds a nested object or array
    /// - `SequenceConsumed` if a sequence was already drained
    /// - any error yielded by a row stream, or an `Io` error from the sink
    ///
    /// Output written before an error is not a valid document.
    pub async fn write<W>(&self, sink: &mut W, document: &BackupDocument) -> Result<SerializeStats>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut stats = SerializeStats::default();
        let mut buffer = Vec::with_capacity(1024);

        emit(sink, b"{", &mut stats).await?;

        for (table_index, (table, sequences)) in document.tables().enumerate() {
            buffer.clear();
            if table_index > 0 {
                buffer.push(b',');
            }
            serde_json::to_writer(&mut buffer, table)
                .map_err(|e| UserBackupError::encoding(table, e.to_string()))?;
            buffer.extend_from_slice(b":[");
            emit(sink, &buffer, &mut stats).await?;

            let mut first_row = true;
            let mut table_rows = 0u64;
            for sequence in sequences {
                let mut rows = sequence.take()?;
                while let Some(row) = rows.try_next().await? {
                    buffer.clear();
                    if !first_row {
                        buffer.push(b',');
                    }
                    encode_row(table, &row, &mut buffer)?;
                    emit(sink, &buffer, &mut stats).await?;
                    first_row = false;
                    table_rows += 1;
                }
            }

            emit(sink, b"]", &mut stats).await?;
            tracing::debug!("Serialized {} rows for table '{}'", table_rows, table);
            stats.tables += 1;
            stats.rows += table_rows;
        }

        emit(sink, b"}", &mut stats).await?;
        sink.flush()
            .await
            .map_err(|e| UserBackupError::io("Failed to flush backup output", e))?;

        Ok(stats)
    }
}

async fn emit<W>(sink: &mut W, bytes: &[u8], stats: &mut SerializeStats) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    sink.write_all(bytes)
        .await
        .map_err(|e| UserBackupError::io("Failed to write backup output", e))?;
    stats.bytes += bytes.len() as u64;
    Ok(())
}

/// Appends one row as a JSON object, rejecting non-scalar values.
fn encode_row(table: &str, row: &Row, buffer: &mut Vec<u8>) -> Result<()> {
    if let Some((column, _)) = row
        .iter()
        .find(|(_, value)| matches!(value, Value::Object(_) | Value::Array(_)))
    {
        return Err(UserBackupError::encoding(
            table,
            format!("column '{}' holds a nested value", column),
        ));
    }

    serde_json::to_writer(buffer, row).map_err(|e| UserBackupError::encoding(table, e.to_string()))
}
