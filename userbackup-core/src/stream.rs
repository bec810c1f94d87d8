//! Paginated, lazy row streams.
//!
//! [`RowStreamer::stream`] turns a [`FilterSpec`] into a stream that pages
//! through `WHERE column IN (values) ORDER BY column`, holding at most one
//! page in memory. Nothing is queried until the stream is polled.
//!
//! [`RowSequence`] is the handle the aggregator keeps: cloning it shares
//! the same underlying stream, and the stream can be taken exactly once.

use crate::Result;
use crate::adapters::SqlExecutor;
use crate::config::DEFAULT_PAGE_SIZE;
use crate::error::UserBackupError;
use crate::models::{FilterSpec, Row};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// A lazy, finite, ordered stream of rows.
pub type RowStream = BoxStream<'static, Result<Row>>;

/// Pages through one table on one connection.
#[derive(Clone)]
pub struct RowStreamer {
    executor: Arc<dyn SqlExecutor>,
    page_size: usize,
}

impl std::fmt::Debug for RowStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStreamer")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

struct PageCursor {
    executor: Arc<dyn SqlExecutor>,
    filter: FilterSpec,
    page_size: usize,
    offset: u64,
    page: VecDeque<Row>,
    exhausted: bool,
}

impl RowStreamer {
    /// Creates a streamer with the default page size of 1000 rows.
    pub fn new(executor: Arc<dyn SqlExecutor>) -> Self {
        Self::with_page_size(executor, DEFAULT_PAGE_SIZE)
    }

    /// Creates a streamer; a zero page size is raised to 1.
    pub fn with_page_size(executor: Arc<dyn SqlExecutor>, page_size: usize) -> Self {
        Self {
            executor,
            page_size: page_size.max(1),
        }
    }

    /// Streams every row matching `filter`.
    ///
    /// Each call starts a fresh cursor at offset 0. `None` or an empty
    /// value list gives an empty stream and issues no query. Iteration
    /// stops after the first page shorter than the page size.
    pub fn stream(&self, filter: Option<FilterSpec>) -> RowStream {
        let Some(filter) = filter.filter(|f| !f.values.is_empty()) else {
            return stream::empty().boxed();
        };

        let cursor = PageCursor {
            executor: Arc::clone(&self.executor),
            filter,
            page_size: self.page_size,
            offset: 0,
            page: VecDeque::new(),
            exhausted: false,
        };

        stream::try_unfold(cursor, |mut cursor| async move {
            loop {
                if let Some(row) = cursor.page.pop_front() {
                    return Ok(Some((row, cursor)));
                }
                if cursor.exhausted {
                    return Ok(None);
                }

                let rows = cursor
                    .executor
                    .select_page(&cursor.filter, cursor.offset, cursor.page_size)
                    .await?;

                tracing::trace!(
                    "Fetched {} rows from '{}' at offset {}",
                    rows.len(),
                    cursor.filter.table,
                    cursor.offset
                );

                if rows.len() < cursor.page_size {
                    cursor.exhausted = true;
                }
                cursor.offset = cursor.offset.saturating_add(rows.len() as u64);
                cursor.page = rows.into();
            }
        })
        .boxed()
    }
}

/// A shared handle to one not-yet-consumed row stream.
///
/// Clones refer to the same stream; [`RowSequence::take`] hands it out
/// once and fails with `SequenceConsumed` afterwards, so a page cursor is
/// never replayed.
#[derive(Clone)]
pub struct RowSequence {
    table: Arc<str>,
    inner: Arc<Mutex<Option<RowStream>>>,
}

impl std::fmt::Debug for RowSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowSequence")
            .field("table", &self.table)
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

impl RowSequence {
    /// Wraps `stream`, which yields the rows of `table`.
    pub fn new(table: &str, stream: RowStream) -> Self {
        Self {
            table: Arc::from(table),
            inner: Arc::new(Mutex::new(Some(stream))),
        }
    }

    /// Wraps already materialized rows.
    pub fn from_rows(table: &str, rows: Vec<Row>) -> Self {
        Self::new(table, stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    /// Returns true once any clone has taken the stream.
    pub fn is_consumed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Takes the stream out of the handle.
    ///
    /// # Errors
    /// Returns `SequenceConsumed` if any clone already took it.
    pub fn take(&self) -> Result<RowStream> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| UserBackupError::SequenceConsumed {
                table: self.table.to_string(),
            })
    }
}
