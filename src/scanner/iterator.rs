//! Prefetching row iterator.

use super::ColumnMetadata;
use crate::connection::{QueryStatement, ResultPage, Session, Statement};
use crate::error::{Error, Result};
use crate::metrics::ReadMetrics;
use crate::rate_limiter::RateLimiter;
use crate::types::{Row, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

/// Rows of one scan.
///
/// While the caller consumes a page, a reader task fetches the following
/// ones into a bounded channel. Dropping the iterator stops the reader.
pub struct RowIterator {
    columns: Arc<ColumnMetadata>,
    current: VecDeque<Vec<Value>>,
    pages: Option<mpsc::Receiver<Result<ResultPage>>>,
    limiter: Option<Arc<RateLimiter>>,
    metrics: Option<Arc<ReadMetrics>>,
    cancel: CancellationToken,
    _reader_guard: Option<DropGuard>,
}

impl std::fmt::Debug for RowIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowIterator")
            .field("buffered", &self.current.len())
            .field("more_pages", &self.pages.is_some())
            .finish()
    }
}

pub(crate) struct IteratorParts {
    pub session: Arc<dyn Session>,
    pub statement: QueryStatement,
    pub first_page: ResultPage,
    pub columns: Arc<ColumnMetadata>,
    pub prefetch_pages: usize,
    pub limiter: Option<Arc<RateLimiter>>,
    pub metrics: Option<Arc<ReadMetrics>>,
    pub cancel: CancellationToken,
}

impl RowIterator {
    pub(crate) fn new(parts: IteratorParts) -> Self {
        let IteratorParts {
            session,
            statement,
            first_page,
            columns,
            prefetch_pages,
            limiter,
            metrics,
            cancel,
        } = parts;

        if let Some(metrics) = &metrics {
            metrics.pages_fetched.inc();
        }

        let (pages, reader_guard) = match first_page.paging_state.clone() {
            Some(state) => {
                let reader_cancel = cancel.child_token();
                let (tx, rx) = mpsc::channel(prefetch_pages.max(1));
                tokio::spawn(read_pages(
                    session,
                    statement,
                    state,
                    tx,
                    metrics.clone(),
                    reader_cancel.clone(),
                ));
                (Some(rx), Some(reader_cancel.drop_guard()))
            }
            None => (None, None),
        };

        Self {
            columns,
            current: first_page.rows.into(),
            pages,
            limiter,
            metrics,
            cancel,
            _reader_guard: reader_guard,
        }
    }

    /// Get the column metadata of the rows.
    pub fn columns(&self) -> &Arc<ColumnMetadata> {
        &self.columns
    }

    /// Next row, or `None` once every page is consumed.
    ///
    /// Suspends while the next page is still in flight and, with a
    /// throughput cap, while the rate limiter pays for the row.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(values) = self.current.pop_front() {
                let row = Row::new(self.columns.names.clone(), values);
                self.account(&row).await?;
                return Ok(Some(row));
            }

            let Some(pages) = self.pages.as_mut() else {
                return Ok(None);
            };
            let page = tokio::select! {
                page = pages.recv() => page,
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            };
            match page {
                Some(Ok(page)) => self.current = page.rows.into(),
                Some(Err(e)) => {
                    self.pages = None;
                    return Err(e);
                }
                None => self.pages = None,
            }
        }
    }

    /// Drain the remaining rows.
    pub async fn collect(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn account(&self, row: &Row) -> Result<()> {
        if self.limiter.is_none() && self.metrics.is_none() {
            return Ok(());
        }
        let size = self.columns.row_size(row.values())?;
        if let Some(limiter) = &self.limiter {
            limiter.maybe_sleep(size as u64, &self.cancel).await?;
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_row(size);
        }
        Ok(())
    }
}

async fn read_pages(
    session: Arc<dyn Session>,
    statement: QueryStatement,
    mut state: bytes::Bytes,
    tx: mpsc::Sender<Result<ResultPage>>,
    metrics: Option<Arc<ReadMetrics>>,
    cancel: CancellationToken,
) {
    let mut fetched = 1usize;
    loop {
        let next = Statement::Query(statement.clone().with_paging_state(Some(state)));
        let result = tokio::select! {
            result = session.execute(&next) => result,
            _ = cancel.cancelled() => break,
        };

        let more = match &result {
            Ok(page) => {
                fetched += 1;
                if let Some(metrics) = &metrics {
                    metrics.pages_fetched.inc();
                }
                page.paging_state.clone()
            }
            Err(_) => None,
        };
        if tx.send(result).await.is_err() {
            // Iterator dropped.
            break;
        }
        match more {
            Some(next_state) => state = next_state,
            None => break,
        }
    }
    debug!(pages = fetched, "Page reader finished");
}
