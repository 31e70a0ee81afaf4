//! Table scanner.
//!
//! One [`Scanner`] serves one compute task. It owns a single session for its
//! whole life: `Created -> Scanning* -> Closed`. Closing is idempotent and also
//! happens on drop, so every exit path releases the session exactly once.

mod iterator;

pub use iterator::RowIterator;

use crate::config::ReadConfig;
use crate::connection::{Codec, ColumnSpec, Connector, QueryStatement, Session, Statement};
use crate::error::{Error, Result};
use crate::metrics::ReadMetrics;
use crate::rate_limiter::RateLimiter;
use crate::types::{TaskContext, Value};
use iterator::IteratorParts;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Columns of a scan result, resolved once per scan.
#[derive(Debug, Clone)]
pub struct ColumnMetadata {
    pub names: Arc<[String]>,
    pub specs: Arc<[ColumnSpec]>,
    pub codecs: Vec<Codec>,
}

impl ColumnMetadata {
    /// Position of a column.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Estimated serialized size of a row.
    pub fn row_size(&self, values: &[Value]) -> Result<usize> {
        let mut size = 0;
        for (codec, value) in self.codecs.iter().zip(values) {
            size += codec.serialized_size(value)?;
        }
        Ok(size)
    }
}

/// Rows and metadata returned by [`Scanner::scan`].
#[derive(Debug)]
pub struct ScanResult {
    pub columns: Arc<ColumnMetadata>,
    pub rows: RowIterator,
}

/// Per-task reader over one session.
#[derive(Debug)]
pub struct Scanner {
    connector: Arc<dyn Connector>,
    session: Mutex<Option<Arc<dyn Session>>>,
    config: ReadConfig,
    limiter: Option<Arc<RateLimiter>>,
    metrics: Option<Arc<ReadMetrics>>,
    task: TaskContext,
    /// Cancelled on close or when the task is cancelled.
    cancel: CancellationToken,
}

impl Scanner {
    /// Open the task's session.
    pub async fn open(
        connector: Arc<dyn Connector>,
        config: ReadConfig,
        task: TaskContext,
    ) -> Result<Self> {
        config.validate()?;
        let cancel = task.cancel.child_token();

        let session = tokio::select! {
            session = connector.open_session() => session?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };
        let limiter = config
            .throughput_mib_per_sec
            .map(|mib| Arc::new(RateLimiter::from_mib_per_sec(mib)));

        debug!(task = %task.id, partition = task.partition, "Scanner opened");
        Ok(Self {
            connector,
            session: Mutex::new(Some(session)),
            config,
            limiter,
            metrics: None,
            task,
            cancel,
        })
    }

    /// Report rows read to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<ReadMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Get the task this scanner belongs to.
    pub fn task(&self) -> &TaskContext {
        &self.task
    }

    /// Whether the session has been released.
    pub fn is_closed(&self) -> bool {
        self.session.lock().is_none()
    }

    /// Execute a statement and iterate over its rows.
    ///
    /// Waits for the first page only; later pages are prefetched while rows
    /// are consumed. A failed statement is returned as is, without retry.
    pub async fn scan(&self, statement: QueryStatement) -> Result<ScanResult> {
        let session = self.session.lock().clone().ok_or(Error::ScannerClosed)?;

        let first = Statement::Query(statement.clone());
        let first_page = tokio::select! {
            page = session.execute(&first) => page?,
            _ = self.cancel.cancelled() => {
                return Err(if self.is_closed() { Error::ScannerClosed } else { Error::Cancelled });
            }
        };

        let registry = self.connector.codec_registry();
        let codecs = first_page
            .columns
            .iter()
            .map(|c| registry.codec_for(&c.data_type))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let columns = Arc::new(ColumnMetadata {
            names: first_page.columns.iter().map(|c| c.name.clone()).collect(),
            specs: first_page.columns.clone(),
            codecs,
        });

        let rows = RowIterator::new(IteratorParts {
            session,
            statement,
            first_page,
            columns: columns.clone(),
            prefetch_pages: self.config.prefetch_pages,
            limiter: self.limiter.clone(),
            metrics: self.metrics.clone(),
            cancel: self.cancel.clone(),
        });
        Ok(ScanResult { columns, rows })
    }

    /// Release the session. Later calls do nothing.
    ///
    /// A failure to close is logged and otherwise ignored so it never masks
    /// the outcome of the task.
    pub fn close(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };
        self.cancel.cancel();
        match session.close() {
            Ok(()) => debug!(task = %self.task.id, "Scanner closed"),
            Err(e) => warn!(task = %self.task.id, error = %e, "Failed to close scanner session"),
        }
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    #[test]
    fn test_row_size() {
        let meta = ColumnMetadata {
            names: vec!["id".to_string(), "name".to_string()].into(),
            specs: vec![
                ColumnSpec::new("id", DataType::Int),
                ColumnSpec::new("name", DataType::Text),
            ]
            .into(),
            codecs: vec![Codec::Int, Codec::Text],
        };
        assert_eq!(meta.row_size(&[Value::Int(1), Value::from("abc")]).unwrap(), 7);
        assert_eq!(meta.row_size(&[Value::Int(1), Value::Null]).unwrap(), 4);
        assert_eq!(meta.index_of("name"), Some(1));
    }
}
