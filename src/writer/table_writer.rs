//! Writing a stream of rows into one table.

use super::executor::{BatchExecutor, ExecutionStats};
use super::grouping::GroupingBatchBuilder;
use super::query::{QueryTemplate, RowWriter, WriteMode};
use crate::config::{FailurePolicy, WriteConfig};
use crate::connection::{Connector, Session};
use crate::error::{Error, Result};
use crate::metrics::MetricsSink;
use crate::rate_limiter::RateLimiter;
use crate::types::{TableDef, TaskContext};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Outcome of one [`TableWriter::write`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub rows_written: u64,
    pub batches: u64,
    pub bytes: u64,
    pub failed_batches: u64,
    /// Rows in failed batches plus rows that could not be bound.
    pub failed_rows: u64,
    pub elapsed: Duration,
}

impl WriteSummary {
    fn from_stats(stats: &ExecutionStats, skipped_rows: u64, elapsed: Duration) -> Self {
        Self {
            rows_written: stats.rows,
            batches: stats.batches,
            bytes: stats.bytes,
            failed_batches: stats.failed_batches,
            failed_rows: stats.failed_rows + skipped_rows,
            elapsed,
        }
    }
}

/// Closes the write session when dropped.
///
/// The session is released even if the `write` future is dropped before it
/// completes or the row iterator panics. Spawned batches are aborted along
/// with the executor's `JoinSet`.
struct SessionGuard<'a> {
    session: Arc<dyn Session>,
    task: &'a TaskContext,
    table: &'a TableDef,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.session.close() {
            warn!(
                task = %self.task.id,
                table = %self.table,
                error = %e,
                "Failed to close writer session"
            );
        }
    }
}

/// Writes rows of type `T` into one table.
///
/// Construction validates the column layout against the table and fails
/// before any network call. Each [`write`](Self::write) opens its own
/// session, so one writer can serve many tasks.
pub struct TableWriter<T> {
    connector: Arc<dyn Connector>,
    table: TableDef,
    row_writer: Arc<dyn RowWriter<T>>,
    template: QueryTemplate,
    config: WriteConfig,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl<T> fmt::Debug for TableWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableWriter")
            .field("table", &self.table.to_string())
            .field("columns", &self.row_writer.column_names())
            .field("query", &self.template.query())
            .field("config", &self.config)
            .finish()
    }
}

impl<T> TableWriter<T> {
    /// Create a writer, validating `config` and the columns against `table`.
    pub fn new(
        connector: Arc<dyn Connector>,
        table: TableDef,
        row_writer: Arc<dyn RowWriter<T>>,
        mode: WriteMode,
        config: WriteConfig,
    ) -> Result<Self> {
        config.validate()?;
        let template = QueryTemplate::new(
            &table,
            row_writer.column_names(),
            &mode,
            &config,
            connector.codec_registry(),
        )?;
        debug!(table = %table, query = template.query(), "Table writer prepared");

        Ok(Self {
            connector,
            table,
            row_writer,
            template,
            config,
            metrics: None,
        })
    }

    /// Report every executed batch to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Get the target table.
    pub fn table(&self) -> &TableDef {
        &self.table
    }

    /// The mutation executed for every row.
    pub fn query(&self) -> &str {
        self.template.query()
    }

    /// Write all `rows`, returning once every batch has completed.
    ///
    /// Under [`FailurePolicy::Abort`] any failed batch turns the result into
    /// [`Error::WriteFailed`], reported only after in-flight batches drain.
    pub async fn write<I>(&self, task: &TaskContext, rows: I) -> Result<WriteSummary>
    where
        I: IntoIterator<Item = T>,
    {
        let started = Instant::now();
        let session = tokio::select! {
            session = self.connector.open_session() => session?,
            _ = task.cancel.cancelled() => return Err(Error::Cancelled),
        };

        let guard = SessionGuard {
            session,
            task,
            table: &self.table,
        };
        let result = self.write_rows(guard.session.clone(), task, rows).await;
        drop(guard);
        let (stats, skipped) = result?;

        if task.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let summary = WriteSummary::from_stats(&stats, skipped, started.elapsed());
        if summary.failed_batches > 0 || summary.failed_rows > 0 {
            match self.config.failure_policy {
                FailurePolicy::Abort => {
                    error!(
                        task = %task.id,
                        table = %self.table,
                        failed_batches = summary.failed_batches,
                        failed_rows = summary.failed_rows,
                        "Write task failed"
                    );
                    return Err(Error::WriteFailed {
                        failed: summary.failed_batches.max(1),
                        total: summary.batches,
                        first_error: stats
                            .first_error
                            .unwrap_or_else(|| "rows could not be bound".to_string()),
                    });
                }
                FailurePolicy::LogAndContinue => warn!(
                    task = %task.id,
                    table = %self.table,
                    failed_batches = summary.failed_batches,
                    failed_rows = summary.failed_rows,
                    "Write task completed with failures"
                ),
            }
        }

        info!(
            task = %task.id,
            table = %self.table,
            rows = summary.rows_written,
            batches = summary.batches,
            bytes = summary.bytes,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Write task completed"
        );
        Ok(summary)
    }

    /// Group and execute rows. The executor is drained on every path.
    async fn write_rows<I>(
        &self,
        session: Arc<dyn Session>,
        task: &TaskContext,
        rows: I,
    ) -> Result<(ExecutionStats, u64)>
    where
        I: IntoIterator<Item = T>,
    {
        let topology = self.connector.topology();
        let registry = self.connector.codec_registry();

        let mut executor = BatchExecutor::new(
            session,
            self.config.parallelism_level,
            self.config.batch_type,
            self.config.consistency_level,
            task.cancel.clone(),
        );
        if let Some(rate) = self.config.throughput_bytes_per_sec() {
            executor = executor.with_rate_limiter(Arc::new(RateLimiter::new(rate, rate)));
        }
        if let Some(metrics) = &self.metrics {
            executor = executor.with_metrics(metrics.clone());
        }

        let mut builder = GroupingBatchBuilder::new(
            self.config.batch_size,
            self.config.batch_grouping_buffer_size,
        );
        let mut values = Vec::with_capacity(self.row_writer.column_names().len());
        let mut skipped = 0u64;

        let outcome: Result<()> = async {
            for item in rows {
                values.clear();
                let bound = self
                    .row_writer
                    .read_values(&item, &mut values)
                    .and_then(|()| self.template.bind(&values, registry));
                let row = match bound {
                    Ok(row) => row,
                    Err(e) if self.config.failure_policy == FailurePolicy::LogAndContinue => {
                        warn!(task = %task.id, error = %e, "Skipping row that cannot be bound");
                        skipped += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                let key = self
                    .config
                    .batch_grouping_key
                    .key_for(&row, topology.as_ref(), &self.table.keyspace);
                for batch in builder.add(key, row) {
                    executor.execute(batch).await?;
                }
            }
            for batch in builder.finish() {
                executor.execute(batch).await?;
            }
            Ok(())
        }
        .await;

        let stats = executor.drain().await;
        outcome.map(|()| (stats, skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BatchGroupingKey, BatchSize, BatchType};
    use crate::connection::Statement;
    use crate::metrics::WriteMetrics;
    use crate::testing::MemoryCluster;
    use crate::types::{ColumnDef, DataType, Row, Value};
    use crate::writer::NamedRowWriter;
    use test_log::test;

    fn events() -> TableDef {
        TableDef::new(
            "ks",
            "events",
            vec![
                ColumnDef::partition_key("id", DataType::Int),
                ColumnDef::clustering("seq", DataType::Int),
                ColumnDef::regular("payload", DataType::Text),
            ],
        )
    }

    fn rows(partitions: i32, per_partition: i32) -> Vec<Row> {
        let names: Arc<[String]> = vec!["id".to_string(), "seq".to_string(), "payload".to_string()].into();
        let mut rows = Vec::new();
        for id in 0..partitions {
            for seq in 0..per_partition {
                rows.push(Row::new(
                    names.clone(),
                    vec![Value::Int(id), Value::Int(seq), Value::from("x")],
                ));
            }
        }
        rows
    }

    fn writer(cluster: &Arc<MemoryCluster>, config: WriteConfig) -> TableWriter<Row> {
        TableWriter::new(
            cluster.clone(),
            events(),
            Arc::new(NamedRowWriter::new(["id", "seq", "payload"])),
            WriteMode::Insert,
            config,
        )
        .unwrap()
    }

    #[test(tokio::test)]
    async fn test_writes_all_rows() {
        let cluster = Arc::new(MemoryCluster::builder().nodes(3).build());
        cluster.create_table(events());
        let config = WriteConfig::new().with_batch_size(BatchSize::Rows(4));

        let summary = writer(&cluster, config)
            .write(&TaskContext::new(0), rows(5, 10))
            .await
            .unwrap();

        assert_eq!(summary.rows_written, 50);
        assert_eq!(summary.failed_batches, 0);
        assert_eq!(cluster.row_count("ks", "events"), 50);
        assert_eq!(cluster.open_sessions(), 0);
    }

    #[test(tokio::test)]
    async fn test_partition_batches_share_key() {
        let cluster = Arc::new(MemoryCluster::builder().build());
        cluster.create_table(events());
        let config = WriteConfig::new()
            .with_batch_size(BatchSize::Rows(100))
            .with_grouping_key(BatchGroupingKey::Partition)
            .with_batch_type(BatchType::Logged);

        writer(&cluster, config)
            .write(&TaskContext::new(0), rows(3, 5))
            .await
            .unwrap();

        let writes = cluster.executed_writes();
        assert_eq!(writes.len(), 3);
        for write in writes {
            let Statement::Batch(batch) = write else {
                panic!("expected a batch");
            };
            assert_eq!(batch.statements.len(), 5);
            assert_eq!(batch.batch_type, BatchType::Logged);
            let first = &batch.statements[0].values[0];
            assert!(batch.statements.iter().all(|s| &s.values[0] == first));
        }
    }

    #[test(tokio::test)]
    async fn test_abort_reports_failures_after_drain() {
        let cluster = Arc::new(MemoryCluster::builder().build());
        cluster.create_table(events());
        cluster.fail_next_writes(1);
        let config = WriteConfig::new().with_batch_size(BatchSize::Rows(10));

        let err = writer(&cluster, config)
            .write(&TaskContext::new(0), rows(1, 30))
            .await
            .unwrap_err();

        match err {
            Error::WriteFailed { failed, total, first_error } => {
                assert_eq!(failed, 1);
                assert_eq!(total, 3);
                assert!(first_error.contains("injected"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(cluster.write_requests(), 3);
        assert_eq!(cluster.row_count("ks", "events"), 20);
        assert_eq!(cluster.open_sessions(), 0);
    }

    #[test(tokio::test)]
    async fn test_log_and_continue() {
        let cluster = Arc::new(MemoryCluster::builder().build());
        cluster.create_table(events());
        cluster.fail_next_writes(1);
        let metrics = Arc::new(WriteMetrics::new());
        let config = WriteConfig::new()
            .with_batch_size(BatchSize::Rows(10))
            .with_failure_policy(FailurePolicy::LogAndContinue);

        let summary = writer(&cluster, config)
            .with_metrics(metrics.clone())
            .write(&TaskContext::new(0), rows(1, 30))
            .await
            .unwrap();

        assert_eq!(summary.batches, 3);
        assert_eq!(summary.failed_batches, 1);
        assert_eq!(summary.failed_rows, 10);
        assert_eq!(summary.rows_written, 20);
        assert_eq!(metrics.batches_failed.get(), 1);
        assert_eq!(metrics.rows_written.get(), 20);
    }

    #[test(tokio::test)]
    async fn test_missing_key_column_fails_before_connecting() {
        let cluster = Arc::new(MemoryCluster::builder().build());
        cluster.create_table(events());

        let result = TableWriter::<Row>::new(
            cluster.clone(),
            events(),
            Arc::new(NamedRowWriter::new(["id", "payload"])),
            WriteMode::Delete { columns: vec![] },
            WriteConfig::new(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(cluster.sessions_opened(), 0);
    }

    #[test(tokio::test)]
    async fn test_delete_rows() {
        let cluster = Arc::new(MemoryCluster::builder().build());
        cluster.create_table(events());
        writer(&cluster, WriteConfig::new())
            .write(&TaskContext::new(0), rows(2, 3))
            .await
            .unwrap();
        assert_eq!(cluster.row_count("ks", "events"), 6);

        let deleter = TableWriter::new(
            cluster.clone(),
            events(),
            Arc::new(NamedRowWriter::new(["id", "seq"])),
            WriteMode::Delete { columns: vec![] },
            WriteConfig::new(),
        )
        .unwrap();
        let summary = deleter.write(&TaskContext::new(1), rows(1, 3)).await.unwrap();

        assert_eq!(summary.rows_written, 3);
        assert_eq!(cluster.row_count("ks", "events"), 3);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_dropped_write_releases_session() {
        let cluster = Arc::new(MemoryCluster::builder().build());
        cluster.create_table(events());
        cluster.set_write_latency(Duration::from_secs(10));
        let writer = writer(&cluster, WriteConfig::new().with_parallelism_level(2));

        let ctx = TaskContext::new(0);
        let write = writer.write(&ctx, rows(4, 2));
        let timed_out = tokio::time::timeout(Duration::from_secs(1), write).await;
        assert!(timed_out.is_err());
        assert_eq!(cluster.sessions_opened(), 1);
        assert_eq!(cluster.open_sessions(), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(cluster.open_sessions(), 0);
        assert_eq!(cluster.row_count("ks", "events"), 0);
    }

    #[test(tokio::test)]
    async fn test_panicking_rows_release_session() {
        let cluster = Arc::new(MemoryCluster::builder().build());
        cluster.create_table(events());
        let writer = Arc::new(writer(&cluster, WriteConfig::new()));

        let task = tokio::spawn({
            let writer = writer.clone();
            async move {
                let exploding = rows(1, 3).into_iter().map(|row| {
                    if row.get("seq") == Some(&Value::Int(2)) {
                        panic!("row source failed");
                    }
                    row
                });
                writer.write(&TaskContext::new(0), exploding).await
            }
        });

        assert!(task.await.unwrap_err().is_panic());
        assert_eq!(cluster.sessions_opened(), 1);
        assert_eq!(cluster.open_sessions(), 0);
    }

    #[test(tokio::test)]
    async fn test_cancelled_task() {
        let cluster = Arc::new(MemoryCluster::builder().build());
        cluster.create_table(events());
        let task = TaskContext::new(0);
        task.cancel.cancel();

        let result = writer(&cluster, WriteConfig::new())
            .write(&task, rows(1, 10))
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(cluster.open_sessions(), 0);
    }
}
