//! Bounded-concurrency batch execution.
//!
//! Sealed batches run as spawned tasks tracked in a [`JoinSet`]. A semaphore
//! caps how many are in flight; when every permit is taken, submitting the
//! next batch waits, which pushes back on whoever produces rows.

use super::batch::Batch;
use crate::config::{BatchType, ConsistencyLevel};
use crate::connection::Session;
use crate::error::{Error, Result};
use crate::metrics::{BatchEvent, MetricsSink};
use crate::rate_limiter::RateLimiter;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

/// Result of one batch.
#[derive(Debug)]
struct Outcome {
    rows: usize,
    bytes: usize,
    result: Result<()>,
}

/// Totals over every batch an executor ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub batches: u64,
    pub rows: u64,
    pub bytes: u64,
    pub failed_batches: u64,
    pub failed_rows: u64,
    pub first_error: Option<String>,
}

impl ExecutionStats {
    fn record(&mut self, outcome: Outcome) {
        self.batches += 1;
        match outcome.result {
            Ok(()) => {
                self.rows += outcome.rows as u64;
                self.bytes += outcome.bytes as u64;
            }
            Err(e) => {
                self.failed_batches += 1;
                self.failed_rows += outcome.rows as u64;
                if self.first_error.is_none() {
                    self.first_error = Some(e.to_string());
                }
            }
        }
    }
}

/// Runs batches on one session with at most `parallelism` in flight.
#[derive(Debug)]
pub struct BatchExecutor {
    session: Arc<dyn Session>,
    permits: Arc<Semaphore>,
    in_flight: JoinSet<Outcome>,
    limiter: Option<Arc<RateLimiter>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    batch_type: BatchType,
    consistency: ConsistencyLevel,
    cancel: CancellationToken,
    stats: ExecutionStats,
}

impl BatchExecutor {
    /// Create an executor running at most `parallelism` batches at once.
    pub fn new(
        session: Arc<dyn Session>,
        parallelism: usize,
        batch_type: BatchType,
        consistency: ConsistencyLevel,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            permits: Arc::new(Semaphore::new(parallelism.max(1))),
            in_flight: JoinSet::new(),
            limiter: None,
            metrics: None,
            batch_type,
            consistency,
            cancel,
            stats: ExecutionStats::default(),
        }
    }

    /// Pay for every batch's bytes on `limiter` before submitting it.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Report every completed batch to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Batches submitted and not yet collected.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Submit a batch, waiting for throughput credit and a free slot.
    ///
    /// Returns once the batch is running. Fails only when the task is
    /// cancelled while waiting; batch failures are collected by
    /// [`drain`](Self::drain).
    pub async fn execute(&mut self, batch: Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        if let Some(limiter) = &self.limiter {
            limiter.maybe_sleep(batch.bytes as u64, &self.cancel).await?;
        }

        let permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => {
                permit.map_err(|_| Error::Internal("batch semaphore closed".to_string()))?
            }
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
        };

        while let Some(done) = self.in_flight.try_join_next() {
            self.collect(done);
        }

        let rows = batch.len();
        let bytes = batch.bytes;
        let statement = batch.into_statement(self.batch_type, self.consistency);
        let session = self.session.clone();
        let metrics = self.metrics.clone();
        let cancel = self.cancel.clone();

        trace!(rows, bytes, "Submitting batch");
        if let Some(metrics) = &metrics {
            metrics.batch_started();
        }
        let submitted_at = Instant::now();
        self.in_flight.spawn(async move {
            let result = tokio::select! {
                result = session.execute(&statement) => result.map(|_| ()),
                _ = cancel.cancelled() => Err(Error::Cancelled),
            };
            if let Some(metrics) = &metrics {
                metrics.batch_completed(&BatchEvent {
                    success: result.is_ok(),
                    rows,
                    bytes,
                    submitted_at,
                    executed_at: Instant::now(),
                });
            }
            drop(permit);
            Outcome {
                rows,
                bytes,
                result,
            }
        });
        Ok(())
    }

    /// Wait for every submitted batch and return the totals.
    pub async fn drain(&mut self) -> ExecutionStats {
        while let Some(done) = self.in_flight.join_next().await {
            self.collect(done);
        }
        std::mem::take(&mut self.stats)
    }

    fn collect(&mut self, done: std::result::Result<Outcome, tokio::task::JoinError>) {
        let outcome = match done {
            Ok(outcome) => outcome,
            Err(e) => Outcome {
                rows: 0,
                bytes: 0,
                result: Err(Error::Internal(format!("batch task failed: {}", e))),
            },
        };
        if let Err(e) = &outcome.result {
            if !e.is_cancelled() {
                error!(rows = outcome.rows, error = %e, "Batch failed");
            }
        }
        self.stats.record(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{QueryStatement, ResultPage, Statement};
    use crate::metrics::WriteMetrics;
    use crate::writer::grouping::BatchKey;
    use crate::writer::query::BoundRow;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Session that takes 10ms per statement and fails those marked "FAIL".
    #[derive(Debug, Default)]
    struct SlowSession {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Session for SlowSession {
        async fn execute(&self, statement: &Statement) -> Result<ResultPage> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            match statement {
                Statement::Query(q) if q.query == "FAIL" => Err(crate::error::QueryError::Execution(
                    "injected".to_string(),
                )
                .into()),
                _ => Ok(ResultPage::empty()),
            }
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn batch(query: &str, bytes: usize) -> Batch {
        let mut batch = Batch::new(BatchKey::None);
        batch.push(BoundRow {
            statement: QueryStatement::new(query),
            size: bytes,
            routing_key: Bytes::from_static(b"k"),
        });
        batch
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallelism_is_bounded() {
        let session = Arc::new(SlowSession::default());
        let metrics = Arc::new(WriteMetrics::new());
        let mut executor = BatchExecutor::new(
            session.clone(),
            3,
            BatchType::Unlogged,
            ConsistencyLevel::One,
            CancellationToken::new(),
        )
        .with_metrics(metrics.clone());

        for _ in 0..20 {
            executor.execute(batch("INSERT", 10)).await.unwrap();
        }
        let stats = executor.drain().await;

        assert_eq!(stats.batches, 20);
        assert_eq!(stats.rows, 20);
        assert_eq!(stats.failed_batches, 0);
        assert_eq!(session.peak.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.snapshot().max_in_flight, 3);
        assert_eq!(metrics.rows_written.get(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_stop_other_batches() {
        let session = Arc::new(SlowSession::default());
        let mut executor = BatchExecutor::new(
            session,
            2,
            BatchType::Unlogged,
            ConsistencyLevel::One,
            CancellationToken::new(),
        );

        executor.execute(batch("INSERT", 1)).await.unwrap();
        executor.execute(batch("FAIL", 1)).await.unwrap();
        executor.execute(batch("INSERT", 1)).await.unwrap();
        let stats = executor.drain().await;

        assert_eq!(stats.batches, 3);
        assert_eq!(stats.rows, 2);
        assert_eq!(stats.failed_batches, 1);
        assert!(stats.first_error.unwrap().contains("injected"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_submission() {
        let session = Arc::new(SlowSession::default());
        let limiter = Arc::new(RateLimiter::new(1000, 1000));
        let mut executor = BatchExecutor::new(
            session,
            8,
            BatchType::Unlogged,
            ConsistencyLevel::One,
            CancellationToken::new(),
        )
        .with_rate_limiter(limiter);

        let start = Instant::now();
        for _ in 0..4 {
            executor.execute(batch("INSERT", 1000)).await.unwrap();
        }
        executor.drain().await;
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[derive(Debug, Default)]
    struct RecordingSink {
        events: parking_lot::Mutex<Vec<BatchEvent>>,
    }

    impl MetricsSink for RecordingSink {
        fn batch_completed(&self, event: &BatchEvent) {
            self.events.lock().push(*event);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_carries_submission_time() {
        let sink = Arc::new(RecordingSink::default());
        let mut executor = BatchExecutor::new(
            Arc::new(SlowSession::default()),
            1,
            BatchType::Unlogged,
            ConsistencyLevel::One,
            CancellationToken::new(),
        )
        .with_metrics(sink.clone());

        let submitted = Instant::now();
        executor.execute(batch("INSERT", 1)).await.unwrap();
        // The clock moves before the spawned batch gets to run.
        tokio::time::advance(Duration::from_millis(100)).await;
        executor.drain().await;

        let events = sink.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].submitted_at, submitted);
        assert!(events[0].executed_at - events[0].submitted_at >= Duration::from_millis(110));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting_for_slot() {
        let session = Arc::new(SlowSession::default());
        let cancel = CancellationToken::new();
        let mut executor = BatchExecutor::new(
            session,
            1,
            BatchType::Unlogged,
            ConsistencyLevel::One,
            cancel.clone(),
        );

        executor.execute(batch("INSERT", 1)).await.unwrap();
        cancel.cancel();
        let result = executor.execute(batch("INSERT", 1)).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        executor.drain().await;
    }
}
