//! Read and write metrics.
//!
//! The writer reports one [`BatchEvent`] per executed batch to a
//! [`MetricsSink`]. [`WriteMetrics`] is the built-in sink; callers may plug in
//! their own, and an absent sink never changes what gets written.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       WriteMetrics                        │
//! │  ┌──────────────┐  ┌────────────────┐  ┌──────────────┐  │
//! │  │  Counters    │  │    Gauges      │  │  Histograms  │  │
//! │  │ - rows       │  │ - in flight    │  │ - latency    │  │
//! │  │ - bytes      │  │   (with peak)  │  │ - batch size │  │
//! │  │ - batches    │  │                │  │              │  │
//! │  │ - failures   │  │                │  │              │  │
//! │  └──────────────┘  └────────────────┘  └──────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod counters;
mod gauges;
mod histograms;

pub use counters::Counter;
pub use gauges::Gauge;
pub use histograms::{Histogram, HistogramSnapshot, LATENCY_BUCKETS, SIZE_BUCKETS};

use std::fmt::{Display, Write as _};
use tokio::time::Instant;

/// Name and help text of an exported metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub name: &'static str,
    pub help: &'static str,
}

impl Descriptor {
    fn header(&self, out: &mut String, kind: &str) {
        let _ = writeln!(out, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(out, "# TYPE {} {}", self.name, kind);
    }

    fn sample(&self, out: &mut String, suffix: &str, value: impl Display) {
        let _ = writeln!(out, "{}{} {}", self.name, suffix, value);
    }
}

/// Outcome of one executed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEvent {
    pub success: bool,
    pub rows: usize,
    pub bytes: usize,
    /// When the batch was handed to the session.
    pub submitted_at: Instant,
    /// When the session completed it.
    pub executed_at: Instant,
}

/// Receiver of per-batch events.
pub trait MetricsSink: Send + Sync + std::fmt::Debug {
    /// A batch is about to be submitted.
    fn batch_started(&self) {}

    /// A batch completed, successfully or not.
    fn batch_completed(&self, event: &BatchEvent);
}

/// Counters for one or more write tasks.
#[derive(Debug)]
pub struct WriteMetrics {
    pub rows_written: Counter,
    pub bytes_written: Counter,
    pub batches_succeeded: Counter,
    pub batches_failed: Counter,
    pub rows_failed: Counter,
    pub batches_in_flight: Gauge,
    pub batch_latency: Histogram,
    pub batch_bytes: Histogram,
}

impl WriteMetrics {
    /// Create write metrics with every value at zero.
    pub fn new() -> Self {
        Self {
            rows_written: Counter::new("tokenbridge_rows_written_total", "Rows written"),
            bytes_written: Counter::new("tokenbridge_bytes_written_total", "Bytes written"),
            batches_succeeded: Counter::new(
                "tokenbridge_batches_succeeded_total",
                "Batches executed successfully",
            ),
            batches_failed: Counter::new("tokenbridge_batches_failed_total", "Batches that failed"),
            rows_failed: Counter::new("tokenbridge_rows_failed_total", "Rows in failed batches"),
            batches_in_flight: Gauge::new("tokenbridge_batches_in_flight", "Batches executing"),
            batch_latency: Histogram::new(
                "tokenbridge_batch_latency_seconds",
                "Time from submission to completion of a batch",
                LATENCY_BUCKETS,
            ),
            batch_bytes: Histogram::new(
                "tokenbridge_batch_bytes",
                "Serialized size of executed batches",
                SIZE_BUCKETS,
            ),
        }
    }

    /// Copy the current values.
    pub fn snapshot(&self) -> WriteMetricsSnapshot {
        WriteMetricsSnapshot {
            rows_written: self.rows_written.get(),
            bytes_written: self.bytes_written.get(),
            batches_succeeded: self.batches_succeeded.get(),
            batches_failed: self.batches_failed.get(),
            rows_failed: self.rows_failed.get(),
            max_in_flight: self.batches_in_flight.peak(),
            latency: self.batch_latency.snapshot(),
        }
    }

    /// Render in Prometheus exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        for counter in [
            &self.rows_written,
            &self.bytes_written,
            &self.batches_succeeded,
            &self.batches_failed,
            &self.rows_failed,
        ] {
            counter.render(&mut out);
        }
        self.batches_in_flight.render(&mut out);
        self.batch_latency.render(&mut out);
        self.batch_bytes.render(&mut out);
        out
    }
}

impl Default for WriteMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for WriteMetrics {
    fn batch_started(&self) {
        self.batches_in_flight.inc();
    }

    fn batch_completed(&self, event: &BatchEvent) {
        self.batches_in_flight.dec();
        self.batch_latency
            .observe_duration(event.executed_at.saturating_duration_since(event.submitted_at));
        if event.success {
            self.batches_succeeded.inc();
            self.rows_written.add(event.rows);
            self.bytes_written.add(event.bytes);
            self.batch_bytes.observe(event.bytes as f64);
        } else {
            self.batches_failed.inc();
            self.rows_failed.add(event.rows);
        }
    }
}

/// A copy of [`WriteMetrics`] at one point in time.
#[derive(Debug, Clone)]
pub struct WriteMetricsSnapshot {
    pub rows_written: u64,
    pub bytes_written: u64,
    pub batches_succeeded: u64,
    pub batches_failed: u64,
    pub rows_failed: u64,
    pub max_in_flight: i64,
    pub latency: HistogramSnapshot,
}

impl WriteMetricsSnapshot {
    /// Fraction of batches that succeeded; 1.0 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        let total = self.batches_succeeded + self.batches_failed;
        if total == 0 {
            1.0
        } else {
            self.batches_succeeded as f64 / total as f64
        }
    }
}

/// Counters for scans.
#[derive(Debug)]
pub struct ReadMetrics {
    pub rows_read: Counter,
    pub bytes_read: Counter,
    pub pages_fetched: Counter,
}

impl ReadMetrics {
    /// Create read metrics with every value at zero.
    pub fn new() -> Self {
        Self {
            rows_read: Counter::new("tokenbridge_rows_read_total", "Rows read"),
            bytes_read: Counter::new("tokenbridge_bytes_read_total", "Estimated bytes read"),
            pages_fetched: Counter::new("tokenbridge_pages_fetched_total", "Result pages fetched"),
        }
    }

    /// Count one row of `bytes` estimated bytes.
    pub fn record_row(&self, bytes: usize) {
        self.rows_read.inc();
        self.bytes_read.add(bytes);
    }

    /// Render in Prometheus exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        for counter in [&self.rows_read, &self.bytes_read, &self.pages_fetched] {
            counter.render(&mut out);
        }
        out
    }
}

impl Default for ReadMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn event(success: bool, rows: usize, bytes: usize) -> BatchEvent {
        let submitted_at = Instant::now();
        BatchEvent {
            success,
            rows,
            bytes,
            submitted_at,
            executed_at: submitted_at + Duration::from_millis(4),
        }
    }

    #[test]
    fn test_write_metrics() {
        let metrics = WriteMetrics::new();
        metrics.batch_started();
        metrics.batch_started();
        metrics.batch_completed(&event(true, 10, 500));
        metrics.batch_completed(&event(false, 3, 120));

        let snap = metrics.snapshot();
        assert_eq!(snap.rows_written, 10);
        assert_eq!(snap.bytes_written, 500);
        assert_eq!(snap.batches_succeeded, 1);
        assert_eq!(snap.batches_failed, 1);
        assert_eq!(snap.rows_failed, 3);
        assert_eq!(snap.max_in_flight, 2);
        assert_eq!(snap.latency.count, 2);
        assert_eq!(snap.success_rate(), 0.5);
        assert_eq!(metrics.batches_in_flight.get(), 0);
    }

    #[test]
    fn test_prometheus_output() {
        let metrics = WriteMetrics::new();
        metrics.batch_completed(&event(true, 1, 64));

        let output = metrics.to_prometheus();
        assert!(output.contains("# TYPE tokenbridge_rows_written_total counter"));
        assert!(output.contains("tokenbridge_rows_written_total 1"));
        assert!(output.contains("tokenbridge_batch_bytes_bucket{le=\"256\"} 1"));
        assert!(output.contains("tokenbridge_batch_latency_seconds_count 1"));
    }

    #[test]
    fn test_read_metrics() {
        let metrics = ReadMetrics::new();
        metrics.record_row(12);
        metrics.record_row(8);
        assert_eq!(metrics.rows_read.get(), 2);
        assert_eq!(metrics.bytes_read.get(), 20);
        assert!(metrics
            .to_prometheus()
            .contains("tokenbridge_bytes_read_total 20\n"));
    }
}
