//! Per-range size estimates published by the cluster.
//!
//! Estimates are advisory. Any failure to read them degrades to an empty
//! set, which the split planner handles by falling back to a fixed split
//! count.

use crate::connection::{Connector, QueryStatement, Session, Statement};
use crate::config::ConsistencyLevel;
use crate::error::{Error, QueryError, Result};
use crate::token::{Partitioner, Token};
use crate::types::{Row, Value};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Query enumerating the estimates of one table.
pub const SIZE_ESTIMATES_QUERY: &str = "SELECT range_start, range_end, partitions_count, mean_partition_size \
     FROM system.size_estimates WHERE keyspace_name = ? AND table_name = ?";

/// Interval between polls in [`SizeEstimates::wait_for_estimates`].
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Sampled estimate for one token range.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeEstimate {
    pub range_start: Token,
    pub range_end: Token,
    pub partitions_count: u64,
    pub mean_partition_size: u64,
}

impl SizeEstimate {
    /// Fraction of the ring this estimate covers. Equal bounds cover the full
    /// ring (single-token clusters report that way).
    pub fn ring_fraction(&self, partitioner: Partitioner) -> f64 {
        partitioner.ring_fraction(self.range_start, self.range_end, true)
    }

    /// Estimated bytes stored in the range.
    pub fn total_size_bytes(&self) -> f64 {
        self.partitions_count as f64 * self.mean_partition_size as f64
    }
}

/// All estimates known for one table.
#[derive(Debug, Clone)]
pub struct SizeEstimates {
    partitioner: Partitioner,
    estimates: Vec<SizeEstimate>,
}

impl SizeEstimates {
    /// Wrap estimates already read from the cluster.
    pub fn new(partitioner: Partitioner, estimates: Vec<SizeEstimate>) -> Self {
        Self {
            partitioner,
            estimates,
        }
    }

    /// No estimates at all.
    pub fn empty(partitioner: Partitioner) -> Self {
        Self::new(partitioner, Vec::new())
    }

    /// Read the estimates of `keyspace.table`.
    ///
    /// Never fails: an unsupported server, a failed query or unusable rows
    /// all degrade to fewer (or no) estimates with a warning.
    pub async fn fetch(connector: &dyn Connector, keyspace: &str, table: &str) -> Self {
        let partitioner = connector.topology().partitioner();

        let session = match connector.open_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!(keyspace, table, error = %e, "Could not open session to read size estimates");
                return Self::empty(partitioner);
            }
        };

        let result = read_rows(session.as_ref(), keyspace, table).await;
        if let Err(e) = session.close() {
            warn!(error = %e, "Failed to close size estimates session");
        }

        let rows = match result {
            Ok(rows) => rows,
            Err(e) if e.is_unsupported() => {
                warn!(
                    keyspace,
                    table,
                    error = %e,
                    "Size estimates are not supported by this cluster, continuing without them"
                );
                return Self::empty(partitioner);
            }
            Err(e) => {
                warn!(keyspace, table, error = %e, "Failed to read size estimates, continuing without them");
                return Self::empty(partitioner);
            }
        };

        let mut estimates = Vec::with_capacity(rows.len());
        for row in &rows {
            match parse_estimate(partitioner, row) {
                Ok(Some(estimate)) => estimates.push(estimate),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Skipping unparsable size estimate row"),
            }
        }

        debug!(keyspace, table, count = estimates.len(), "Fetched size estimates");
        Self::new(partitioner, estimates)
    }

    /// Poll every second until estimates for the table exist or `timeout`
    /// elapses. Returns whether estimates became available.
    pub async fn wait_for_estimates(
        connector: &dyn Connector,
        keyspace: &str,
        table: &str,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !Self::fetch(connector, keyspace, table).await.is_empty() {
                return true;
            }
            if Instant::now() + POLL_INTERVAL > deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Get the partitioner the estimate ranges belong to.
    pub fn partitioner(&self) -> Partitioner {
        self.partitioner
    }

    /// Get the per-range estimates.
    pub fn estimates(&self) -> &[SizeEstimate] {
        &self.estimates
    }

    /// Whether no estimates are available.
    pub fn is_empty(&self) -> bool {
        self.estimates.is_empty()
    }

    /// Sum of the ring fractions covered by the estimates.
    pub fn ring_coverage(&self) -> f64 {
        self.estimates
            .iter()
            .map(|e| e.ring_fraction(self.partitioner))
            .sum()
    }

    /// Sum of estimated bytes, not normalized for coverage.
    pub fn total_data_size_bytes(&self) -> f64 {
        self.estimates.iter().map(SizeEstimate::total_size_bytes).sum()
    }

    /// Estimated bytes in the whole table, extrapolated from the covered part
    /// of the ring. Zero when nothing is covered.
    pub fn data_size_bytes(&self) -> f64 {
        let coverage = self.ring_coverage();
        if coverage > 0.0 {
            self.total_data_size_bytes() / coverage
        } else {
            0.0
        }
    }

    /// Estimated partitions in the whole table, extrapolated like
    /// [`data_size_bytes`](Self::data_size_bytes) and rounded toward zero.
    pub fn partition_count(&self) -> u64 {
        let coverage = self.ring_coverage();
        if coverage <= 0.0 {
            return 0;
        }
        let total: f64 = self
            .estimates
            .iter()
            .map(|e| e.partitions_count as f64)
            .sum();
        (total / coverage) as u64
    }
}

async fn read_rows(session: &dyn Session, keyspace: &str, table: &str) -> Result<Vec<Row>> {
    let mut statement = QueryStatement::new(SIZE_ESTIMATES_QUERY)
        .with_values(vec![Value::from(keyspace), Value::from(table)])
        .with_consistency(ConsistencyLevel::LocalOne)
        .with_idempotent(true);

    let mut rows = Vec::new();
    loop {
        let page = session.execute(&Statement::Query(statement.clone())).await?;
        rows.extend(page.named_rows());
        match page.paging_state {
            Some(state) => statement = statement.with_paging_state(Some(state)),
            None => return Ok(rows),
        }
    }
}

/// Parse one estimate row. Negative counts (the table may hold garbage for
/// ranges that were never sampled) are skipped.
fn parse_estimate(partitioner: Partitioner, row: &Row) -> Result<Option<SizeEstimate>> {
    fn text<'a>(row: &'a Row, name: &str) -> Result<&'a str> {
        row.get(name).and_then(Value::as_str).ok_or_else(|| missing(name))
    }
    fn long(row: &Row, name: &str) -> Result<i64> {
        row.get(name).and_then(Value::as_i64).ok_or_else(|| missing(name))
    }

    let range_start = partitioner.token_from_string(text(row, "range_start")?)?;
    let range_end = partitioner.token_from_string(text(row, "range_end")?)?;
    let partitions_count = long(row, "partitions_count")?;
    let mean_partition_size = long(row, "mean_partition_size")?;

    if partitions_count < 0 || mean_partition_size < 0 {
        warn!(
            %range_start,
            %range_end,
            partitions_count,
            mean_partition_size,
            "Ignoring negative size estimate"
        );
        return Ok(None);
    }

    Ok(Some(SizeEstimate {
        range_start,
        range_end,
        partitions_count: partitions_count as u64,
        mean_partition_size: mean_partition_size as u64,
    }))
}

fn missing(column: &str) -> Error {
    QueryError::Codec(format!("size estimate column {} is missing or mistyped", column)).into()
}

/// Estimates in a shape shared with the planner tests.
#[cfg(test)]
pub(crate) fn full_ring_estimate(
    partitioner: Partitioner,
    partitions_count: u64,
    mean_partition_size: u64,
) -> SizeEstimates {
    let min = partitioner.min_token();
    SizeEstimates::new(
        partitioner,
        vec![SizeEstimate {
            range_start: min,
            range_end: min,
            partitions_count,
            mean_partition_size,
        }],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryCluster;
    use std::sync::Arc;
    use test_log::test;

    #[test]
    fn test_full_ring_estimate() {
        let estimates = full_ring_estimate(Partitioner::Murmur3, 1000, 100);
        assert_eq!(estimates.data_size_bytes(), 100_000.0);
        assert_eq!(estimates.partition_count(), 1000);
    }

    #[test]
    fn test_empty_estimates_are_zero() {
        let estimates = SizeEstimates::empty(Partitioner::Murmur3);
        assert!(estimates.is_empty());
        assert_eq!(estimates.data_size_bytes(), 0.0);
        assert_eq!(estimates.total_data_size_bytes(), 0.0);
        assert_eq!(estimates.partition_count(), 0);
    }

    #[test]
    fn test_partial_coverage_is_extrapolated() {
        let p = Partitioner::Murmur3;
        // A quarter of the ring holding 10 partitions of 40 bytes.
        let estimates = SizeEstimates::new(
            p,
            vec![SizeEstimate {
                range_start: Token::Long(0),
                range_end: Token::Long(i64::MAX / 2 + 1),
                partitions_count: 10,
                mean_partition_size: 40,
            }],
        );
        assert!((estimates.ring_coverage() - 0.25).abs() < 1e-9);
        assert_eq!(estimates.total_data_size_bytes(), 400.0);
        assert!((estimates.data_size_bytes() - 1600.0).abs() < 1e-6);
        assert_eq!(estimates.partition_count(), 40);
    }

    #[test(tokio::test)]
    async fn test_fetch_from_cluster() {
        let cluster = MemoryCluster::builder().nodes(3).build();
        cluster.set_size_estimates("ks", "t", 300, 50);

        let estimates = SizeEstimates::fetch(&cluster, "ks", "t").await;
        assert!(!estimates.is_empty());
        assert!((estimates.ring_coverage() - 1.0).abs() < 1e-9);
        assert!((estimates.data_size_bytes() - 15_000.0).abs() < 1.0);
        assert_eq!(cluster.open_sessions(), 0);
    }

    #[test(tokio::test)]
    async fn test_fetch_unsupported_degrades_to_empty() {
        let cluster = MemoryCluster::builder().size_estimates_supported(false).build();
        cluster.set_size_estimates("ks", "t", 300, 50);

        let estimates = SizeEstimates::fetch(&cluster, "ks", "t").await;
        assert!(estimates.is_empty());
        assert_eq!(estimates.data_size_bytes(), 0.0);
    }

    #[test(tokio::test)]
    async fn test_fetch_skips_negative_rows() {
        let cluster = MemoryCluster::builder().nodes(2).build();
        cluster.insert_size_estimate_row("ks", "t", "-9223372036854775808", "0", -5, 10);
        cluster.insert_size_estimate_row("ks", "t", "0", "-9223372036854775808", 10, 10);

        let estimates = SizeEstimates::fetch(&cluster, "ks", "t").await;
        assert_eq!(estimates.estimates().len(), 1);
        assert!((estimates.data_size_bytes() - 200.0).abs() < 1e-6);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_wait_for_estimates_times_out() {
        let cluster = MemoryCluster::builder().build();
        let start = Instant::now();

        let found =
            SizeEstimates::wait_for_estimates(&cluster, "ks", "t", Duration::from_secs(3)).await;
        assert!(!found);
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() <= Duration::from_secs(3));
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_wait_for_estimates_sees_late_data() {
        let cluster = Arc::new(MemoryCluster::builder().build());
        let writer = cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            writer.set_size_estimates("ks", "t", 10, 10);
        });

        let found = SizeEstimates::wait_for_estimates(
            cluster.as_ref(),
            "ks",
            "t",
            Duration::from_secs(10),
        )
        .await;
        assert!(found);
    }
}
