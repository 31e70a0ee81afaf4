//! Grouping rows into batches.
//!
//! Rows are routed to an open batch by their [`BatchKey`]. At most
//! `buffer_size` batches stay open; a row with a new key arriving when the
//! buffer is full first evicts the largest open batch.

use super::batch::Batch;
use super::query::BoundRow;
use crate::config::{BatchGroupingKey, BatchSize};
use crate::connection::Topology;
use crate::types::Endpoint;
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};

/// Which open batch a row belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BatchKey {
    /// One batch for every row.
    None,
    /// Sorted replicas owning the row's partition.
    Replicas(BTreeSet<Endpoint>),
    /// Serialized partition key.
    Partition(Bytes),
}

impl BatchGroupingKey {
    /// The batch key of a bound row.
    pub fn key_for(&self, row: &BoundRow, topology: &dyn Topology, keyspace: &str) -> BatchKey {
        match self {
            BatchGroupingKey::None => BatchKey::None,
            BatchGroupingKey::ReplicaSet => {
                let token = topology.token_for(&row.routing_key);
                BatchKey::Replicas(topology.replicas(keyspace, token))
            }
            BatchGroupingKey::Partition => BatchKey::Partition(row.routing_key.clone()),
        }
    }
}

/// Accumulates rows into open batches and hands back sealed ones.
#[derive(Debug)]
pub struct GroupingBatchBuilder {
    size: BatchSize,
    buffer_size: usize,
    open: HashMap<BatchKey, Batch>,
}

impl GroupingBatchBuilder {
    /// Create a builder keeping at most `buffer_size` open batches.
    pub fn new(size: BatchSize, buffer_size: usize) -> Self {
        Self {
            size,
            buffer_size: buffer_size.max(1),
            open: HashMap::new(),
        }
    }

    /// Number of open batches.
    pub fn open_batches(&self) -> usize {
        self.open.len()
    }

    /// Add a row. Returns the batches sealed by this row, ready to execute.
    pub fn add(&mut self, key: BatchKey, row: BoundRow) -> Vec<Batch> {
        let mut sealed = Vec::new();

        if let Some(batch) = self.open.get_mut(&key) {
            if self.size.would_overflow(batch, row.size) {
                sealed.push(std::mem::replace(batch, Batch::new(key.clone())));
            }
        } else {
            if self.open.len() >= self.buffer_size {
                if let Some(evicted) = self.evict_largest() {
                    sealed.push(evicted);
                }
            }
            self.open.insert(key.clone(), Batch::new(key.clone()));
        }

        if let Some(batch) = self.open.get_mut(&key) {
            batch.push(row);
            if self.size.is_full(batch) {
                if let Some(full) = self.open.remove(&key) {
                    sealed.push(full);
                }
            }
        }
        sealed
    }

    /// Seal every open batch.
    pub fn finish(&mut self) -> Vec<Batch> {
        self.open.drain().map(|(_, batch)| batch).collect()
    }

    fn evict_largest(&mut self) -> Option<Batch> {
        let key = self
            .open
            .values()
            .max_by_key(|b| match self.size {
                BatchSize::Rows(_) => b.len(),
                BatchSize::Bytes(_) => b.bytes,
            })?
            .key
            .clone();
        self.open.remove(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::QueryStatement;

    fn row(key: &'static [u8], size: usize) -> (BatchKey, BoundRow) {
        let routing_key = Bytes::from_static(key);
        (
            BatchKey::Partition(routing_key.clone()),
            BoundRow {
                statement: QueryStatement::new("INSERT"),
                size,
                routing_key,
            },
        )
    }

    #[test]
    fn test_partition_grouping() {
        let mut builder = GroupingBatchBuilder::new(BatchSize::Rows(10), 10);

        let (k, r) = row(b"a", 10);
        assert!(builder.add(k, r).is_empty());
        let (k, r) = row(b"a", 10);
        assert!(builder.add(k, r).is_empty());
        assert_eq!(builder.open_batches(), 1);

        let (k, r) = row(b"b", 10);
        assert!(builder.add(k, r).is_empty());
        assert_eq!(builder.open_batches(), 2);

        let mut batches = builder.finish();
        batches.sort_by_key(|b| std::cmp::Reverse(b.len()));
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[0].key, BatchKey::Partition(Bytes::from_static(b"a")));
        assert_eq!(batches[1].len(), 1);
    }

    #[test]
    fn test_overflowing_row_starts_new_batch() {
        let mut builder = GroupingBatchBuilder::new(BatchSize::Bytes(100), 10);

        let (k, r) = row(b"a", 70);
        assert!(builder.add(k, r).is_empty());
        let (k, r) = row(b"a", 40);
        let sealed = builder.add(k, r);

        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].bytes, 70);
        assert_eq!(sealed[0].len(), 1);

        let rest = builder.finish();
        assert_eq!(rest[0].bytes, 40);
    }

    #[test]
    fn test_row_limit_seals_at_threshold() {
        let mut builder = GroupingBatchBuilder::new(BatchSize::Rows(3), 10);
        let mut sealed = Vec::new();
        for _ in 0..7 {
            let (k, r) = row(b"a", 1);
            sealed.extend(builder.add(k, r));
        }
        sealed.extend(builder.finish());

        let sizes: Vec<usize> = sealed.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn test_full_buffer_evicts_largest() {
        let mut builder = GroupingBatchBuilder::new(BatchSize::Bytes(1000), 2);

        let (k, r) = row(b"a", 10);
        builder.add(k, r);
        let (k, r) = row(b"b", 50);
        builder.add(k, r);
        let (k, r) = row(b"c", 5);
        let sealed = builder.add(k, r);

        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].key, BatchKey::Partition(Bytes::from_static(b"b")));
        assert_eq!(builder.open_batches(), 2);
    }

    #[test]
    fn test_oversized_row_goes_alone() {
        let mut builder = GroupingBatchBuilder::new(BatchSize::Bytes(100), 10);
        let (k, r) = row(b"a", 500);
        let sealed = builder.add(k, r);
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].bytes, 500);
        assert_eq!(builder.open_batches(), 0);
    }
}
