//! Write batches and their size limits.

use super::grouping::BatchKey;
use super::query::BoundRow;
use crate::config::{BatchSize, BatchType, ConsistencyLevel};
use crate::connection::{BatchStatement, Statement};

/// Statements sharing a grouping key, executed as one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub key: BatchKey,
    pub rows: Vec<BoundRow>,
    /// Sum of the rows' serialized sizes.
    pub bytes: usize,
}

impl Batch {
    /// Create an empty batch for `key`.
    pub fn new(key: BatchKey) -> Self {
        Self {
            key,
            rows: Vec::new(),
            bytes: 0,
        }
    }

    /// Append a row and add its size.
    pub fn push(&mut self, row: BoundRow) {
        self.bytes += row.size;
        self.rows.push(row);
    }

    /// Get the number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The request to send. A single row goes out as a plain statement.
    pub fn into_statement(self, batch_type: BatchType, consistency: ConsistencyLevel) -> Statement {
        let idempotent = self.rows.iter().all(|r| r.statement.idempotent);
        let mut statements: Vec<_> = self.rows.into_iter().map(|r| r.statement).collect();
        if statements.len() == 1 {
            if let Some(statement) = statements.pop() {
                return Statement::Query(statement);
            }
        }
        Statement::Batch(BatchStatement {
            batch_type,
            statements,
            consistency,
            idempotent,
        })
    }
}

impl BatchSize {
    /// Whether `batch` must be sealed before anything else is added.
    pub fn is_full(&self, batch: &Batch) -> bool {
        match *self {
            BatchSize::Rows(limit) => batch.len() >= limit,
            BatchSize::Bytes(limit) => batch.bytes >= limit,
        }
    }

    /// Whether appending a row of `size` bytes would break the byte budget.
    ///
    /// An empty batch always accepts a row, however large.
    pub fn would_overflow(&self, batch: &Batch, size: usize) -> bool {
        match *self {
            BatchSize::Rows(limit) => batch.len() >= limit,
            BatchSize::Bytes(limit) => !batch.is_empty() && batch.bytes + size > limit,
        }
    }
}
