//! Batched, rate-limited writes.
//!
//! ```text
//! rows ──► RowWriter ──► QueryTemplate::bind ──► BoundRow
//!                                                  │ key_for
//!                                                  ▼
//!                                      GroupingBatchBuilder
//!                                   (open batches by BatchKey)
//!                                                  │ sealed batches
//!                                                  ▼
//!                    RateLimiter ──► BatchExecutor (semaphore + JoinSet)
//!                                                  │
//!                                                  ▼
//!                                              Session
//! ```
//!
//! Submitting a batch waits for throughput credit and then for a free
//! execution slot, so a slow cluster slows down the producer of rows instead
//! of buffering without bound.

mod batch;
mod executor;
mod grouping;
mod query;
mod table_writer;

pub use batch::Batch;
pub use executor::{BatchExecutor, ExecutionStats};
pub use grouping::{BatchKey, GroupingBatchBuilder};
pub use query::{BoundRow, NamedRowWriter, QueryTemplate, RowWriter, WriteMode};
pub use table_writer::{TableWriter, WriteSummary};
