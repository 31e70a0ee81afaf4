//! Connector core between a partitioned wide-column store and a parallel
//! compute engine.
//!
//! The crate covers the two halves of moving table data in and out of a
//! cluster in parallel:
//!
//! - **Reading**: the token ring is cut into [`ScanPartition`]s sized from
//!   the cluster's own size estimates, and each partition is read by one
//!   [`Scanner`] through a prefetching, optionally rate-limited iterator.
//! - **Writing**: a [`TableWriter`] groups rows into batches by partition or
//!   replica set and executes them with bounded concurrency, a byte-rate cap
//!   and backpressure.
//!
//! The network is abstracted behind the [`Connector`], [`Session`] and
//! [`Topology`] traits; [`testing::MemoryCluster`] implements them in memory.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokenbridge::testing::MemoryCluster;
//! use tokenbridge::{
//!     ColumnDef, DataType, NamedRowWriter, PartitionGenerator, ReadConfig, Scanner, TableDef,
//!     TableWriter, TaskContext, WriteConfig, WriteMode,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cluster = Arc::new(MemoryCluster::builder().nodes(3).vnodes(8).build());
//!     let table = TableDef::new(
//!         "ks",
//!         "users",
//!         vec![
//!             ColumnDef::partition_key("id", DataType::Int),
//!             ColumnDef::regular("name", DataType::Text),
//!         ],
//!     );
//!     cluster.create_table(table.clone());
//!
//!     // Write
//!     let writer = TableWriter::new(
//!         cluster.clone(),
//!         table.clone(),
//!         Arc::new(NamedRowWriter::new(["id", "name"])),
//!         WriteMode::Insert,
//!         WriteConfig::new().with_parallelism_level(4),
//!     )?;
//!     let summary = writer.write(&TaskContext::new(0), Vec::new()).await?;
//!     println!("wrote {} rows", summary.rows_written);
//!
//!     // Read
//!     let config = ReadConfig::new();
//!     let generator = PartitionGenerator::new(cluster.clone(), table.clone(), config.clone())?;
//!     for partition in generator.partitions().await? {
//!         let scanner =
//!             Scanner::open(cluster.clone(), config.clone(), TaskContext::new(partition.index))
//!                 .await?;
//!         for statement in partition.statements(cluster.partitioner(), &table, &[], &config)? {
//!             let rows = scanner.scan(statement).await?.rows.collect().await?;
//!             println!("partition {}: {} rows", partition.index, rows.len());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod planning;
pub mod rate_limiter;
pub mod scanner;
pub mod testing;
pub mod token;
pub mod types;
pub mod writer;

// Re-export main types for convenience
pub use config::{
    BatchGroupingKey, BatchSize, BatchType, ConsistencyLevel, FailurePolicy, ReadConfig,
    TimestampOption, TtlOption, WriteConfig,
};
pub use error::{ConfigError, Error, QueryError, Result};
pub use types::{ColumnDef, ColumnKind, DataType, Endpoint, Row, TableDef, TaskContext, Value};

// Re-export connection types
pub use connection::{
    BatchStatement, Codec, CodecRegistry, ColumnSpec, Connector, QueryStatement, ResultPage,
    Session, Statement, Topology,
};

// Re-export token ring types
pub use token::{Partitioner, RangePredicate, Token, TokenRange};

// Re-export planning types
pub use planning::{PartitionGenerator, ScanPartition, SizeEstimate, SizeEstimates, Split, SplitPlanner};

// Re-export read and write paths
pub use rate_limiter::RateLimiter;
pub use scanner::{ColumnMetadata, RowIterator, ScanResult, Scanner};
pub use writer::{
    Batch, BatchExecutor, BatchKey, BoundRow, ExecutionStats, GroupingBatchBuilder,
    NamedRowWriter, QueryTemplate, RowWriter, TableWriter, WriteMode, WriteSummary,
};

// Re-export metrics types
pub use metrics::{
    BatchEvent, Counter, Descriptor, Gauge, Histogram, HistogramSnapshot, MetricsSink,
    ReadMetrics, WriteMetrics, WriteMetricsSnapshot, LATENCY_BUCKETS, SIZE_BUCKETS,
};
