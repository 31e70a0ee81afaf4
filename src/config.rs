//! Configuration types for reading and writing.
//!
//! Values only: parsing them from properties or files is left to the caller.
//! Every type derives serde so any external format can populate it.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Bytes per MiB, used to convert throughput caps.
pub const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Consistency level requested for statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    Serial,
    LocalSerial,
    #[default]
    LocalOne,
}

/// How write batches are bounded. The two modes are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchSize {
    /// At most this many statements per batch.
    Rows(usize),
    /// At most this many serialized bytes per batch.
    Bytes(usize),
}

impl Default for BatchSize {
    fn default() -> Self {
        BatchSize::Bytes(1024)
    }
}

/// Which statements may share a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BatchGroupingKey {
    /// Any statements may share a batch.
    None,
    /// Statements whose partition keys are owned by the same replicas.
    ReplicaSet,
    /// Statements with the same partition key.
    #[default]
    Partition,
}

impl FromStr for BatchGroupingKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(BatchGroupingKey::None),
            "replica_set" | "replicaset" | "replica-set" => Ok(BatchGroupingKey::ReplicaSet),
            "partition" => Ok(BatchGroupingKey::Partition),
            _ => Err(ConfigError::UnknownGroupingKey(s.to_string())),
        }
    }
}

/// Batch log semantics for multi-statement batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BatchType {
    Logged,
    #[default]
    Unlogged,
}

/// Time-to-live applied to written cells.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TtlOption {
    /// Use the table default.
    #[default]
    Default,
    /// Fixed TTL in seconds.
    Constant(u32),
    /// TTL in seconds read from the named input column.
    PerRow(String),
}

/// Write timestamp applied to written cells.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimestampOption {
    /// Let the server assign the timestamp.
    #[default]
    Default,
    /// Fixed timestamp in microseconds.
    Constant(i64),
    /// Timestamp in microseconds read from the named input column.
    PerRow(String),
}

impl TtlOption {
    pub(crate) fn per_row_column(&self) -> Option<&str> {
        match self {
            TtlOption::PerRow(c) => Some(c),
            _ => None,
        }
    }
}

impl TimestampOption {
    pub(crate) fn per_row_column(&self) -> Option<&str> {
        match self {
            TimestampOption::PerRow(c) => Some(c),
            _ => None,
        }
    }
}

/// What a write task does after batch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Fail the task once all in-flight batches have completed.
    #[default]
    Abort,
    /// Log failures and report the task as successful.
    LogAndContinue,
}

/// Write configuration profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteConfig {
    /// Batch sizing mode and bound.
    pub batch_size: BatchSize,

    /// Maximum number of open batches kept while grouping.
    pub batch_grouping_buffer_size: usize,

    /// Which statements may share a batch.
    pub batch_grouping_key: BatchGroupingKey,

    /// Logged or unlogged batches.
    pub batch_type: BatchType,

    /// Consistency level of write statements.
    pub consistency_level: ConsistencyLevel,

    /// Append `IF NOT EXISTS` to inserts.
    pub if_not_exists: bool,

    /// Bind null values as unset instead of writing tombstones.
    pub ignore_nulls: bool,

    /// Maximum number of batches in flight per task.
    pub parallelism_level: usize,

    /// Optional throughput cap in MiB per second.
    pub throughput_mib_per_sec: Option<f64>,

    /// Time-to-live of written cells.
    pub ttl: TtlOption,

    /// Write timestamp of written cells.
    pub timestamp: TimestampOption,

    /// Behaviour after batch failures.
    pub failure_policy: FailurePolicy,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            batch_size: BatchSize::default(),
            batch_grouping_buffer_size: 1000,
            batch_grouping_key: BatchGroupingKey::default(),
            batch_type: BatchType::default(),
            consistency_level: ConsistencyLevel::LocalQuorum,
            if_not_exists: false,
            ignore_nulls: false,
            parallelism_level: 5,
            throughput_mib_per_sec: None,
            ttl: TtlOption::default(),
            timestamp: TimestampOption::default(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl WriteConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: BatchSize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the number of open batches kept while grouping.
    pub fn with_grouping_buffer_size(mut self, size: usize) -> Self {
        self.batch_grouping_buffer_size = size;
        self
    }

    /// Set the batch grouping key.
    pub fn with_grouping_key(mut self, key: BatchGroupingKey) -> Self {
        self.batch_grouping_key = key;
        self
    }

    /// Set the batch type.
    pub fn with_batch_type(mut self, batch_type: BatchType) -> Self {
        self.batch_type = batch_type;
        self
    }

    /// Set the consistency level.
    pub fn with_consistency_level(mut self, level: ConsistencyLevel) -> Self {
        self.consistency_level = level;
        self
    }

    /// Guard inserts with `IF NOT EXISTS`.
    pub fn with_if_not_exists(mut self, enabled: bool) -> Self {
        self.if_not_exists = enabled;
        self
    }

    /// Skip null values instead of writing tombstones.
    pub fn with_ignore_nulls(mut self, enabled: bool) -> Self {
        self.ignore_nulls = enabled;
        self
    }

    /// Set the number of batches in flight.
    pub fn with_parallelism_level(mut self, level: usize) -> Self {
        self.parallelism_level = level;
        self
    }

    /// Cap throughput in MiB per second.
    pub fn with_throughput_mib_per_sec(mut self, mib: f64) -> Self {
        self.throughput_mib_per_sec = Some(mib);
        self
    }

    /// Set the TTL option.
    pub fn with_ttl(mut self, ttl: TtlOption) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the timestamp option.
    pub fn with_timestamp(mut self, timestamp: TimestampOption) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the failure policy.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Throughput cap converted to bytes per second.
    pub fn throughput_bytes_per_sec(&self) -> Option<u64> {
        self.throughput_mib_per_sec
            .map(|mib| (mib * BYTES_PER_MIB) as u64)
    }

    /// Check every value without touching the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.batch_size {
            BatchSize::Rows(0) => {
                return Err(ConfigError::InvalidBatchSize("0 rows".to_string()));
            }
            BatchSize::Bytes(0) => {
                return Err(ConfigError::InvalidBatchSize("0 bytes".to_string()));
            }
            _ => {}
        }
        if self.batch_grouping_buffer_size == 0 {
            return Err(ConfigError::InvalidGroupingBufferSize(0));
        }
        if self.parallelism_level == 0 {
            return Err(ConfigError::InvalidParallelism(0));
        }
        validate_throughput(self.throughput_mib_per_sec)?;
        if let TtlOption::PerRow(c) = &self.ttl {
            if c.is_empty() {
                return Err(ConfigError::Invalid("empty TTL column name".to_string()));
            }
        }
        if let TimestampOption::PerRow(c) = &self.timestamp {
            if c.is_empty() {
                return Err(ConfigError::Invalid("empty timestamp column name".to_string()));
            }
        }
        Ok(())
    }
}

/// Read configuration profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadConfig {
    /// Target amount of data per split.
    pub split_size_bytes: u64,

    /// Rows per page requested from the store.
    pub fetch_size_rows: usize,

    /// Consistency level of scan statements.
    pub consistency_level: ConsistencyLevel,

    /// Parallelism of the compute engine; defaults to available cores.
    pub parallelism: Option<usize>,

    /// Keep each split on ranges owned by one replica set.
    pub locality_aware: bool,

    /// Pages buffered ahead of the consumer.
    pub prefetch_pages: usize,

    /// Optional read throughput cap in MiB per second.
    pub throughput_mib_per_sec: Option<f64>,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            split_size_bytes: 64 * 1024 * 1024, // 64 MiB
            fetch_size_rows: 1000,
            consistency_level: ConsistencyLevel::LocalOne,
            parallelism: None,
            locality_aware: true,
            prefetch_pages: 1,
            throughput_mib_per_sec: None,
        }
    }
}

impl ReadConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the split size in bytes.
    pub fn with_split_size_bytes(mut self, bytes: u64) -> Self {
        self.split_size_bytes = bytes;
        self
    }

    /// Set the page size in rows.
    pub fn with_fetch_size_rows(mut self, rows: usize) -> Self {
        self.fetch_size_rows = rows;
        self
    }

    /// Set the consistency level.
    pub fn with_consistency_level(mut self, level: ConsistencyLevel) -> Self {
        self.consistency_level = level;
        self
    }

    /// Set the engine parallelism used for the minimal split count.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    /// Enable or disable locality-aware split planning.
    pub fn with_locality_aware(mut self, enabled: bool) -> Self {
        self.locality_aware = enabled;
        self
    }

    /// Set the number of prefetched pages.
    pub fn with_prefetch_pages(mut self, pages: usize) -> Self {
        self.prefetch_pages = pages;
        self
    }

    /// Cap read throughput in MiB per second.
    pub fn with_throughput_mib_per_sec(mut self, mib: f64) -> Self {
        self.throughput_mib_per_sec = Some(mib);
        self
    }

    /// Engine parallelism, falling back to the number of available cores.
    pub fn effective_parallelism(&self) -> usize {
        self.parallelism.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Throughput cap converted to bytes per second.
    pub fn throughput_bytes_per_sec(&self) -> Option<u64> {
        self.throughput_mib_per_sec
            .map(|mib| (mib * BYTES_PER_MIB) as u64)
    }

    /// Check every value without touching the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.split_size_bytes == 0 {
            return Err(ConfigError::InvalidSplitSize(0));
        }
        if self.fetch_size_rows == 0 {
            return Err(ConfigError::InvalidFetchSize(0));
        }
        if self.prefetch_pages == 0 {
            return Err(ConfigError::Invalid("prefetch_pages must be positive".to_string()));
        }
        if self.parallelism == Some(0) {
            return Err(ConfigError::InvalidParallelism(0));
        }
        validate_throughput(self.throughput_mib_per_sec)
    }
}

fn validate_throughput(mib: Option<f64>) -> Result<(), ConfigError> {
    match mib {
        Some(v) if !v.is_finite() || v <= 0.0 => Err(ConfigError::InvalidThroughput(v)),
        _ => Ok(()),
    }
}
