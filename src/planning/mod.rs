//! Read planning: size estimates, split planning and scan partitions.

mod generator;
mod size_estimates;
mod splitter;

pub use generator::{PartitionGenerator, ScanPartition};
pub use size_estimates::{SizeEstimate, SizeEstimates, POLL_INTERVAL, SIZE_ESTIMATES_QUERY};
pub use splitter::{Split, SplitPlanner};
