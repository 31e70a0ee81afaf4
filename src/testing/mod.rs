//! Testing utilities.
//!
//! [`MemoryCluster`] stands in for a real cluster behind the
//! [`Connector`](crate::connection::Connector) traits:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                      MemoryCluster                        │
//! │  ┌──────────────┐  ┌──────────────┐  ┌─────────────────┐  │
//! │  │    Ring      │  │   Tables     │  │ Size estimates  │  │
//! │  │ - tokens     │  │ - rows by    │  │ - per range     │  │
//! │  │ - replicas   │  │   token      │  │ - unsupported   │  │
//! │  └──────────────┘  └──────────────┘  └─────────────────┘  │
//! │  Failure injection: refused sessions, failed reads/writes  │
//! │  Latency: per read page, per write request                │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use tokenbridge::testing::MemoryCluster;
//!
//! let cluster = MemoryCluster::builder().nodes(3).vnodes(8).build();
//! cluster.create_table(table);
//! cluster.set_size_estimates("ks", "users", 10_000, 512);
//! cluster.fail_next_writes(1);
//! ```

mod memory_cluster;


pub use memory_cluster::{MemoryCluster, MemoryClusterBuilder};
