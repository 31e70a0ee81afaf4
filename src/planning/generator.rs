//! Scan partitions for a table.

use super::size_estimates::SizeEstimates;
use super::splitter::{Split, SplitPlanner};
use crate::config::ReadConfig;
use crate::connection::{Connector, QueryStatement};
use crate::error::{ConfigError, Result};
use crate::token::{Partitioner, TokenRange};
use crate::types::{quote, Endpoint, TableDef};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// One partition of a table scan, read by exactly one task.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPartition {
    pub index: usize,
    pub ranges: Vec<TokenRange>,
    /// Replicas preferred for running the task.
    pub endpoints: BTreeSet<Endpoint>,
    pub estimated_bytes: u64,
}

impl From<Split> for ScanPartition {
    fn from(split: Split) -> Self {
        Self {
            index: split.index,
            ranges: split.ranges,
            endpoints: split.endpoints,
            estimated_bytes: split.estimated_bytes,
        }
    }
}

impl ScanPartition {
    /// Range-scan statements covering this partition, one per token predicate.
    ///
    /// An empty `columns` selects every column of the table.
    pub fn statements(
        &self,
        partitioner: Partitioner,
        table: &TableDef,
        columns: &[&str],
        config: &ReadConfig,
    ) -> Result<Vec<QueryStatement>> {
        for column in columns {
            if table.column(column).is_none() {
                return Err(ConfigError::UnknownColumn {
                    table: table.to_string(),
                    column: column.to_string(),
                }
                .into());
            }
        }

        let selected = if columns.is_empty() {
            table.columns.iter().map(|c| quote(&c.name)).collect::<Vec<_>>()
        } else {
            columns.iter().map(|c| quote(c)).collect()
        };
        let pk: Vec<&str> = table.partition_key().iter().map(|c| c.name.as_str()).collect();
        let select = format!("SELECT {} FROM {}", selected.join(", "), table.qualified_name());

        let mut statements = Vec::new();
        for range in &self.ranges {
            for predicate in range.predicates(partitioner, &pk) {
                let query = if predicate.is_unbounded() {
                    select.clone()
                } else {
                    format!("{} WHERE {}", select, predicate.clause)
                };
                statements.push(
                    QueryStatement::new(query)
                        .with_values(predicate.bounds.iter().map(|t| t.to_value()).collect())
                        .with_consistency(config.consistency_level)
                        .with_page_size(config.fetch_size_rows)
                        .with_idempotent(true),
                );
            }
        }
        Ok(statements)
    }
}

/// Plans the scan partitions of one table.
#[derive(Debug)]
pub struct PartitionGenerator {
    connector: Arc<dyn Connector>,
    table: TableDef,
    config: ReadConfig,
}

impl PartitionGenerator {
    /// Create a generator for `table`, validating `config` first.
    pub fn new(connector: Arc<dyn Connector>, table: TableDef, config: ReadConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            connector,
            table,
            config,
        })
    }

    /// Get the table being planned.
    pub fn table(&self) -> &TableDef {
        &self.table
    }

    /// Fetch topology and size estimates, then plan the partitions.
    pub async fn partitions(&self) -> Result<Vec<ScanPartition>> {
        let topology = self.connector.topology();
        let partitioner = topology.partitioner();
        let ranges = topology.token_ranges(&self.table.keyspace);

        let estimates =
            SizeEstimates::fetch(self.connector.as_ref(), &self.table.keyspace, &self.table.name)
                .await;
        let data_size_bytes = estimates.data_size_bytes();

        let planner = SplitPlanner::new(
            partitioner,
            self.config.split_size_bytes,
            self.config.effective_parallelism(),
        )
        .with_locality_aware(self.config.locality_aware);
        let splits = planner.plan(ranges, data_size_bytes)?;

        info!(
            table = %self.table,
            data_size_bytes,
            partitions = splits.len(),
            "Generated scan partitions"
        );
        Ok(splits.into_iter().map(ScanPartition::from).collect())
    }
}
