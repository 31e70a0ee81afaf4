//! Statements sent to the store and the pages they return.

use crate::config::{BatchType, ConsistencyLevel};
use crate::types::{DataType, Row, Value};
use bytes::Bytes;
use std::sync::Arc;

/// A single CQL statement with bound values.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryStatement {
    pub query: String,
    pub values: Vec<Value>,
    pub consistency: ConsistencyLevel,
    /// Rows per page; `None` lets the session decide.
    pub page_size: Option<usize>,
    /// Opaque continuation returned by the previous page.
    pub paging_state: Option<Bytes>,
    pub idempotent: bool,
    /// Serialized partition key, used for token-aware routing.
    pub routing_key: Option<Bytes>,
}

impl QueryStatement {
    /// Create an idempotent statement with no bound values.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            values: Vec::new(),
            consistency: ConsistencyLevel::default(),
            page_size: None,
            paging_state: None,
            idempotent: false,
            routing_key: None,
        }
    }

    /// Set the bound values.
    pub fn with_values(mut self, values: Vec<Value>) -> Self {
        self.values = values;
        self
    }

    /// Set the consistency level.
    pub fn with_consistency(mut self, consistency: ConsistencyLevel) -> Self {
        self.consistency = consistency;
        self
    }

    /// Set the number of rows per result page.
    pub fn with_page_size(mut self, rows: usize) -> Self {
        self.page_size = Some(rows);
        self
    }

    /// Resume from the paging state of a previous page.
    pub fn with_paging_state(mut self, state: Option<Bytes>) -> Self {
        self.paging_state = state;
        self
    }

    /// Mark whether the statement may be safely re-executed.
    pub fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// Set the serialized partition key used for routing.
    pub fn with_routing_key(mut self, key: Bytes) -> Self {
        self.routing_key = Some(key);
        self
    }
}

/// Several mutations applied as one request.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStatement {
    pub batch_type: BatchType,
    pub statements: Vec<QueryStatement>,
    pub consistency: ConsistencyLevel,
    pub idempotent: bool,
}

/// Anything a session can execute.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Query(QueryStatement),
    Batch(BatchStatement),
}

impl Statement {
    /// Number of mutations carried.
    pub fn len(&self) -> usize {
        match self {
            Statement::Query(_) => 1,
            Statement::Batch(b) => b.statements.len(),
        }
    }

    /// Whether the statement carries no mutations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<QueryStatement> for Statement {
    fn from(stmt: QueryStatement) -> Self {
        Statement::Query(stmt)
    }
}

impl From<BatchStatement> for Statement {
    fn from(batch: BatchStatement) -> Self {
        Statement::Batch(batch)
    }
}

/// A result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: DataType,
}

impl ColumnSpec {
    /// Describe a result column.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, Default)]
pub struct ResultPage {
    pub columns: Arc<[ColumnSpec]>,
    pub rows: Vec<Vec<Value>>,
    /// Present while more pages remain.
    pub paging_state: Option<Bytes>,
}

impl ResultPage {
    /// A page for statements that return no rows.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether another page can be fetched.
    pub fn has_more_pages(&self) -> bool {
        self.paging_state.is_some()
    }

    /// Rows of this page keyed by column name.
    pub fn named_rows(&self) -> Vec<Row> {
        let names: Arc<[String]> = self.columns.iter().map(|c| c.name.clone()).collect();
        self.rows
            .iter()
            .map(|values| Row::new(names.clone(), values.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_len() {
        let q = QueryStatement::new("INSERT INTO t (a) VALUES (?)").with_values(vec![Value::Int(1)]);
        assert_eq!(Statement::from(q.clone()).len(), 1);

        let batch = BatchStatement {
            batch_type: BatchType::Unlogged,
            statements: vec![q.clone(), q],
            consistency: ConsistencyLevel::One,
            idempotent: true,
        };
        assert_eq!(Statement::from(batch).len(), 2);
    }

    #[test]
    fn test_named_rows() {
        let page = ResultPage {
            columns: vec![
                ColumnSpec::new("id", DataType::Int),
                ColumnSpec::new("name", DataType::Text),
            ]
            .into(),
            rows: vec![vec![Value::Int(1), Value::from("a")]],
            paging_state: None,
        };
        let rows = page.named_rows();
        assert_eq!(rows[0].get("name"), Some(&Value::from("a")));
        assert!(!page.has_more_pages());
    }
}
