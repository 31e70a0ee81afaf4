//! Core types used throughout the connector.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Address of a replica node in the cluster.
pub type Endpoint = SocketAddr;

/// Column data types understood by the codec layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int,
    BigInt,
    Varint,
    Double,
    Text,
    Blob,
    Uuid,
    Timestamp,
    List(Box<DataType>),
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Boolean => write!(f, "boolean"),
            DataType::Int => write!(f, "int"),
            DataType::BigInt => write!(f, "bigint"),
            DataType::Varint => write!(f, "varint"),
            DataType::Double => write!(f, "double"),
            DataType::Text => write!(f, "text"),
            DataType::Blob => write!(f, "blob"),
            DataType::Uuid => write!(f, "uuid"),
            DataType::Timestamp => write!(f, "timestamp"),
            DataType::List(inner) => write!(f, "list<{}>", inner),
        }
    }
}

/// A single column value.
///
/// `Unset` leaves a bound column untouched on the server, which is how
/// null values are skipped when nulls are ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Unset,
    Boolean(bool),
    Int(i32),
    BigInt(i64),
    Varint(i128),
    Double(f64),
    Text(String),
    Blob(Bytes),
    Uuid(Uuid),
    /// Milliseconds since the UNIX epoch.
    Timestamp(i64),
    List(Vec<Value>),
}

impl Value {
    /// Whether the value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view used for TTL and timestamp placeholders.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v as i64),
            Value::BigInt(v) | Value::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// Text view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

/// A row of named values.
///
/// Column names are shared between all rows of one scan or one writer input.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    names: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row. Missing trailing values read as `Null`.
    pub fn new(names: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { names, values }
    }

    /// Column names of this row.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value at a column position.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value of a named column.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.values.get(i))
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consume the row, returning its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Role of a column in the table's primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    PartitionKey,
    Clustering,
    Regular,
}

/// Definition of one table column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub kind: ColumnKind,
}

impl ColumnDef {
    /// Create a partition key column.
    pub fn partition_key(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            kind: ColumnKind::PartitionKey,
        }
    }

    /// Create a clustering column.
    pub fn clustering(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            kind: ColumnKind::Clustering,
        }
    }

    /// Create a regular column.
    pub fn regular(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            kind: ColumnKind::Regular,
        }
    }

    /// Whether this column is part of the primary key.
    pub fn is_primary_key(&self) -> bool {
        self.kind != ColumnKind::Regular
    }
}

/// Schema of a table. Key columns are kept in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub keyspace: String,
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    /// Create a table definition. Columns keep their declared order.
    pub fn new(keyspace: impl Into<String>, name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            keyspace: keyspace.into(),
            name: name.into(),
            columns,
        }
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Partition key columns in order.
    pub fn partition_key(&self) -> Vec<&ColumnDef> {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnKind::PartitionKey)
            .collect()
    }

    /// Partition key followed by clustering columns.
    pub fn primary_key(&self) -> Vec<&ColumnDef> {
        self.partition_key()
            .into_iter()
            .chain(self.columns.iter().filter(|c| c.kind == ColumnKind::Clustering))
            .collect()
    }

    /// `"keyspace"."table"`, quoted for use in statements.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", quote(&self.keyspace), quote(&self.name))
    }
}

impl fmt::Display for TableDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.keyspace, self.name)
    }
}

/// Quote an identifier for use in a statement.
pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Identity and cancellation signal of one parallel compute unit.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Unique id used to attribute log events and failures.
    pub id: Uuid,
    /// Index of the partition or split this task processes.
    pub partition: usize,
    /// Cancelled when the surrounding job is aborted.
    pub cancel: CancellationToken,
}

impl TaskContext {
    /// Create a context for partition `partition` with a fresh cancellation token.
    pub fn new(partition: usize) -> Self {
        Self::with_cancel(partition, CancellationToken::new())
    }

    /// Create a task bound to an existing cancellation signal.
    pub fn with_cancel(partition: usize, cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            partition,
            cancel,
        }
    }

    /// Whether the task was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
