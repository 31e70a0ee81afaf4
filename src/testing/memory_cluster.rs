//! An in-memory cluster implementing the connection traits.
//!
//! Tokens are spread evenly over the ring and assigned to nodes round-robin,
//! so range ownership is predictable. Sessions understand the statements the
//! connector itself generates: range scans, inserts, deletes, batches and the
//! size-estimates query.

use crate::connection::{
    Codec, CodecRegistry, ColumnSpec, Connector, QueryStatement, ResultPage, Session, Statement,
    Topology,
};
use crate::error::{Error, QueryError, Result};
use crate::planning::SIZE_ESTIMATES_QUERY;
use crate::token::{Partitioner, Token, TokenRange};
use crate::types::{quote, ColumnKind, DataType, Endpoint, Row, TableDef, Value};
use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hasher;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;
use twox_hash::XxHash64;

/// Builder for [`MemoryCluster`].
#[derive(Debug, Clone)]
pub struct MemoryClusterBuilder {
    nodes: usize,
    vnodes: usize,
    replication: usize,
    partitioner: Partitioner,
    size_estimates_supported: bool,
}

impl Default for MemoryClusterBuilder {
    fn default() -> Self {
        Self {
            nodes: 1,
            vnodes: 1,
            replication: 1,
            partitioner: Partitioner::Murmur3,
            size_estimates_supported: true,
        }
    }
}

impl MemoryClusterBuilder {
    /// Set the number of nodes.
    pub fn nodes(mut self, nodes: usize) -> Self {
        self.nodes = nodes.max(1);
        self
    }

    /// Tokens per node.
    pub fn vnodes(mut self, vnodes: usize) -> Self {
        self.vnodes = vnodes.max(1);
        self
    }

    /// Set the number of replicas per range.
    pub fn replication(mut self, replication: usize) -> Self {
        self.replication = replication.max(1);
        self
    }

    /// Set the partitioner.
    pub fn partitioner(mut self, partitioner: Partitioner) -> Self {
        self.partitioner = partitioner;
        self
    }

    /// When disabled the size-estimates query fails as on servers without
    /// the table.
    pub fn size_estimates_supported(mut self, supported: bool) -> Self {
        self.size_estimates_supported = supported;
        self
    }

    /// Build the cluster.
    pub fn build(self) -> MemoryCluster {
        let ring = Ring::new(self.partitioner, self.nodes, self.vnodes, self.replication);
        MemoryCluster {
            state: Arc::new(ClusterState {
                ring: Arc::new(ring),
                registry: CodecRegistry::default(),
                size_estimates_supported: self.size_estimates_supported,
                tables: DashMap::new(),
                estimates: DashMap::new(),
                refuse_sessions: AtomicBool::new(false),
                open_sessions: AtomicUsize::new(0),
                sessions_opened: AtomicUsize::new(0),
                failing_reads: AtomicUsize::new(0),
                failing_writes: AtomicUsize::new(0),
                read_latency: Mutex::new(Duration::ZERO),
                write_latency: Mutex::new(Duration::ZERO),
                read_requests: AtomicUsize::new(0),
                write_requests: AtomicUsize::new(0),
                writes_in_flight: AtomicUsize::new(0),
                max_writes_in_flight: AtomicUsize::new(0),
                executed_writes: Mutex::new(Vec::new()),
            }),
        }
    }
}

/// Evenly spaced tokens owned round-robin by the nodes.
#[derive(Debug)]
struct Ring {
    partitioner: Partitioner,
    tokens: Vec<Token>,
    nodes: Vec<Endpoint>,
    replication: usize,
}

impl Ring {
    fn new(partitioner: Partitioner, nodes: usize, vnodes: usize, replication: usize) -> Self {
        let count = nodes * vnodes;
        let step = partitioner.ring_size() / count as u128;
        let min = partitioner.min_token();
        let tokens = (0..count as u128)
            .map(|i| partitioner.token_at(min, step * i))
            .collect();
        let nodes = (0..nodes)
            .map(|i| SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, i as u8 + 1)), 9042))
            .collect();
        Self {
            partitioner,
            tokens,
            nodes,
            replication,
        }
    }

    /// Index of the range `[tokens[i], tokens[i + 1])` holding `token`.
    fn range_index(&self, token: Token) -> usize {
        self.tokens.partition_point(|t| *t <= token).saturating_sub(1)
    }

    fn range_end(&self, index: usize) -> Token {
        self.tokens[(index + 1) % self.tokens.len()]
    }

    fn replicas_at(&self, index: usize) -> BTreeSet<Endpoint> {
        (0..self.replication.min(self.nodes.len()))
            .map(|r| self.nodes[(index + r) % self.nodes.len()])
            .collect()
    }
}

impl Topology for Ring {
    fn partitioner(&self) -> Partitioner {
        self.partitioner
    }

    fn token_ranges(&self, _keyspace: &str) -> Vec<TokenRange> {
        (0..self.tokens.len())
            .map(|i| TokenRange::new(self.tokens[i], self.range_end(i), self.replicas_at(i)))
            .collect()
    }

    fn token_for(&self, routing_key: &Bytes) -> Token {
        let hash = |seed: u64| {
            let mut hasher = XxHash64::with_seed(seed);
            hasher.write(routing_key);
            hasher.finish()
        };
        match self.partitioner {
            // The minimum token is reserved for the ring origin.
            Partitioner::Murmur3 => match hash(0) as i64 {
                i64::MIN => Token::Long(i64::MAX),
                token => Token::Long(token),
            },
            Partitioner::Random => {
                let wide = ((hash(0) as u128) << 64 | hash(1) as u128) >> 1;
                Token::Big((wide as i128).min(i128::MAX - 1))
            }
        }
    }

    fn replicas(&self, _keyspace: &str, token: Token) -> BTreeSet<Endpoint> {
        self.replicas_at(self.range_index(token))
    }
}

/// One row of `system.size_estimates`.
#[derive(Debug, Clone)]
struct EstimateRow {
    range_start: String,
    range_end: String,
    partitions_count: i64,
    mean_partition_size: i64,
}

/// Rows of one table ordered by token, then by encoded primary key.
#[derive(Debug)]
struct StoredTable {
    def: TableDef,
    rows: BTreeMap<(Token, Vec<u8>), BTreeMap<String, Value>>,
}

impl StoredTable {
    /// Position of the row identified by the assigned primary key values.
    fn key_for(
        &self,
        ring: &Ring,
        registry: &CodecRegistry,
        assigned: &[(&str, &Value)],
    ) -> Result<(Token, Vec<u8>)> {
        let mut partition: Vec<(Codec, &Value)> = Vec::new();
        let mut key = BytesMut::new();
        for column in self.def.primary_key() {
            let value = assigned
                .iter()
                .find(|(name, _)| *name == column.name)
                .map(|(_, value)| *value)
                .filter(|value| !matches!(value, Value::Null | Value::Unset))
                .ok_or_else(|| {
                    QueryError::Invalid(format!("missing primary key column {}", column.name))
                })?;
            let codec = registry.codec_for(&column.data_type)?;
            let mut encoded = BytesMut::new();
            codec.encode(value, &mut encoded)?;
            key.put_u32(encoded.len() as u32);
            key.extend_from_slice(&encoded);
            if column.kind == ColumnKind::PartitionKey {
                partition.push((codec, value));
            }
        }

        let components: Vec<(&Codec, &Value)> = partition.iter().map(|(c, v)| (c, *v)).collect();
        let token = ring.token_for(&registry.routing_key(&components)?);
        Ok((token, key.to_vec()))
    }
}

#[derive(Debug)]
struct ClusterState {
    ring: Arc<Ring>,
    registry: CodecRegistry,
    size_estimates_supported: bool,
    /// Keyed by the quoted qualified name.
    tables: DashMap<String, StoredTable>,
    estimates: DashMap<(String, String), Vec<EstimateRow>>,
    refuse_sessions: AtomicBool,
    open_sessions: AtomicUsize,
    sessions_opened: AtomicUsize,
    failing_reads: AtomicUsize,
    failing_writes: AtomicUsize,
    read_latency: Mutex<Duration>,
    write_latency: Mutex<Duration>,
    read_requests: AtomicUsize,
    write_requests: AtomicUsize,
    writes_in_flight: AtomicUsize,
    max_writes_in_flight: AtomicUsize,
    executed_writes: Mutex<Vec<Statement>>,
}

impl ClusterState {
    async fn read(&self, statement: &QueryStatement) -> Result<ResultPage> {
        let latency = *self.read_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.read_requests.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failing_reads) {
            return Err(QueryError::Unavailable("injected read failure".to_string()).into());
        }

        let query = parse_select(&statement.query)?;
        let table = self
            .tables
            .get(&query.table)
            .ok_or_else(|| unknown_table(&query.table))?;

        let columns: Vec<ColumnSpec> = match &query.columns {
            None => table
                .def
                .columns
                .iter()
                .map(|c| ColumnSpec::new(c.name.clone(), c.data_type.clone()))
                .collect(),
            Some(names) => names
                .iter()
                .map(|name| {
                    table
                        .def
                        .column(name)
                        .map(|c| ColumnSpec::new(c.name.clone(), c.data_type.clone()))
                        .ok_or_else(|| {
                            Error::from(QueryError::Invalid(format!("undefined column name {}", name)))
                        })
                })
                .collect::<Result<_>>()?,
        };

        let mut bounds = statement.values.iter();
        let lower = if query.lower { Some(token_of(bounds.next())?) } else { None };
        let upper = if query.upper { Some(token_of(bounds.next())?) } else { None };

        let rows: Vec<Vec<Value>> = table
            .rows
            .iter()
            .filter(|((token, _), _)| {
                lower.map_or(true, |l| *token >= l) && upper.map_or(true, |u| *token < u)
            })
            .map(|(_, row)| {
                columns
                    .iter()
                    .map(|c| row.get(&c.name).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        drop(table);

        page(columns.into(), rows, statement)
    }

    async fn write(&self, statements: &[&QueryStatement], request: &Statement) -> Result<ResultPage> {
        let _in_flight = InFlight::enter(&self.writes_in_flight, &self.max_writes_in_flight);
        let latency = *self.write_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.write_requests.fetch_add(1, Ordering::SeqCst);
        self.executed_writes.lock().push(request.clone());
        if take_one(&self.failing_writes) {
            return Err(QueryError::Execution("injected write failure".to_string()).into());
        }
        for statement in statements {
            self.apply(statement)?;
        }
        Ok(ResultPage::empty())
    }

    fn apply(&self, statement: &QueryStatement) -> Result<()> {
        if statement.query.starts_with("INSERT ") {
            self.apply_insert(statement)
        } else if statement.query.starts_with("DELETE ") {
            self.apply_delete(statement)
        } else {
            Err(unsupported(&statement.query))
        }
    }

    fn apply_insert(&self, statement: &QueryStatement) -> Result<()> {
        let query = parse_insert(&statement.query)?;
        let mut table = self
            .tables
            .get_mut(&query.table)
            .ok_or_else(|| unknown_table(&query.table))?;

        let assigned: Vec<(&str, &Value)> = query
            .columns
            .iter()
            .map(String::as_str)
            .zip(statement.values.iter())
            .collect();
        let key = table.key_for(&self.ring, &self.registry, &assigned)?;
        if query.if_not_exists && table.rows.contains_key(&key) {
            return Ok(());
        }

        let row = table.rows.entry(key).or_default();
        for (name, value) in assigned {
            match value {
                Value::Unset => {}
                Value::Null => {
                    row.remove(name);
                }
                value => {
                    row.insert(name.to_string(), value.clone());
                }
            }
        }
        Ok(())
    }

    fn apply_delete(&self, statement: &QueryStatement) -> Result<()> {
        let query = parse_delete(&statement.query)?;
        let mut table = self
            .tables
            .get_mut(&query.table)
            .ok_or_else(|| unknown_table(&query.table))?;

        let values = statement.values.get(query.markers_before_where..).unwrap_or(&[]);
        let assigned: Vec<(&str, &Value)> = query
            .key_columns
            .iter()
            .map(String::as_str)
            .zip(values.iter())
            .collect();
        let key = table.key_for(&self.ring, &self.registry, &assigned)?;

        if query.columns.is_empty() {
            table.rows.remove(&key);
        } else if let Some(row) = table.rows.get_mut(&key) {
            for column in &query.columns {
                row.remove(column);
            }
        }
        Ok(())
    }

    fn size_estimates(&self, statement: &QueryStatement) -> Result<ResultPage> {
        if !self.size_estimates_supported {
            return Err(QueryError::Unsupported(
                "unconfigured table system.size_estimates".to_string(),
            )
            .into());
        }
        let text = |i: usize| {
            statement
                .values
                .get(i)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::from(QueryError::Invalid("missing bind value".to_string())))
        };
        let key = (text(0)?, text(1)?);

        let rows: Vec<Vec<Value>> = self
            .estimates
            .get(&key)
            .map(|rows| {
                rows.iter()
                    .map(|r| {
                        vec![
                            Value::from(r.range_start.as_str()),
                            Value::from(r.range_end.as_str()),
                            Value::BigInt(r.partitions_count),
                            Value::BigInt(r.mean_partition_size),
                        ]
                    })
                    .collect()
            })
            .unwrap_or_default();

        let columns: Arc<[ColumnSpec]> = vec![
            ColumnSpec::new("range_start", DataType::Text),
            ColumnSpec::new("range_end", DataType::Text),
            ColumnSpec::new("partitions_count", DataType::BigInt),
            ColumnSpec::new("mean_partition_size", DataType::BigInt),
        ]
        .into();
        page(columns, rows, statement)
    }
}

/// Tracks concurrent write requests, including ones abandoned mid-flight.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(current: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(current)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A cluster living in process memory.
#[derive(Debug, Clone)]
pub struct MemoryCluster {
    state: Arc<ClusterState>,
}

impl MemoryCluster {
    /// Start configuring a cluster.
    pub fn builder() -> MemoryClusterBuilder {
        MemoryClusterBuilder::default()
    }

    /// Get the cluster partitioner.
    pub fn partitioner(&self) -> Partitioner {
        self.state.ring.partitioner
    }

    /// Endpoints of the nodes, in token assignment order.
    pub fn nodes(&self) -> Vec<Endpoint> {
        self.state.ring.nodes.clone()
    }

    /// Create (or replace) a table.
    pub fn create_table(&self, def: TableDef) {
        self.state.tables.insert(
            def.qualified_name(),
            StoredTable {
                def,
                rows: BTreeMap::new(),
            },
        );
    }

    /// Write one row directly, bypassing sessions.
    pub fn insert(&self, keyspace: &str, table: &str, values: &[(&str, Value)]) -> Result<()> {
        let name = qualified(keyspace, table);
        let mut stored = self.state.tables.get_mut(&name).ok_or_else(|| unknown_table(&name))?;
        let assigned: Vec<(&str, &Value)> = values.iter().map(|(n, v)| (*n, v)).collect();
        let key = stored.key_for(&self.state.ring, &self.state.registry, &assigned)?;

        let row = stored.rows.entry(key).or_default();
        for (name, value) in values {
            if !value.is_null() {
                row.insert(name.to_string(), value.clone());
            }
        }
        Ok(())
    }

    /// All rows of a table in token order, with every column of the table.
    pub fn rows(&self, keyspace: &str, table: &str) -> Vec<Row> {
        let Some(stored) = self.state.tables.get(&qualified(keyspace, table)) else {
            return Vec::new();
        };
        let names: Arc<[String]> = stored.def.columns.iter().map(|c| c.name.clone()).collect();
        stored
            .rows
            .values()
            .map(|row| {
                let values = names
                    .iter()
                    .map(|n| row.get(n).cloned().unwrap_or(Value::Null))
                    .collect();
                Row::new(names.clone(), values)
            })
            .collect()
    }

    /// Count the rows stored in a table.
    pub fn row_count(&self, keyspace: &str, table: &str) -> usize {
        self.state
            .tables
            .get(&qualified(keyspace, table))
            .map_or(0, |t| t.rows.len())
    }

    /// Publish estimates for every range, splitting `partitions` between them
    /// so that the counts add up exactly.
    pub fn set_size_estimates(&self, keyspace: &str, table: &str, partitions: u64, mean_size: u64) {
        let ring = &self.state.ring;
        let n = ring.tokens.len() as u128;
        let share = |i: u128| (partitions as u128 * i / n) as i64;
        let rows = (0..ring.tokens.len())
            .map(|i| EstimateRow {
                range_start: ring.partitioner.token_to_string(ring.tokens[i]),
                range_end: ring.partitioner.token_to_string(ring.range_end(i)),
                partitions_count: share(i as u128 + 1) - share(i as u128),
                mean_partition_size: mean_size as i64,
            })
            .collect();
        self.state
            .estimates
            .insert((keyspace.to_string(), table.to_string()), rows);
    }

    /// Append one raw estimate row.
    pub fn insert_size_estimate_row(
        &self,
        keyspace: &str,
        table: &str,
        range_start: &str,
        range_end: &str,
        partitions_count: i64,
        mean_partition_size: i64,
    ) {
        self.state
            .estimates
            .entry((keyspace.to_string(), table.to_string()))
            .or_default()
            .push(EstimateRow {
                range_start: range_start.to_string(),
                range_end: range_end.to_string(),
                partitions_count,
                mean_partition_size,
            });
    }

    /// Make `open_session` fail.
    pub fn refuse_sessions(&self, refuse: bool) {
        self.state.refuse_sessions.store(refuse, Ordering::SeqCst);
    }

    /// Fail the next `count` read requests.
    pub fn fail_next_reads(&self, count: usize) {
        self.state.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` write requests. A batch is one request.
    pub fn fail_next_writes(&self, count: usize) {
        self.state.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Delay every page read by `latency`.
    pub fn set_read_latency(&self, latency: Duration) {
        *self.state.read_latency.lock() = latency;
    }

    /// Delay every write request by `latency`.
    pub fn set_write_latency(&self, latency: Duration) {
        *self.state.write_latency.lock() = latency;
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.state.open_sessions.load(Ordering::SeqCst)
    }

    /// Get the number of sessions ever opened.
    pub fn sessions_opened(&self) -> usize {
        self.state.sessions_opened.load(Ordering::SeqCst)
    }

    /// Range-scan page requests served, including failed ones.
    pub fn read_requests(&self) -> usize {
        self.state.read_requests.load(Ordering::SeqCst)
    }

    /// Write requests served, including failed ones.
    pub fn write_requests(&self) -> usize {
        self.state.write_requests.load(Ordering::SeqCst)
    }

    /// Most write requests ever executing at once.
    pub fn max_writes_in_flight(&self) -> usize {
        self.state.max_writes_in_flight.load(Ordering::SeqCst)
    }

    /// Every write request received, in arrival order.
    pub fn executed_writes(&self) -> Vec<Statement> {
        self.state.executed_writes.lock().clone()
    }
}

#[async_trait::async_trait]
impl Connector for MemoryCluster {
    async fn open_session(&self) -> Result<Arc<dyn Session>> {
        if self.state.refuse_sessions.load(Ordering::SeqCst) {
            return Err(Error::Connection("connection refused".to_string()));
        }
        self.state.open_sessions.fetch_add(1, Ordering::SeqCst);
        self.state.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemorySession {
            state: self.state.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn codec_registry(&self) -> &CodecRegistry {
        &self.state.registry
    }

    fn topology(&self) -> Arc<dyn Topology> {
        self.state.ring.clone()
    }
}

#[derive(Debug)]
struct MemorySession {
    state: Arc<ClusterState>,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl Session for MemorySession {
    async fn execute(&self, statement: &Statement) -> Result<ResultPage> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Connection("session is closed".to_string()));
        }
        match statement {
            Statement::Batch(batch) => {
                trace!(statements = batch.statements.len(), "Executing batch");
                let statements: Vec<&QueryStatement> = batch.statements.iter().collect();
                self.state.write(&statements, statement).await
            }
            Statement::Query(query) if query.query == SIZE_ESTIMATES_QUERY => {
                self.state.size_estimates(query)
            }
            Statement::Query(query) if query.query.starts_with("SELECT ") => {
                self.state.read(query).await
            }
            Statement::Query(query) => self.state.write(&[query], statement).await,
        }
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::Connection("session already closed".to_string()));
        }
        self.state.open_sessions.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

struct SelectQuery {
    table: String,
    /// `None` for `*`.
    columns: Option<Vec<String>>,
    lower: bool,
    upper: bool,
}

struct InsertQuery {
    table: String,
    columns: Vec<String>,
    if_not_exists: bool,
}

struct DeleteQuery {
    table: String,
    columns: Vec<String>,
    key_columns: Vec<String>,
    markers_before_where: usize,
}

fn parse_select(query: &str) -> Result<SelectQuery> {
    let rest = query.strip_prefix("SELECT ").ok_or_else(|| unsupported(query))?;
    let from = rest.find(" FROM ").ok_or_else(|| unsupported(query))?;
    let list = rest[..from].trim();
    let after = &rest[from + " FROM ".len()..];
    let (table, clause) = match after.find(" WHERE ") {
        Some(i) => (&after[..i], &after[i + " WHERE ".len()..]),
        None => (after, ""),
    };
    Ok(SelectQuery {
        table: table.trim().to_string(),
        columns: (list != "*").then(|| split_columns(list)),
        lower: clause.contains(">= ?"),
        upper: clause.contains("< ?"),
    })
}

fn parse_insert(query: &str) -> Result<InsertQuery> {
    let rest = query.strip_prefix("INSERT INTO ").ok_or_else(|| unsupported(query))?;
    let open = rest.find(" (").ok_or_else(|| unsupported(query))?;
    let list = &rest[open + 2..];
    let close = list.find(')').ok_or_else(|| unsupported(query))?;
    Ok(InsertQuery {
        table: rest[..open].trim().to_string(),
        columns: split_columns(&list[..close]),
        if_not_exists: query.contains(" IF NOT EXISTS"),
    })
}

fn parse_delete(query: &str) -> Result<DeleteQuery> {
    let rest = query.strip_prefix("DELETE ").ok_or_else(|| unsupported(query))?;
    let from = rest.find("FROM ").ok_or_else(|| unsupported(query))?;
    let after = &rest[from + "FROM ".len()..];
    let at = after.find(" WHERE ").ok_or_else(|| unsupported(query))?;
    let head = &after[..at];
    let table = head.split(" USING ").next().unwrap_or(head).trim().to_string();
    let key_columns = after[at + " WHERE ".len()..]
        .split(" AND ")
        .map(|predicate| unquote(predicate.split('=').next().unwrap_or_default()))
        .collect();
    Ok(DeleteQuery {
        table,
        columns: split_columns(&rest[..from]),
        key_columns,
        markers_before_where: head.matches('?').count(),
    })
}

fn split_columns(list: &str) -> Vec<String> {
    list.split(',')
        .map(unquote)
        .filter(|c| !c.is_empty())
        .collect()
}

fn unquote(identifier: &str) -> String {
    let identifier = identifier.trim();
    identifier
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .map(|s| s.replace("\"\"", "\""))
        .unwrap_or_else(|| identifier.to_string())
}

fn qualified(keyspace: &str, table: &str) -> String {
    format!("{}.{}", quote(keyspace), quote(table))
}

fn token_of(value: Option<&Value>) -> Result<Token> {
    match value {
        Some(Value::BigInt(v)) => Ok(Token::Long(*v)),
        Some(Value::Varint(v)) => Ok(Token::Big(*v)),
        other => Err(QueryError::Invalid(format!("invalid token bound: {:?}", other)).into()),
    }
}

/// Serve one page of `rows`, resuming from the statement's paging state.
fn page(columns: Arc<[ColumnSpec]>, rows: Vec<Vec<Value>>, statement: &QueryStatement) -> Result<ResultPage> {
    let offset = match &statement.paging_state {
        None => 0,
        Some(state) => <[u8; 8]>::try_from(state.as_ref())
            .map(u64::from_be_bytes)
            .map_err(|_| QueryError::Invalid("malformed paging state".to_string()))?
            as usize,
    };
    let offset = offset.min(rows.len());
    let size = statement.page_size.unwrap_or(usize::MAX).max(1);
    let end = offset.saturating_add(size).min(rows.len());
    let paging_state =
        (end < rows.len()).then(|| Bytes::copy_from_slice(&(end as u64).to_be_bytes()));

    Ok(ResultPage {
        columns,
        rows: rows.into_iter().skip(offset).take(end - offset).collect(),
        paging_state,
    })
}

/// Consume one unit of an injected-failure budget.
fn take_one(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn unknown_table(name: &str) -> Error {
    QueryError::Invalid(format!("unconfigured table {}", name)).into()
}

fn unsupported(query: &str) -> Error {
    QueryError::Invalid(format!("unsupported statement: {}", query)).into()
}
