//! Row to statement conversion.

use crate::config::{ConsistencyLevel, TimestampOption, TtlOption, WriteConfig};
use crate::connection::{Codec, CodecRegistry, QueryStatement};
use crate::error::{ConfigError, Result};
use crate::types::{quote, DataType, Row, TableDef, Value};
use bytes::Bytes;

/// What the writer does with each row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Upsert the row's columns.
    #[default]
    Insert,
    /// Delete the listed columns of the row, or the whole row when empty.
    Delete { columns: Vec<String> },
}

/// Extracts the values of one input item in the order of
/// [`column_names`](RowWriter::column_names).
pub trait RowWriter<T>: Send + Sync {
    fn column_names(&self) -> &[String];

    /// Append the item's values to `buf`.
    fn read_values(&self, item: &T, buf: &mut Vec<Value>) -> Result<()>;
}

/// Writes [`Row`]s by column name; absent columns read as null.
#[derive(Debug, Clone)]
pub struct NamedRowWriter {
    columns: Vec<String>,
}

impl NamedRowWriter {
    /// Create a writer reading the named columns from each row.
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

impl RowWriter<Row> for NamedRowWriter {
    fn column_names(&self) -> &[String] {
        &self.columns
    }

    fn read_values(&self, item: &Row, buf: &mut Vec<Value>) -> Result<()> {
        for column in &self.columns {
            buf.push(item.get(column).cloned().unwrap_or(Value::Null));
        }
        Ok(())
    }
}

/// A statement bound to one row, with what batching needs to know about it.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundRow {
    pub statement: QueryStatement,
    /// Serialized size of the bound values.
    pub size: usize,
    pub routing_key: Bytes,
}

/// One bind marker: which input value feeds it and how it is encoded.
#[derive(Debug, Clone)]
struct Marker {
    input: usize,
    codec: Codec,
}

/// A prepared mutation for one table and input column layout.
#[derive(Debug, Clone)]
pub struct QueryTemplate {
    query: String,
    markers: Vec<Marker>,
    partition_key: Vec<Marker>,
    ignore_nulls: bool,
    consistency: ConsistencyLevel,
    idempotent: bool,
}

impl QueryTemplate {
    /// Validate the input columns against the table and build the statement
    /// text. Fails without touching the network.
    pub fn new(
        table: &TableDef,
        input_columns: &[String],
        mode: &WriteMode,
        config: &WriteConfig,
        registry: &CodecRegistry,
    ) -> std::result::Result<Self, ConfigError> {
        let position = |name: &str| input_columns.iter().position(|c| c == name);
        let ttl_column = config.ttl.per_row_column();
        let timestamp_column = config.timestamp.per_row_column();

        let mut missing = Vec::new();
        for column in table.primary_key() {
            if position(&column.name).is_none() {
                missing.push(column.name.clone());
            }
        }
        if !missing.is_empty() {
            return Err(ConfigError::MissingPrimaryKeyColumns { missing });
        }

        // Every input column must be a table column or a TTL/timestamp source.
        let mut written = Vec::new();
        for (i, name) in input_columns.iter().enumerate() {
            if Some(name.as_str()) == ttl_column || Some(name.as_str()) == timestamp_column {
                continue;
            }
            let column = table.column(name).ok_or_else(|| ConfigError::UnknownColumn {
                table: table.to_string(),
                column: name.clone(),
            })?;
            written.push((i, column));
        }

        let marker = |name: &str, data_type: &DataType| -> std::result::Result<Marker, ConfigError> {
            let input = position(name).ok_or_else(|| ConfigError::UnknownColumn {
                table: table.to_string(),
                column: name.to_string(),
            })?;
            Ok(Marker {
                input,
                codec: registry.codec_for(data_type)?,
            })
        };

        let partition_key = table
            .partition_key()
            .iter()
            .map(|c| marker(&c.name, &c.data_type))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut markers = Vec::new();
        let query = match mode {
            WriteMode::Insert => {
                let mut names = Vec::new();
                for (i, column) in &written {
                    names.push(quote(&column.name));
                    markers.push(Marker {
                        input: *i,
                        codec: registry.codec_for(&column.data_type)?,
                    });
                }
                let placeholders = vec!["?"; names.len()].join(", ");
                let mut query = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    table.qualified_name(),
                    names.join(", "),
                    placeholders
                );
                if config.if_not_exists {
                    query.push_str(" IF NOT EXISTS");
                }

                let mut using = Vec::new();
                match &config.ttl {
                    TtlOption::Default => {}
                    TtlOption::Constant(secs) => using.push(format!("TTL {}", secs)),
                    TtlOption::PerRow(column) => {
                        using.push("TTL ?".to_string());
                        markers.push(marker(column, &DataType::Int)?);
                    }
                }
                if let Some(clause) = timestamp_clause(&config.timestamp, &marker, &mut markers)? {
                    using.push(clause);
                }
                if !using.is_empty() {
                    query.push_str(" USING ");
                    query.push_str(&using.join(" AND "));
                }
                query
            }
            WriteMode::Delete { columns } => {
                for column in columns {
                    if table.column(column).is_none() {
                        return Err(ConfigError::UnknownColumn {
                            table: table.to_string(),
                            column: column.clone(),
                        });
                    }
                }
                let targets = columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
                let mut query = if targets.is_empty() {
                    format!("DELETE FROM {}", table.qualified_name())
                } else {
                    format!("DELETE {} FROM {}", targets, table.qualified_name())
                };
                if let Some(clause) = timestamp_clause(&config.timestamp, &marker, &mut markers)? {
                    query.push_str(" USING ");
                    query.push_str(&clause);
                }

                let mut predicates = Vec::new();
                for column in table.primary_key() {
                    predicates.push(format!("{} = ?", quote(&column.name)));
                    markers.push(marker(&column.name, &column.data_type)?);
                }
                query.push_str(" WHERE ");
                query.push_str(&predicates.join(" AND "));
                query
            }
        };

        Ok(Self {
            query,
            markers,
            partition_key,
            ignore_nulls: config.ignore_nulls && *mode == WriteMode::Insert,
            consistency: config.consistency_level,
            // Conditional updates are not safe to retry.
            idempotent: !config.if_not_exists,
        })
    }

    /// Get the statement text.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Bind one row's values, in the order given by the input columns.
    pub fn bind(&self, values: &[Value], registry: &CodecRegistry) -> Result<BoundRow> {
        let value_at = |i: usize| values.get(i).cloned().unwrap_or(Value::Null);

        let mut bound = Vec::with_capacity(self.markers.len());
        let mut size = 0;
        for marker in &self.markers {
            let mut value = value_at(marker.input);
            if self.ignore_nulls && value.is_null() {
                value = Value::Unset;
            }
            size += marker.codec.serialized_size(&value)?;
            bound.push(value);
        }

        let key_values: Vec<Value> = self.partition_key.iter().map(|m| value_at(m.input)).collect();
        let components: Vec<(&Codec, &Value)> = self
            .partition_key
            .iter()
            .zip(&key_values)
            .map(|(m, v)| (&m.codec, v))
            .collect();
        let routing_key = registry.routing_key(&components)?;

        let statement = QueryStatement::new(self.query.clone())
            .with_values(bound)
            .with_consistency(self.consistency)
            .with_idempotent(self.idempotent)
            .with_routing_key(routing_key.clone());

        Ok(BoundRow {
            statement,
            size,
            routing_key,
        })
    }
}

fn timestamp_clause<F>(
    option: &TimestampOption,
    marker: &F,
    markers: &mut Vec<Marker>,
) -> std::result::Result<Option<String>, ConfigError>
where
    F: Fn(&str, &DataType) -> std::result::Result<Marker, ConfigError>,
{
    Ok(match option {
        TimestampOption::Default => None,
        TimestampOption::Constant(micros) => Some(format!("TIMESTAMP {}", micros)),
        TimestampOption::PerRow(column) => {
            markers.push(marker(column, &DataType::BigInt)?);
            Some("TIMESTAMP ?".to_string())
        }
    })
}
