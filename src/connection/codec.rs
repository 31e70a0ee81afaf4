//! Value codecs.
//!
//! Codecs give the serialized size of values, which drives byte-budget
//! batching and throughput accounting, and encode partition key values into
//! routing keys.

use crate::error::{ConfigError, QueryError, Result};
use crate::types::{DataType, Value};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashSet;

/// Encoder for one data type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Codec {
    Boolean,
    Int,
    BigInt,
    Varint,
    Double,
    Text,
    Blob,
    Uuid,
    Timestamp,
    List(Box<Codec>),
}

impl Codec {
    /// The data type this codec handles.
    pub fn data_type(&self) -> DataType {
        match self {
            Codec::Boolean => DataType::Boolean,
            Codec::Int => DataType::Int,
            Codec::BigInt => DataType::BigInt,
            Codec::Varint => DataType::Varint,
            Codec::Double => DataType::Double,
            Codec::Text => DataType::Text,
            Codec::Blob => DataType::Blob,
            Codec::Uuid => DataType::Uuid,
            Codec::Timestamp => DataType::Timestamp,
            Codec::List(inner) => DataType::List(Box::new(inner.data_type())),
        }
    }

    /// Serialized size of `value` in bytes. Null and unset values are free.
    pub fn serialized_size(&self, value: &Value) -> Result<usize> {
        let size = match (self, value) {
            (_, Value::Null) | (_, Value::Unset) => 0,
            (Codec::Boolean, Value::Boolean(_)) => 1,
            (Codec::Int, Value::Int(_)) => 4,
            (Codec::BigInt, Value::BigInt(_)) | (Codec::Timestamp, Value::Timestamp(_)) => 8,
            (Codec::Varint, Value::Varint(v)) => varint_bytes(*v).len(),
            (Codec::Double, Value::Double(_)) => 8,
            (Codec::Text, Value::Text(s)) => s.len(),
            (Codec::Blob, Value::Blob(b)) => b.len(),
            (Codec::Uuid, Value::Uuid(_)) => 16,
            (Codec::List(inner), Value::List(items)) => {
                let mut total = 4;
                for item in items {
                    total += 4 + inner.serialized_size(item)?;
                }
                total
            }
            (codec, value) => return Err(mismatch(codec, value)),
        };
        Ok(size)
    }

    /// Append the serialized form of `value` to `buf`.
    pub fn encode(&self, value: &Value, buf: &mut BytesMut) -> Result<()> {
        match (self, value) {
            (_, Value::Null) | (_, Value::Unset) => {}
            (Codec::Boolean, Value::Boolean(v)) => buf.put_u8(u8::from(*v)),
            (Codec::Int, Value::Int(v)) => buf.put_i32(*v),
            (Codec::BigInt, Value::BigInt(v)) | (Codec::Timestamp, Value::Timestamp(v)) => {
                buf.put_i64(*v)
            }
            (Codec::Varint, Value::Varint(v)) => buf.put_slice(&varint_bytes(*v)),
            (Codec::Double, Value::Double(v)) => buf.put_f64(*v),
            (Codec::Text, Value::Text(s)) => buf.put_slice(s.as_bytes()),
            (Codec::Blob, Value::Blob(b)) => buf.put_slice(b),
            (Codec::Uuid, Value::Uuid(u)) => buf.put_slice(u.as_bytes()),
            (Codec::List(inner), Value::List(items)) => {
                buf.put_i32(items.len() as i32);
                for item in items {
                    let mut element = BytesMut::new();
                    inner.encode(item, &mut element)?;
                    buf.put_i32(element.len() as i32);
                    buf.put_slice(&element);
                }
            }
            (codec, value) => return Err(mismatch(codec, value)),
        }
        Ok(())
    }
}

fn mismatch(codec: &Codec, value: &Value) -> crate::error::Error {
    QueryError::Codec(format!(
        "cannot encode {:?} as {}",
        value,
        codec.data_type()
    ))
    .into()
}

/// Minimal two's complement big-endian encoding.
fn varint_bytes(v: i128) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

/// Resolves codecs for column types.
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    supported: HashSet<DataType>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self {
            supported: [
                DataType::Boolean,
                DataType::Int,
                DataType::BigInt,
                DataType::Varint,
                DataType::Double,
                DataType::Text,
                DataType::Blob,
                DataType::Uuid,
                DataType::Timestamp,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl CodecRegistry {
    /// A registry supporting every primitive type.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry without the given primitive type.
    pub fn without(mut self, data_type: &DataType) -> Self {
        self.supported.remove(data_type);
        self
    }

    /// Codec for a type; list codecs are derived from their element codec.
    pub fn codec_for(&self, data_type: &DataType) -> std::result::Result<Codec, ConfigError> {
        Ok(match data_type {
            DataType::List(inner) => Codec::List(Box::new(self.codec_for(inner)?)),
            other if !self.supported.contains(other) => {
                return Err(ConfigError::MissingCodec(other.to_string()));
            }
            DataType::Boolean => Codec::Boolean,
            DataType::Int => Codec::Int,
            DataType::BigInt => Codec::BigInt,
            DataType::Varint => Codec::Varint,
            DataType::Double => Codec::Double,
            DataType::Text => Codec::Text,
            DataType::Blob => Codec::Blob,
            DataType::Uuid => Codec::Uuid,
            DataType::Timestamp => Codec::Timestamp,
        })
    }

    /// Encode partition key components into a routing key.
    ///
    /// A single component is its serialized value. Several components use the
    /// composite layout: per component a big-endian u16 length, the bytes and
    /// a zero end-of-component byte.
    pub fn routing_key(&self, components: &[(&Codec, &Value)]) -> Result<Bytes> {
        for (_, value) in components {
            if matches!(value, Value::Null | Value::Unset) {
                return Err(QueryError::Invalid("partition key value is null".to_string()).into());
            }
        }

        if let [(codec, value)] = components {
            let mut buf = BytesMut::new();
            codec.encode(value, &mut buf)?;
            return Ok(buf.freeze());
        }

        let mut buf = BytesMut::new();
        for (codec, value) in components {
            let mut component = BytesMut::new();
            codec.encode(value, &mut component)?;
            let len = u16::try_from(component.len()).map_err(|_| {
                QueryError::Codec(format!(
                    "partition key component of {} bytes exceeds {} bytes",
                    component.len(),
                    u16::MAX
                ))
            })?;
            buf.put_u16(len);
            buf.put_slice(&component);
            buf.put_u8(0);
        }
        Ok(buf.freeze())
    }
}
