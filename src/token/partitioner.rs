//! Token encodings and ring arithmetic.
//!
//! Both encodings are rings: every computation is modular over the ring size,
//! so a range whose end is numerically below its start wraps around the
//! ring's origin.

use crate::error::{Error, QueryError, Result};
use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ring size of the 64-bit encoding.
const LONG_RING_SIZE: u128 = 1 << 64;

/// Ring size of the large-integer encoding.
const BIG_RING_SIZE: u128 = 1 << 127;

/// A position on the ring.
///
/// Tokens of one partitioner always share a variant; the derived ordering is
/// the numeric ordering of the underlying value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Token {
    /// 64-bit signed token.
    Long(i64),
    /// Large-integer token.
    Big(i128),
}

impl Token {
    /// Bind value used in range predicates.
    pub fn to_value(self) -> Value {
        match self {
            Token::Long(v) => Value::BigInt(v),
            Token::Big(v) => Value::Varint(v),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Long(v) => write!(f, "{}", v),
            Token::Big(v) => write!(f, "{}", v),
        }
    }
}

/// The scheme mapping partition keys onto the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Partitioner {
    /// 64-bit tokens over `[i64::MIN, i64::MAX]`, minimum `i64::MIN`.
    #[default]
    Murmur3,
    /// Large-integer tokens over `[0, 2^127)`, minimum sentinel `-1`.
    Random,
}

impl Partitioner {
    /// Resolve a partitioner from its server-side class name.
    pub fn from_class_name(name: &str) -> Result<Self> {
        match name.rsplit('.').next().unwrap_or(name) {
            "Murmur3Partitioner" => Ok(Partitioner::Murmur3),
            "RandomPartitioner" => Ok(Partitioner::Random),
            other => Err(Error::Topology(format!("unsupported partitioner: {}", other))),
        }
    }

    /// The minimum token, which is also the ring origin.
    pub fn min_token(&self) -> Token {
        match self {
            Partitioner::Murmur3 => Token::Long(i64::MIN),
            Partitioner::Random => Token::Big(-1),
        }
    }

    /// The largest token value.
    pub fn max_token(&self) -> Token {
        match self {
            Partitioner::Murmur3 => Token::Long(i64::MAX),
            Partitioner::Random => Token::Big(i128::MAX - 1),
        }
    }

    /// Number of distinct positions on the ring.
    pub fn ring_size(&self) -> u128 {
        match self {
            Partitioner::Murmur3 => LONG_RING_SIZE,
            Partitioner::Random => BIG_RING_SIZE,
        }
    }

    /// Offset of a token from zero, modulo the ring size.
    fn position(&self, token: Token) -> u128 {
        let raw = match token {
            Token::Long(v) => v as u64 as u128,
            Token::Big(v) => v as u128,
        };
        raw & (self.ring_size() - 1)
    }

    fn from_position(&self, position: u128) -> Token {
        let position = position & (self.ring_size() - 1);
        match self {
            Partitioner::Murmur3 => Token::Long(position as u64 as i64),
            // The last position is the minimum sentinel.
            Partitioner::Random if position == BIG_RING_SIZE - 1 => Token::Big(-1),
            Partitioner::Random => Token::Big(position as i128),
        }
    }

    /// Number of ring positions from `start` to `end`, walking forward.
    ///
    /// Equal tokens give zero; whether that means an empty range or the full
    /// ring is for the caller to decide.
    pub fn distance(&self, start: Token, end: Token) -> u128 {
        self.position(end)
            .wrapping_sub(self.position(start))
            & (self.ring_size() - 1)
    }

    /// Fraction of the ring covered walking forward from `start` to `end`.
    ///
    /// When `start == end` the result is `1.0` if `full_when_equal` is set and
    /// `0.0` otherwise.
    pub fn ring_fraction(&self, start: Token, end: Token, full_when_equal: bool) -> f64 {
        if start == end {
            return if full_when_equal { 1.0 } else { 0.0 };
        }
        self.distance(start, end) as f64 / self.ring_size() as f64
    }

    /// The token `offset` positions after `start`, wrapping at the ring end.
    pub fn token_at(&self, start: Token, offset: u128) -> Token {
        self.from_position(self.position(start).wrapping_add(offset))
    }

    /// Parse the string encoding used by system tables.
    pub fn token_from_string(&self, s: &str) -> Result<Token> {
        let s = s.trim();
        let parsed = match self {
            Partitioner::Murmur3 => s.parse::<i64>().map(Token::Long).ok(),
            Partitioner::Random => s
                .parse::<i128>()
                .ok()
                .filter(|v| *v >= -1)
                .map(Token::Big),
        };
        parsed.ok_or_else(|| {
            QueryError::Codec(format!("invalid {:?} token: {:?}", self, s)).into()
        })
    }

    /// Render a token in the string encoding used by system tables.
    pub fn token_to_string(&self, token: Token) -> String {
        token.to_string()
    }
}
