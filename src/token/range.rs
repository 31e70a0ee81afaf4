//! Token ranges owned by replica sets.

use super::partitioner::{Partitioner, Token};
use crate::types::{quote, Endpoint};
use std::collections::BTreeSet;
use std::fmt;

/// A half-open `[start, end)` interval of the ring and the replicas owning it.
///
/// `start == end` denotes the full ring: the topology never hands out empty
/// ranges. A range with `end <= start` wraps around the ring origin, except
/// when `end` is the minimum token, which stands for the end of the ring.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenRange {
    start: Token,
    end: Token,
    replicas: BTreeSet<Endpoint>,
}

impl TokenRange {
    /// Create a range owned by the given replicas.
    pub fn new(start: Token, end: Token, replicas: impl IntoIterator<Item = Endpoint>) -> Self {
        Self {
            start,
            end,
            replicas: replicas.into_iter().collect(),
        }
    }

    /// The range covering the whole ring.
    pub fn full_ring(partitioner: Partitioner, replicas: impl IntoIterator<Item = Endpoint>) -> Self {
        let min = partitioner.min_token();
        Self::new(min, min, replicas)
    }

    /// Get the inclusive start token.
    pub fn start(&self) -> Token {
        self.start
    }

    /// Get the exclusive end token.
    pub fn end(&self) -> Token {
        self.end
    }

    /// Replicas owning this range, sorted.
    pub fn replicas(&self) -> &BTreeSet<Endpoint> {
        &self.replicas
    }

    /// Whether this range covers the whole ring.
    pub fn is_full_ring(&self) -> bool {
        self.start == self.end
    }

    /// Whether this range crosses the ring origin.
    pub fn is_wrap_around(&self, partitioner: Partitioner) -> bool {
        self.end <= self.start && self.end != partitioner.min_token()
    }

    /// Number of ring positions covered.
    pub fn width(&self, partitioner: Partitioner) -> u128 {
        if self.is_full_ring() {
            partitioner.ring_size()
        } else {
            partitioner.distance(self.start, self.end)
        }
    }

    /// Fraction of the ring covered.
    pub fn ring_fraction(&self, partitioner: Partitioner) -> f64 {
        partitioner.ring_fraction(self.start, self.end, true)
    }

    /// Whether `token` falls inside this range.
    pub fn contains(&self, partitioner: Partitioner, token: Token) -> bool {
        if self.is_full_ring() {
            return true;
        }
        partitioner.distance(self.start, token) < partitioner.distance(self.start, self.end)
    }

    /// Divide into up to `pieces` contiguous sub-ranges of near-equal width.
    ///
    /// Sub-ranges keep this range's replicas. A range narrower than `pieces`
    /// positions yields one sub-range per position.
    pub fn split(&self, partitioner: Partitioner, pieces: usize) -> Vec<TokenRange> {
        let width = self.width(partitioner);
        let pieces = (pieces.max(1) as u128).min(width.max(1));
        if pieces == 1 {
            return vec![self.clone()];
        }

        // width * i / pieces without overflowing u128.
        let (step, rem) = (width / pieces, width % pieces);
        let boundary = |i: u128| -> Token {
            partitioner.token_at(self.start, step * i + rem * i / pieces)
        };

        (0..pieces)
            .map(|i| {
                let end = if i + 1 == pieces { self.end } else { boundary(i + 1) };
                TokenRange::new(boundary(i), end, self.replicas.iter().copied())
            })
            .collect()
    }

    /// Token predicates selecting exactly this range from a table.
    ///
    /// Each predicate becomes one statement. Wrap-around ranges need two
    /// statements; a full ring starting at the minimum token needs none.
    pub fn predicates(&self, partitioner: Partitioner, partition_key: &[&str]) -> Vec<RangePredicate> {
        let token_fn = format!(
            "token({})",
            partition_key.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
        );
        let min = partitioner.min_token();
        let lower = |t: Token| RangePredicate {
            clause: format!("{} >= ?", token_fn),
            bounds: vec![t],
        };
        let upper = |t: Token| RangePredicate {
            clause: format!("{} < ?", token_fn),
            bounds: vec![t],
        };

        if self.is_full_ring() {
            return if self.start == min {
                vec![RangePredicate::unbounded()]
            } else {
                vec![lower(self.start), upper(self.end)]
            };
        }
        if self.end == min {
            return vec![lower(self.start)];
        }
        if self.start == min {
            return vec![upper(self.end)];
        }
        if self.end < self.start {
            return vec![lower(self.start), upper(self.end)];
        }
        vec![RangePredicate {
            clause: format!("{} >= ? AND {} < ?", token_fn, token_fn),
            bounds: vec![self.start, self.end],
        }]
    }
}

impl fmt::Display for TokenRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A `WHERE` clause over the partition key token and its bound tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangePredicate {
    /// Clause text; empty when the whole table is selected.
    pub clause: String,
    /// Tokens bound to the clause's markers, in order.
    pub bounds: Vec<Token>,
}

impl RangePredicate {
    fn unbounded() -> Self {
        Self {
            clause: String::new(),
            bounds: Vec::new(),
        }
    }

    /// Whether the predicate restricts anything.
    pub fn is_unbounded(&self) -> bool {
        self.clause.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u8) -> Endpoint {
        format!("127.0.0.{}:9042", n).parse().unwrap()
    }

    #[test]
    fn test_contains_wrap_around() {
        let p = Partitioner::Murmur3;
        let range = TokenRange::new(Token::Long(100), Token::Long(-100), [node(1)]);
        assert!(range.is_wrap_around(p));
        assert!(range.contains(p, Token::Long(100)));
        assert!(range.contains(p, Token::Long(i64::MAX)));
        assert!(range.contains(p, Token::Long(i64::MIN)));
        assert!(!range.contains(p, Token::Long(-100)));
        assert!(!range.contains(p, Token::Long(0)));
    }

    #[test]
    fn test_range_ending_at_min_does_not_wrap() {
        let p = Partitioner::Murmur3;
        let range = TokenRange::new(Token::Long(0), p.min_token(), [node(1)]);
        assert!(!range.is_wrap_around(p));
        assert_eq!(range.ring_fraction(p), 0.5);
    }

    #[test]
    fn test_split_covers_range_exactly() {
        let p = Partitioner::Murmur3;
        let range = TokenRange::new(Token::Long(1000), Token::Long(-1000), [node(1), node(2)]);
        let pieces = range.split(p, 7);

        assert_eq!(pieces.len(), 7);
        assert_eq!(pieces[0].start(), range.start());
        assert_eq!(pieces[6].end(), range.end());
        for pair in pieces.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start());
        }
        let total: u128 = pieces.iter().map(|r| r.width(p)).sum();
        assert_eq!(total, range.width(p));
        assert!(pieces.iter().all(|r| r.replicas() == range.replicas()));
    }

    #[test]
    fn test_split_full_ring() {
        let p = Partitioner::Random;
        let pieces = TokenRange::full_ring(p, [node(1)]).split(p, 4);
        assert_eq!(pieces.len(), 4);
        let fractions: Vec<f64> = pieces.iter().map(|r| r.ring_fraction(p)).collect();
        assert!(fractions.iter().all(|f| (f - 0.25).abs() < 1e-12));
    }

    #[test]
    fn test_split_narrow_range() {
        let p = Partitioner::Murmur3;
        let range = TokenRange::new(Token::Long(0), Token::Long(3), [node(1)]);
        assert_eq!(range.split(p, 10).len(), 3);
    }

    #[test]
    fn test_predicates() {
        let p = Partitioner::Murmur3;
        let min = p.min_token();

        let inner = TokenRange::new(Token::Long(-5), Token::Long(5), [node(1)]);
        let preds = inner.predicates(p, &["id"]);
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].clause, "token(\"id\") >= ? AND token(\"id\") < ?");
        assert_eq!(preds[0].bounds, vec![Token::Long(-5), Token::Long(5)]);

        let wrapping = TokenRange::new(Token::Long(5), Token::Long(-5), [node(1)]);
        assert_eq!(wrapping.predicates(p, &["a", "b"]).len(), 2);

        let from_min = TokenRange::new(min, Token::Long(0), [node(1)]);
        let preds = from_min.predicates(p, &["id"]);
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].clause, "token(\"id\") < ?");

        let to_end = TokenRange::new(Token::Long(0), min, [node(1)]);
        assert_eq!(to_end.predicates(p, &["id"])[0].clause, "token(\"id\") >= ?");

        let full = TokenRange::full_ring(p, [node(1)]);
        assert!(full.predicates(p, &["id"])[0].is_unbounded());
    }
}
