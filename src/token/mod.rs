//! Token ring model.
//!
//! The store places every partition key on a ring of tokens. The ring is cut
//! into ranges, each owned by a set of replicas:
//!
//! ```text
//!            min token
//!          ┌────●────┐
//!     [t3, min)     [min, t1)   replicas {A, B}
//!        │             │
//!        ●  t3     t1  ●
//!        │             │
//!     [t2, t3)      [t1, t2)    replicas {B, C}
//!          └────●────┘
//!               t2
//! ```
//!
//! [`Partitioner`] carries the encoding of tokens and the modular arithmetic
//! over the ring; [`TokenRange`] is one owned interval.

mod partitioner;
mod range;

pub use partitioner::{Partitioner, Token};
pub use range::{RangePredicate, TokenRange};
