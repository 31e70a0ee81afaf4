//! Connection capability.
//!
//! The connector core never talks to the network itself. It is handed a
//! [`Connector`] that opens sessions, resolves codecs and describes the ring
//! topology; everything above this module is written against these traits.

mod codec;
mod statement;

pub use codec::{Codec, CodecRegistry};
pub use statement::{BatchStatement, ColumnSpec, QueryStatement, ResultPage, Statement};

use crate::error::Result;
use crate::token::{Partitioner, Token, TokenRange};
use crate::types::Endpoint;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Source of sessions for one cluster.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Open a session. The caller owns it and must close it.
    async fn open_session(&self) -> Result<Arc<dyn Session>>;

    /// Codecs for the cluster's column types.
    fn codec_registry(&self) -> &CodecRegistry;

    /// Current ring topology.
    fn topology(&self) -> Arc<dyn Topology>;
}

/// An open session.
#[async_trait::async_trait]
pub trait Session: Send + Sync + std::fmt::Debug {
    /// Execute a statement and return its first (or only) page.
    ///
    /// Further pages are requested by re-executing the statement with the
    /// returned paging state.
    async fn execute(&self, statement: &Statement) -> Result<ResultPage>;

    /// Release the session.
    fn close(&self) -> Result<()>;
}

/// Ring topology of a cluster.
pub trait Topology: Send + Sync + std::fmt::Debug {
    /// Partitioner used by the cluster.
    fn partitioner(&self) -> Partitioner;

    /// Ranges of the ring with the replicas owning them in `keyspace`.
    ///
    /// The ranges cover the whole ring exactly once.
    fn token_ranges(&self, keyspace: &str) -> Vec<TokenRange>;

    /// Token of a serialized partition key.
    fn token_for(&self, routing_key: &Bytes) -> Token;

    /// Replicas owning `token` in `keyspace`.
    fn replicas(&self, keyspace: &str, token: Token) -> BTreeSet<Endpoint>;
}
