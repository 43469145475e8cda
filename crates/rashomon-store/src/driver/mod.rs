//! Driver contract — the prepared-statement executor the storage engine
//! consumes. The wire protocol to the actual wide-column store is an
//! external collaborator this module does not implement; it defines the
//! interface that collaborator must satisfy and ships two
//! implementations: an in-memory [`fake`] used throughout this crate's
//! own tests, and an optional [`scylla`] adapter for a real
//! Cassandra-family cluster.

pub mod fake;
#[cfg(feature = "scylla-driver")]
pub mod scylla;

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::Result;

/// A single stored row: column name -> value.
pub type Row = BTreeMap<String, serde_json::Value>;

/// Consistency levels accepted by the driver contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    One,
    All,
    LocalQuorum,
}

impl Default for Consistency {
    fn default() -> Self {
        Consistency::One
    }
}

/// A single parameterised statement, ready for execution.
#[derive(Debug, Clone)]
pub struct Statement {
    pub cql: String,
    pub params: Vec<serde_json::Value>,
}

impl Statement {
    pub fn new(cql: impl Into<String>, params: Vec<serde_json::Value>) -> Self {
        Statement {
            cql: cql.into(),
            params,
        }
    }
}

/// A batch of statements executed atomically at the coordinator level.
///
/// `timestamp` carries the store-side write timestamp (the batch's `_tid`,
/// as a v1-UUID-derived microsecond value) so repair writes and
/// re-insertions stay idempotent.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub statements: Vec<Statement>,
    pub timestamp: Option<i64>,
}

impl Batch {
    pub fn new() -> Self {
        Batch::default()
    }

    pub fn push(&mut self, statement: Statement) -> &mut Self {
        self.statements.push(statement);
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Options accompanying a single `execute`/`batch` call.
#[derive(Debug, Clone, Copy)]
pub struct ExecOptions {
    pub consistency: Consistency,
    pub prepared: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        ExecOptions {
            consistency: Consistency::default(),
            prepared: true,
        }
    }
}

/// Options accompanying a `stream` call.
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub consistency: Consistency,
    pub fetch_size: usize,
    pub auto_page: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        StreamOptions {
            consistency: Consistency::default(),
            fetch_size: 1000,
            auto_page: true,
        }
    }
}

/// The result of a non-streaming `execute`.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub rows: Vec<Row>,
}

/// A page cursor over a streamed query. Implementations page explicitly
/// rather than recursing per row.
#[async_trait]
pub trait RowStream: Send {
    /// Fetch the next page, up to `max_rows` rows. Returns an empty vec
    /// once the stream is exhausted.
    async fn next_page(&mut self, max_rows: usize) -> Result<Vec<Row>>;
}

/// The driver contract consumed by the query/index layers.
#[async_trait]
pub trait CqlDriver: Send + Sync {
    /// Execute a single statement and materialise all resulting rows.
    async fn execute(&self, statement: &Statement, opts: ExecOptions) -> Result<QueryResult>;

    /// Execute a batch of statements atomically at the coordinator.
    async fn batch(&self, batch: &Batch, opts: ExecOptions) -> Result<()>;

    /// Open a paginated stream over a query's results.
    async fn stream(
        &self,
        statement: &Statement,
        opts: StreamOptions,
    ) -> Result<Box<dyn RowStream>>;
}
