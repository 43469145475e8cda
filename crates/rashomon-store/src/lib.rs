//! Rashomon-Store: Versioned Wide-Column Table Storage
//!
//! This crate provides the storage engine for Rashomon, a multi-tenant
//! revisioned-blob service backed by a Cassandra-family wide-column store.
//! It owns schema translation, keyspace/table name derivation, query
//! compilation, and the maintenance of read-repaired versioned secondary
//! indexes. Routing an HTTP request to these calls, and the wire protocol
//! to an actual cluster, are external collaborators (see [`driver`]).
//!
//! ## Key Components
//!
//! - [`facade::StorageEngine`]: the top-level entry point — `createTable`,
//!   `getSchema`, `get`, `put`, `delete`, `dropTable`.
//! - [`bucket::KvBucket`] / [`bucket::RevisionedKvBucket`]: thin
//!   schema-pre-declared wrappers over the facade for the two canonical
//!   bucket kinds.
//! - [`schema::TableSchema`]: the declarative table shape, including the
//!   synthetic `_tid`/`_deleted` augmentation versioned indexes require.
//! - [`driver::CqlDriver`]: the prepared-statement executor contract, with
//!   an in-memory [`driver::fake::FakeCqlDriver`] for tests and an optional
//!   [`driver::scylla::ScyllaCqlDriver`] adapter.

pub mod bucket;
pub mod config;
pub mod ddl;
pub mod driver;
pub mod error;
pub mod facade;
pub mod index;
pub mod names;
pub mod predicate;
pub mod query;
pub mod schema;
pub mod tid;

pub use bucket::{KvBucket, RevisionedKvBucket};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use facade::{DeleteRequest, GetRequest, GetResult, Proj, PutCondition, PutOutcome, PutRequest, StorageEngine};
pub use schema::TableSchema;
