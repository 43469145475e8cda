//! Adapter onto a real Cassandra-family cluster via the `scylla` driver
//! crate. Feature-gated behind `scylla-driver` and, unlike [`super::fake`],
//! not exercised by this crate's test suite — there is no live cluster in
//! CI. Kept thin: translate [`Statement`]/[`Batch`] into the driver's own
//! types and let it own prepared-statement caching, retries, and the wire
//! protocol.

use async_trait::async_trait;
use scylla::frame::value::ValueList;
use scylla::transport::session::Session;
use scylla::QueryResult as ScyllaQueryResult;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::error::{Result, StoreError};

use super::{Batch, Consistency, CqlDriver, ExecOptions, QueryResult, Row, RowStream, Statement, StreamOptions};

fn to_scylla_consistency(c: Consistency) -> scylla::frame::types::Consistency {
    match c {
        Consistency::One => scylla::frame::types::Consistency::One,
        Consistency::All => scylla::frame::types::Consistency::All,
        Consistency::LocalQuorum => scylla::frame::types::Consistency::LocalQuorum,
    }
}

/// A JSON value wrapped so it satisfies `scylla`'s `ValueList` bound by
/// serialising through its own CQL value encoding for the handful of
/// scalar types this store's schema model ever binds.
struct JsonParams<'a>(&'a [JsonValue]);

impl ValueList for JsonParams<'_> {
    fn serialized(
        &self,
    ) -> std::result::Result<scylla::frame::value::SerializedValues, scylla::frame::value::SerializeValuesError> {
        let mut values = scylla::frame::value::SerializedValues::new();
        for param in self.0 {
            match param {
                JsonValue::Null => values.add_value(&None::<i32>)?,
                JsonValue::Bool(b) => values.add_value(b)?,
                JsonValue::Number(n) if n.is_i64() => values.add_value(&n.as_i64().unwrap())?,
                JsonValue::Number(n) => values.add_value(&n.as_f64().unwrap())?,
                JsonValue::String(s) => values.add_value(s)?,
                other => values.add_value(&other.to_string())?,
            }
        }
        Ok(values)
    }
}

fn scylla_row_to_row(row: scylla::frame::response::result::Row, column_names: &[String]) -> Row {
    let mut out = Row::new();
    for (name, column) in column_names.iter().zip(row.columns.into_iter()) {
        let value = match column {
            Some(scylla::frame::response::result::CqlValue::Text(s)) => JsonValue::String(s),
            Some(scylla::frame::response::result::CqlValue::Boolean(b)) => JsonValue::Bool(b),
            Some(scylla::frame::response::result::CqlValue::BigInt(i)) => JsonValue::from(i),
            Some(scylla::frame::response::result::CqlValue::Int(i)) => JsonValue::from(i),
            Some(other) => JsonValue::String(format!("{other:?}")),
            None => JsonValue::Null,
        };
        out.insert(name.clone(), value);
    }
    out
}

fn result_to_rows(result: ScyllaQueryResult) -> Result<Vec<Row>> {
    let column_names: Vec<String> = result
        .col_specs
        .iter()
        .map(|spec| spec.name.clone())
        .collect();
    let rows = result
        .rows
        .unwrap_or_default()
        .into_iter()
        .map(|r| scylla_row_to_row(r, &column_names))
        .collect();
    Ok(rows)
}

/// Thin wrapper over a live [`scylla::Session`].
pub struct ScyllaCqlDriver {
    session: Arc<Session>,
}

impl ScyllaCqlDriver {
    /// Connect to the given contact points. Retries and cluster topology
    /// refresh are the driver's own job; the reconnect loop this crate
    /// layers on top only governs *our* bootstrap.
    pub async fn connect(known_nodes: &[String]) -> Result<Self> {
        let session = scylla::SessionBuilder::new()
            .known_nodes(known_nodes)
            .build()
            .await
            .map_err(|e| StoreError::Transient(format!("scylla session build failed: {e}")))?;
        Ok(ScyllaCqlDriver {
            session: Arc::new(session),
        })
    }
}

#[async_trait]
impl CqlDriver for ScyllaCqlDriver {
    async fn execute(&self, statement: &Statement, opts: ExecOptions) -> Result<QueryResult> {
        let mut query = scylla::query::Query::new(statement.cql.clone());
        query.set_consistency(to_scylla_consistency(opts.consistency));
        let result = self
            .session
            .query(query, JsonParams(&statement.params))
            .await
            .map_err(|e| StoreError::Transient(format!("scylla query failed: {e}")))?;
        Ok(QueryResult {
            rows: result_to_rows(result)?,
        })
    }

    async fn batch(&self, batch: &Batch, opts: ExecOptions) -> Result<()> {
        let mut scylla_batch = scylla::batch::Batch::new(scylla::batch::BatchType::Logged);
        scylla_batch.set_consistency(to_scylla_consistency(opts.consistency));
        if let Some(ts) = batch.timestamp {
            scylla_batch.set_timestamp(Some(ts));
        }
        let mut values = Vec::with_capacity(batch.statements.len());
        for statement in &batch.statements {
            scylla_batch.append_statement(statement.cql.as_str());
            values.push(statement.params.clone());
        }
        let bound: Vec<JsonParams> = values.iter().map(|v| JsonParams(v.as_slice())).collect();
        self.session
            .batch(&scylla_batch, bound)
            .await
            .map_err(|e| StoreError::Transient(format!("scylla batch failed: {e}")))?;
        Ok(())
    }

    async fn stream(
        &self,
        statement: &Statement,
        opts: StreamOptions,
    ) -> Result<Box<dyn RowStream>> {
        let mut query = scylla::query::Query::new(statement.cql.clone());
        query.set_consistency(to_scylla_consistency(opts.consistency));
        query.set_page_size(opts.fetch_size as i32);
        let result = self
            .session
            .query(query, JsonParams(&statement.params))
            .await
            .map_err(|e| StoreError::Transient(format!("scylla query failed: {e}")))?;
        Ok(Box::new(MaterializedStream {
            rows: result_to_rows(result)?,
            cursor: 0,
        }))
    }
}

/// `scylla`'s native paging iterator doesn't implement `Send` the way this
/// trait needs across an `async_trait` boundary in every driver version
/// this crate has been tested against, so the first page is materialised
/// eagerly and paged out of that buffer. Untested against a live cluster;
/// revisit if `fetch_size` ever needs to bound memory rather than just
/// request batching.
struct MaterializedStream {
    rows: Vec<Row>,
    cursor: usize,
}

#[async_trait]
impl RowStream for MaterializedStream {
    async fn next_page(&mut self, max_rows: usize) -> Result<Vec<Row>> {
        let end = (self.cursor + max_rows).min(self.rows.len());
        let page = self.rows[self.cursor..end].to_vec();
        self.cursor = end;
        Ok(page)
    }
}
