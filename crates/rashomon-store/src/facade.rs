//! Storage Engine Facade — the top-level entry points.
//!
//! `StorageEngine` owns the driver handle and a single-flight schema cache
//! keyed by derived keyspace name. It is cheap to `Clone` (internally
//! `Arc`-wrapped) and safe to share across concurrent request handlers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::driver::{Consistency, CqlDriver, ExecOptions, QueryResult, Row};
use crate::error::{Result, StoreError};
use crate::index;
use crate::names;
use crate::query;
use crate::schema::{Order, TableSchema};
use crate::tid;

/// `put`'s conditional-write clause.
#[derive(Debug, Clone)]
pub enum PutCondition {
    /// `if: 'not exists'` — an `IF NOT EXISTS` lightweight transaction.
    NotExists,
    /// An arbitrary predicate compiled into `IF <cond>`.
    Predicate(BTreeMap<String, JsonValue>),
}

/// The column selection for a `get`: `*` by default, a single named
/// column, or an explicit comma-joined list.
#[derive(Debug, Clone)]
pub enum Proj {
    All,
    One(String),
    Many(Vec<String>),
}

impl Default for Proj {
    fn default() -> Self {
        Proj::All
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetRequest {
    pub table: String,
    /// Name of a secondary index to read through, or `None` for `data`.
    pub index: Option<String>,
    pub attributes: BTreeMap<String, JsonValue>,
    pub proj: Proj,
    pub order: Option<Order>,
    pub limit: Option<usize>,
    pub consistency: Consistency,
}

#[derive(Debug, Clone, Default)]
pub struct PutRequest {
    pub table: String,
    pub attributes: BTreeMap<String, JsonValue>,
    pub if_condition: Option<PutCondition>,
    pub consistency: Consistency,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteRequest {
    pub table: String,
    pub primary_key: BTreeMap<String, JsonValue>,
    pub consistency: Consistency,
}

#[derive(Debug, Clone)]
pub struct GetResult {
    pub count: usize,
    pub items: Vec<Row>,
}

/// Outcome of a `put`, distinguishing a normal write from a failed
/// lightweight-transaction condition — not treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    ConditionFailed,
}

const DEFAULT_GET_LIMIT: usize = 1000;

/// The default consistency default impl is required by `GetRequest` etc;
/// `Consistency` already derives one (`One`) in `driver::mod`.
type SchemaCell = Arc<OnceCell<Arc<TableSchema>>>;

/// Top-level storage engine handle. Clone freely; clones share the same
/// driver and schema cache.
#[derive(Clone)]
pub struct StorageEngine {
    driver: Arc<dyn CqlDriver>,
    schema_cache: Arc<Mutex<HashMap<String, SchemaCell>>>,
}

impl StorageEngine {
    /// Wrap an already-connected driver. Used directly by tests against
    /// [`crate::driver::fake::FakeCqlDriver`]; production callers typically
    /// go through [`bootstrap`].
    pub fn new(driver: Arc<dyn CqlDriver>) -> Self {
        StorageEngine {
            driver,
            schema_cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Single-flight schema load: concurrent first-accessors for the
    /// same keyspace await the same
    /// `OnceCell` future rather than issuing duplicate `meta` reads, and the
    /// map lock is only held long enough to obtain/insert the cell.
    async fn load_schema(&self, keyspace: &str) -> Result<Arc<TableSchema>> {
        let cell = {
            let mut cache = self.schema_cache.lock().await;
            cache
                .entry(keyspace.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let schema = cell
            .get_or_try_init(|| async {
                debug!(keyspace, "schema cache miss, reading meta");
                let stmt = query::get_schema_meta(keyspace);
                let result = self.driver.execute(&stmt, ExecOptions::default()).await?;
                let row = result
                    .rows
                    .into_iter()
                    .next()
                    .ok_or_else(|| StoreError::NotFound(format!("schema not found for keyspace '{keyspace}'")))?;
                let raw = row
                    .get("value")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| StoreError::NotFound(format!("schema not found for keyspace '{keyspace}'")))?;
                Ok::<Arc<TableSchema>, StoreError>(Arc::new(TableSchema::from_meta_json(raw)?))
            })
            .await?;

        Ok(schema.clone())
    }

    /// `createTable(domain, schema)`: derive the keyspace, emit keyspace +
    /// `data`/`meta`/per-index table DDL, write the schema's own JSON
    /// encoding into `meta`, and warm the schema cache.
    ///
    /// Not atomic across its three kinds of statement with respect to a
    /// concurrent `createTable` for the same table — callers that need
    /// that guarantee must serialize `createTable` themselves.
    #[instrument(skip(self, schema), fields(domain, table = %schema.table))]
    pub async fn create_table(&self, domain: &str, schema: &TableSchema) -> Result<()> {
        let normalized = schema.normalized()?;
        let keyspace = names::keyspace_name(domain, &normalized.table);

        self.driver
            .execute(&query::create_keyspace(&keyspace, &normalized), ExecOptions::default())
            .await?;
        for stmt in query::create_table(&keyspace, &normalized) {
            self.driver.execute(&stmt, ExecOptions::default()).await?;
        }
        self.driver
            .execute(&query::put_schema_meta(&keyspace, &normalized)?, ExecOptions::default())
            .await?;

        let cell = OnceCell::new();
        let _ = cell.set(Arc::new(normalized));
        self.schema_cache
            .lock()
            .await
            .insert(keyspace.clone(), Arc::new(cell));

        info!(keyspace = %keyspace, "table created");
        Ok(())
    }

    /// `getSchema(domain, table)`.
    #[instrument(skip(self))]
    pub async fn get_schema(&self, domain: &str, table: &str) -> Result<TableSchema> {
        let keyspace = names::keyspace_name(domain, table);
        let schema = self.load_schema(&keyspace).await?;
        Ok((*schema).clone())
    }

    /// `dropTable(domain, table)`: `DROP KEYSPACE` and evict the cache
    /// entry so a subsequent `getSchema` observes `NotFound` rather than a
    /// stale cached value.
    #[instrument(skip(self))]
    pub async fn drop_table(&self, domain: &str, table: &str) -> Result<()> {
        let keyspace = names::keyspace_name(domain, table);
        self.driver
            .execute(&query::drop_table(&keyspace), ExecOptions::default())
            .await?;
        self.schema_cache.lock().await.remove(&keyspace);
        info!(keyspace = %keyspace, "table dropped");
        Ok(())
    }

    /// `get(domain, req)`.
    #[instrument(skip(self, req), fields(domain, table = %req.table, index = req.index.as_deref().unwrap_or("-")))]
    pub async fn get(&self, domain: &str, req: GetRequest) -> Result<GetResult> {
        let keyspace = names::keyspace_name(domain, &req.table);
        let schema = self.load_schema(&keyspace).await?;
        let limit = req.limit.unwrap_or(DEFAULT_GET_LIMIT);

        let rows = match &req.index {
            Some(index_name) => {
                let as_of_tid = as_of_tid_from_predicate(&schema, &req.attributes);
                index::get_via_index(
                    self.driver.as_ref(),
                    &keyspace,
                    &schema,
                    index_name,
                    req.attributes,
                    limit,
                    as_of_tid,
                )
                .await?
            }
            None => {
                let primary_key_attrs = schema.primary_key_attributes();
                for attr in req.attributes.keys() {
                    if !primary_key_attrs.contains(attr) {
                        return Err(StoreError::InvalidQuery(format!(
                            "attribute '{attr}' is not a primary-key attribute on a non-index read"
                        )));
                    }
                }
                let stmt = query::get(&keyspace, &schema, req.attributes, &req.proj, req.order, Some(limit))?;
                let opts = ExecOptions {
                    consistency: req.consistency,
                    ..ExecOptions::default()
                };
                self.driver.execute(&stmt, opts).await?.rows
            }
        };

        Ok(GetResult {
            count: rows.len(),
            items: rows,
        })
    }

    /// `put(domain, req)`.
    #[instrument(skip(self, req), fields(domain, table = %req.table))]
    pub async fn put(&self, domain: &str, req: PutRequest) -> Result<PutOutcome> {
        let keyspace = names::keyspace_name(domain, &req.table);
        let schema = self.load_schema(&keyspace).await?;

        let mut attributes = req.attributes;
        let tid = ensure_tid(&schema, &mut attributes)?;

        for attr in schema.primary_key_attributes() {
            if !attributes.contains_key(&attr) {
                return Err(StoreError::InvalidQuery(format!(
                    "put missing primary-key attribute '{attr}'"
                )));
            }
        }

        let if_not_exists = matches!(req.if_condition, Some(PutCondition::NotExists));
        let pk_attrs = schema.primary_key_attributes();
        let has_non_key_attrs = attributes.keys().any(|a| !pk_attrs.contains(a));
        let opts = ExecOptions {
            consistency: req.consistency,
            ..ExecOptions::default()
        };

        let applied = if !schema.secondary_indexes.is_empty() {
            // The driver contract's `batch()` returns no rows, so a
            // conditional write against an indexed schema cannot observe
            // `[applied]` here; it is treated as applied and any actual
            // conflict surfaces as a no-op overwrite at the driver's own LWW
            // layer instead of `ConditionFailed`. Unconditional and
            // not-indexed conditional writes do not have this gap.
            let batch = index::write_batch(&keyspace, &schema, &attributes, tid, if_not_exists);
            self.driver.batch(&batch, opts).await?;
            true
        } else if if_not_exists || !has_non_key_attrs {
            let stmt = query::put(&keyspace, &attributes, if_not_exists);
            let result = self.driver.execute(&stmt, opts).await?;
            applied_flag(&result, if_not_exists)
        } else {
            let if_predicate = match req.if_condition {
                Some(PutCondition::Predicate(p)) => Some(p),
                _ => None,
            };
            let conditional = if_predicate.is_some();
            let stmt = query::update(&keyspace, &schema, &attributes, if_predicate)?;
            let result = self.driver.execute(&stmt, opts).await?;
            applied_flag(&result, conditional)
        };

        if !applied {
            return Ok(PutOutcome::ConditionFailed);
        }

        if !schema.secondary_indexes.is_empty() {
            let driver = self.driver.clone();
            let keyspace = keyspace.clone();
            let schema = schema.clone();
            let primary_key: BTreeMap<String, JsonValue> = schema
                .primary_key_attributes()
                .into_iter()
                .filter_map(|attr| attributes.get(&attr).map(|v| (attr, v.clone())))
                .collect();
            let attribute_to_indexes = index::attribute_index_map(&schema);
            tokio::spawn(async move {
                index::repair_pass(driver.as_ref(), &keyspace, &schema, &attribute_to_indexes, &primary_key, tid).await;
            });
        }

        Ok(PutOutcome::Created)
    }

    /// `delete(domain, req)`: unconditional partition delete by primary
    /// key. There is no delete-by-arbitrary-predicate path.
    #[instrument(skip(self, req), fields(domain, table = %req.table))]
    pub async fn delete(&self, domain: &str, req: DeleteRequest) -> Result<()> {
        let keyspace = names::keyspace_name(domain, &req.table);
        let _schema = self.load_schema(&keyspace).await?;
        let stmt = query::delete(&keyspace, &req.primary_key)?;
        let opts = ExecOptions {
            consistency: req.consistency,
            ..ExecOptions::default()
        };
        self.driver.execute(&stmt, opts).await?;
        Ok(())
    }
}

/// Ensure `attributes` carries a `_tid`/tid-role value: honor a
/// caller-supplied one (used by conditional/explicit-revision writes),
/// otherwise synthesize a fresh v1 UUID.
fn ensure_tid(schema: &TableSchema, attributes: &mut BTreeMap<String, JsonValue>) -> Result<Uuid> {
    let attr = schema.tid_attribute();
    match attributes.get(attr) {
        Some(raw) => tid::parse_tid(raw),
        None => {
            let fresh = tid::new_tid();
            attributes.insert(attr.to_string(), JsonValue::String(fresh.to_string()));
            Ok(fresh)
        }
    }
}

fn applied_flag(result: &QueryResult, conditional: bool) -> bool {
    if !conditional {
        return true;
    }
    result
        .rows
        .first()
        .and_then(|row| row.get("[applied]"))
        .and_then(|v| v.as_bool())
        .unwrap_or(true)
}

/// Extract the read-repair cutoff `_tid` from a `get` request's predicate on
/// the tid-role attribute, whether supplied as a bare scalar or an operator
/// object (`{le: T}`, `{eq: T}`, ...).
fn as_of_tid_from_predicate(schema: &TableSchema, raw_predicate: &BTreeMap<String, JsonValue>) -> Option<Uuid> {
    let value = raw_predicate.get(schema.tid_attribute())?;
    let candidate = match value {
        JsonValue::Object(map) => map.values().next()?.clone(),
        other => other.clone(),
    };
    tid::parse_tid(&candidate).ok()
}

/// Connect to a live cluster, retrying every 500ms on failure and logging
/// success exactly once. Gated behind `scylla-driver` since there is
/// nothing to connect to otherwise.
#[cfg(feature = "scylla-driver")]
pub async fn bootstrap(config: &crate::config::StoreConfig) -> StorageEngine {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        match crate::driver::scylla::ScyllaCqlDriver::connect(&config.contact_points).await {
            Ok(driver) => {
                info!(attempt, "connected to cluster");
                return StorageEngine::new(Arc::new(driver));
            }
            Err(err) => {
                warn!(attempt, error = %err, "connect failed, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(config.reconnect_interval_ms)).await;
            }
        }
    }
}
