//! Index Maintainer — maintains versioned secondary-index tables on
//! write, reconciles them via sibling-revision diffing, and performs
//! read-repair on query.
//!
//! An index row's lifecycle has exactly two states:
//!
//! ```text
//! live (_deleted = null) --[repair pass sees a changed indexed value]--> tombstoned (_deleted = new _tid)
//! ```
//!
//! `tombstoned -> live` only happens via a full index rebuild from `data`,
//! which this crate does not implement online.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value as JsonValue;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::ddl;
use crate::driver::{Batch, CqlDriver, ExecOptions, Row, Statement, StreamOptions};
use crate::error::Result;
use crate::names::quote_identifier;
use crate::predicate::{self, PredicateValue};
use crate::query;
use crate::schema::{Order, SecondaryIndexElementKind, TableSchema, DELETED_ATTRIBUTE};
use crate::tid;

/// A secondary index's schema once expanded against its owning primary
/// schema: the index's own hash/range columns, the
/// primary key's trailing attributes appended where not already present
/// (always including the `_tid` tail, since normalization guarantees the
/// primary schema has one whenever a secondary index exists), and any
/// `proj`-ed non-key attributes.
#[derive(Debug, Clone)]
pub struct ExpandedIndex {
    pub name: String,
    pub hash: String,
    pub range: Vec<(String, Order)>,
    pub proj: Vec<String>,
}

impl ExpandedIndex {
    pub fn compute(schema: &TableSchema, index_name: &str) -> Option<Self> {
        let elements = schema.secondary_indexes.get(index_name)?;

        let hash = elements
            .iter()
            .find(|e| e.kind == SecondaryIndexElementKind::Hash)
            .map(|e| e.attribute.clone())?;

        let mut range: Vec<(String, Order)> = elements
            .iter()
            .filter(|e| e.kind == SecondaryIndexElementKind::Range)
            .map(|e| (e.attribute.clone(), e.order.unwrap_or(Order::Asc)))
            .collect();

        let proj: Vec<String> = elements
            .iter()
            .filter(|e| e.kind == SecondaryIndexElementKind::Proj)
            .map(|e| e.attribute.clone())
            .collect();

        let mut present: Vec<String> = std::iter::once(hash.clone())
            .chain(range.iter().map(|(a, _)| a.clone()))
            .chain(proj.iter().cloned())
            .collect();

        for pk_attr in schema.primary_key_attributes() {
            if present.contains(&pk_attr) {
                continue;
            }
            let order = schema
                .range_attributes()
                .iter()
                .find(|e| e.attribute == pk_attr)
                .and_then(|e| e.order)
                .unwrap_or(Order::Asc);
            present.push(pk_attr.clone());
            range.push((pk_attr, order));
        }

        Some(ExpandedIndex {
            name: index_name.to_string(),
            hash,
            range,
            proj,
        })
    }

    /// The hash+range attributes that identify an index row.
    pub fn index_attributes(&self) -> Vec<String> {
        std::iter::once(self.hash.clone())
            .chain(self.range.iter().map(|(a, _)| a.clone()))
            .collect()
    }

    pub fn all_attributes(&self) -> Vec<String> {
        self.index_attributes()
            .into_iter()
            .chain(self.proj.iter().cloned())
            .collect()
    }

    fn table_name(&self) -> String {
        ddl::secondary_index_table_name(&self.name)
    }
}

/// Precomputed `attribute -> [indexName]` map for a schema's secondary
/// indexes, used to find which indexes need repairing when a given
/// attribute's value changes between sibling revisions.
pub fn attribute_index_map(schema: &TableSchema) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for name in schema.secondary_indexes.keys() {
        if let Some(expanded) = ExpandedIndex::compute(schema, name) {
            for attr in expanded.all_attributes() {
                map.entry(attr).or_default().push(name.clone());
            }
        }
    }
    map
}

/// Build the batch of statements a `put` issues when the schema has
/// secondary indexes: one index-row insert per secondary index, followed
/// by the data-table insert, all sharing the write's `_tid` as the batch
/// timestamp.
pub fn write_batch(
    keyspace: &str,
    schema: &TableSchema,
    attributes: &BTreeMap<String, JsonValue>,
    tid: Uuid,
    if_not_exists: bool,
) -> Batch {
    let mut batch = Batch::new();

    for name in schema.secondary_indexes.keys() {
        if let Some(expanded) = ExpandedIndex::compute(schema, name) {
            let mut index_row = BTreeMap::new();
            for attr in expanded.all_attributes() {
                if let Some(value) = attributes.get(&attr) {
                    index_row.insert(attr, value.clone());
                }
            }
            batch.push(query::put_into(keyspace, &expanded.table_name(), &index_row, false));
        }
    }

    batch.push(query::put(keyspace, attributes, if_not_exists));
    batch.timestamp = Some(tid::timestamp_micros(tid));
    batch
}

fn select_statement(
    keyspace: &str,
    table: &str,
    predicate: &[(String, PredicateValue)],
    order: Option<(&str, Order)>,
    limit: Option<usize>,
) -> Result<Statement> {
    let compiled = predicate::compile(predicate)?;
    let where_clause = if compiled.fragment.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", compiled.fragment)
    };
    let order_clause = order
        .map(|(col, dir)| {
            format!(
                " ORDER BY {} {}",
                quote_identifier(col),
                match dir {
                    Order::Desc => "DESC",
                    Order::Asc => "ASC",
                }
            )
        })
        .unwrap_or_default();
    let limit_clause = limit.map(|n| format!(" LIMIT {n}")).unwrap_or_default();
    Ok(Statement::new(
        format!(
            "SELECT * FROM {}.{}{where_clause}{order_clause}{limit_clause}",
            quote_identifier(keyspace),
            quote_identifier(table),
        ),
        compiled.params,
    ))
}

fn update_deleted_statement(
    keyspace: &str,
    table: &str,
    key: &[(String, PredicateValue)],
    deleted_tid: Uuid,
) -> Result<Statement> {
    let compiled = predicate::compile(key)?;
    let mut params = vec![JsonValue::String(deleted_tid.to_string())];
    params.extend(compiled.params);
    Ok(Statement::new(
        format!(
            "UPDATE {}.{} SET {} = ? WHERE {}",
            quote_identifier(keyspace),
            quote_identifier(table),
            quote_identifier(DELETED_ATTRIBUTE),
            compiled.fragment,
        ),
        params,
    ))
}

/// Sibling-revision repair pass. Runs after a write's main batch
/// succeeds; errors are logged and swallowed, never surfaced to the
/// write caller.
#[instrument(skip(driver, schema, attribute_to_indexes, primary_key), fields(keyspace, tid = %tid))]
pub async fn repair_pass(
    driver: &dyn CqlDriver,
    keyspace: &str,
    schema: &TableSchema,
    attribute_to_indexes: &HashMap<String, Vec<String>>,
    primary_key: &BTreeMap<String, JsonValue>,
    tid: Uuid,
) {
    if let Err(err) = repair_pass_inner(driver, keyspace, schema, attribute_to_indexes, primary_key, tid).await {
        warn!(error = %err, "index repair pass failed, leaving index state to a later repair");
    }
}

async fn repair_pass_inner(
    driver: &dyn CqlDriver,
    keyspace: &str,
    schema: &TableSchema,
    attribute_to_indexes: &HashMap<String, Vec<String>>,
    primary_key: &BTreeMap<String, JsonValue>,
    tid: Uuid,
) -> Result<()> {
    let tid_attr = schema.tid_attribute().to_string();

    let pk_predicate: Vec<(String, PredicateValue)> = primary_key
        .iter()
        .filter(|(k, _)| *k != &tid_attr)
        .map(|(k, v)| (k.clone(), PredicateValue::eq(v.clone())))
        .collect();

    let mut older_predicate = pk_predicate.clone();
    older_predicate.push((tid_attr.clone(), PredicateValue::op(crate::predicate::Operator::Le, tid.to_string())));
    let older_stmt = select_statement(
        keyspace,
        ddl::DATA_TABLE,
        &older_predicate,
        Some((&tid_attr, Order::Desc)),
        Some(3),
    )?;

    let mut newer_predicate = pk_predicate.clone();
    newer_predicate.push((tid_attr.clone(), PredicateValue::op(crate::predicate::Operator::Gt, tid.to_string())));
    let newer_stmt = select_statement(
        keyspace,
        ddl::DATA_TABLE,
        &newer_predicate,
        Some((&tid_attr, Order::Asc)),
        Some(1),
    )?;

    let opts = ExecOptions::default();
    let mut rows = driver.execute(&older_stmt, opts).await?.rows;
    rows.extend(driver.execute(&newer_stmt, opts).await?.rows);

    let row_tid_micros = |row: &Row| -> i64 {
        row.get(&tid_attr)
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(tid::timestamp_micros)
            .unwrap_or(0)
    };
    rows.sort_by(|a, b| row_tid_micros(b).cmp(&row_tid_micros(a)));

    for pair in rows.windows(2) {
        let (newer, older) = (&pair[0], &pair[1]);
        let mut processed_for_pair: Vec<&str> = Vec::new();

        for (attr, index_names) in attribute_to_indexes {
            if newer.get(attr) == older.get(attr) {
                continue;
            }
            for index_name in index_names {
                if processed_for_pair.contains(&index_name.as_str()) {
                    continue;
                }
                processed_for_pair.push(index_name);

                let Some(expanded) = ExpandedIndex::compute(schema, index_name) else {
                    continue;
                };
                let key: Vec<(String, PredicateValue)> = expanded
                    .index_attributes()
                    .into_iter()
                    .filter_map(|attr| older.get(&attr).map(|v| (attr, PredicateValue::eq(v.clone()))))
                    .collect();
                if key.len() != expanded.index_attributes().len() {
                    continue;
                }
                let stmt = update_deleted_statement(keyspace, &expanded.table_name(), &key, tid)?;
                driver.execute(&stmt, opts).await?;
            }
        }

        let tombstone_key: Vec<(String, PredicateValue)> = schema
            .primary_key_attributes()
            .into_iter()
            .filter_map(|attr| older.get(&attr).map(|v| (attr, PredicateValue::eq(v.clone()))))
            .collect();
        let tombstone_stmt = update_deleted_statement(keyspace, ddl::DATA_TABLE, &tombstone_key, tid)?;
        driver.execute(&tombstone_stmt, opts).await?;
    }

    Ok(())
}

/// Read path against a secondary index, with read-repair. Pages through
/// the index table via an explicit cursor rather than recursive per-row
/// calls.
#[instrument(skip(driver, schema, raw_predicate))]
pub async fn get_via_index(
    driver: &dyn CqlDriver,
    keyspace: &str,
    schema: &TableSchema,
    index_name: &str,
    raw_predicate: BTreeMap<String, JsonValue>,
    limit: usize,
    as_of_tid: Option<Uuid>,
) -> Result<Vec<Row>> {
    let Some(expanded) = ExpandedIndex::compute(schema, index_name) else {
        return Ok(Vec::new());
    };

    let covers_predicate = raw_predicate
        .keys()
        .all(|attr| expanded.all_attributes().contains(attr));

    let bumped_limit = limit + limit.div_ceil(4);
    let tid_attr = schema.tid_attribute().to_string();

    let mut predicate: Vec<(String, PredicateValue)> = Vec::new();
    for (attr, value) in &raw_predicate {
        if attr == &tid_attr || expanded.index_attributes().contains(attr) {
            predicate.push((attr.clone(), PredicateValue::from_json(value.clone())?));
        }
    }

    let order = Some((tid_attr.as_str(), Order::Desc));
    let stmt = select_statement(keyspace, &expanded.table_name(), &predicate, order, None)?;
    let mut stream = driver
        .stream(
            &stmt,
            StreamOptions {
                fetch_size: bumped_limit,
                ..StreamOptions::default()
            },
        )
        .await?;

    let mut accumulated = Vec::new();

    // Explicit pagination cursor, not recursion: each iteration asks the
    // stream for the next page and stops once `limit` live rows
    // accumulate or the index is exhausted.
    loop {
        let page = stream.next_page(bumped_limit).await?;
        if page.is_empty() {
            break;
        }

        for row in page {
            if !row_is_live(&row, as_of_tid) {
                continue;
            }

            if covers_predicate {
                accumulated.push(row);
            } else {
                let pk: BTreeMap<String, JsonValue> = schema
                    .primary_key_attributes()
                    .into_iter()
                    .filter_map(|attr| row.get(&attr).map(|v| (attr, v.clone())))
                    .collect();
                if pk.len() != schema.primary_key_attributes().len() {
                    continue;
                }
                if let Some(confirmed) = point_check(driver, keyspace, schema, &pk, &raw_predicate).await? {
                    accumulated.push(confirmed);
                }
            }

            if accumulated.len() >= limit {
                break;
            }
        }

        if accumulated.len() >= limit {
            break;
        }
    }

    accumulated.truncate(limit);
    Ok(accumulated)
}

fn row_is_live(row: &Row, as_of_tid: Option<Uuid>) -> bool {
    match row.get(DELETED_ATTRIBUTE) {
        Some(JsonValue::String(deleted)) => {
            let deleted_tid = match Uuid::parse_str(deleted) {
                Ok(u) => u,
                Err(_) => return true,
            };
            match as_of_tid {
                Some(as_of) => tid::timestamp_micros(deleted_tid) > tid::timestamp_micros(as_of),
                None => false,
            }
        }
        _ => true,
    }
}

async fn point_check(
    driver: &dyn CqlDriver,
    keyspace: &str,
    schema: &TableSchema,
    primary_key: &BTreeMap<String, JsonValue>,
    raw_predicate: &BTreeMap<String, JsonValue>,
) -> Result<Option<Row>> {
    let stmt = query::get(
        keyspace,
        schema,
        primary_key.clone(),
        &crate::facade::Proj::All,
        None,
        Some(1),
    )?;
    let result = driver.execute(&stmt, ExecOptions::default()).await?;
    let Some(row) = result.rows.into_iter().next() else {
        return Ok(None);
    };
    for (attr, expected) in raw_predicate {
        if expected.is_object() {
            continue; // operator predicates are re-checked by the caller's own tid filtering
        }
        if row.get(attr) != Some(expected) {
            return Ok(None);
        }
    }
    Ok(Some(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeType, IndexElement, SecondaryIndexElement, TableOptions};

    fn schema_with_index() -> TableSchema {
        let mut attributes = BTreeMap::new();
        attributes.insert("key".to_string(), AttributeType::String);
        attributes.insert("uri".to_string(), AttributeType::String);
        attributes.insert("body".to_string(), AttributeType::String);
        let mut schema = TableSchema {
            domain: "org.wikipedia.en".to_string(),
            table: "kv".to_string(),
            attributes,
            index: vec![IndexElement::hash("key")],
            secondary_indexes: BTreeMap::new(),
            options: TableOptions::default(),
            description: None,
        };
        schema.secondary_indexes.insert(
            "by_uri".to_string(),
            vec![SecondaryIndexElement::hash("uri"), SecondaryIndexElement::proj("body")],
        );
        schema.normalized().unwrap()
    }

    #[test]
    fn expanded_index_includes_primary_key_tail_and_proj() {
        let schema = schema_with_index();
        let expanded = ExpandedIndex::compute(&schema, "by_uri").unwrap();
        assert_eq!(expanded.hash, "uri");
        let attrs = expanded.index_attributes();
        assert!(attrs.contains(&"key".to_string()));
        assert!(attrs.contains(&"_tid".to_string()));
        assert!(expanded.proj.contains(&"body".to_string()));
    }

    #[test]
    fn attribute_index_map_covers_hash_range_and_proj() {
        let schema = schema_with_index();
        let map = attribute_index_map(&schema);
        assert!(map.get("uri").unwrap().contains(&"by_uri".to_string()));
        assert!(map.get("body").unwrap().contains(&"by_uri".to_string()));
        assert!(map.get("key").unwrap().contains(&"by_uri".to_string()));
    }
}
