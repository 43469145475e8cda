//! Query Builder — compiles the facade's logical operations
//! (`createTable`/`get`/`put`/`delete`/`dropTable`) into driver
//! [`Statement`]/[`Batch`] values. Knows nothing about connections or
//! caching; every function here is a pure compiler from schema +
//! arguments to statements.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::ddl;
use crate::driver::{Batch, Statement};
use crate::error::{Result, StoreError};
use crate::facade::Proj;
use crate::names::quote_identifier;
use crate::predicate::{self, PredicateValue};
use crate::schema::{Order, TableSchema};

/// All statements needed to materialize a normalized schema's physical
/// tables. The caller is responsible for executing the keyspace-creation
/// statement before these.
pub fn create_table(keyspace: &str, schema: &TableSchema) -> Vec<Statement> {
    ddl::all_create_table_statements(keyspace, schema)
}

/// The keyspace-creation statement, issued before any table statements.
pub fn create_keyspace(keyspace: &str, schema: &TableSchema) -> Statement {
    ddl::create_keyspace_statement(keyspace, schema)
}

/// `DROP KEYSPACE`, tearing down every physical table at once.
pub fn drop_table(keyspace: &str) -> Statement {
    ddl::drop_keyspace_statement(keyspace)
}

/// `INSERT INTO meta (key, value) VALUES ('schema', <json>)`.
pub fn put_schema_meta(keyspace: &str, schema: &TableSchema) -> Result<Statement> {
    let json = schema.to_meta_json()?;
    Ok(Statement::new(
        format!(
            "INSERT INTO {}.{} (\"key\",\"value\") VALUES (?,?)",
            quote_identifier(keyspace),
            quote_identifier(ddl::META_TABLE),
        ),
        vec![JsonValue::String("schema".to_string()), JsonValue::String(json)],
    ))
}

/// `SELECT value FROM meta WHERE key = 'schema'`.
pub fn get_schema_meta(keyspace: &str) -> Statement {
    Statement::new(
        format!(
            "SELECT \"value\" FROM {}.{} WHERE \"key\" = ?",
            quote_identifier(keyspace),
            quote_identifier(ddl::META_TABLE),
        ),
        vec![JsonValue::String("schema".to_string())],
    )
}

/// Build a `SELECT` against the data table from a raw `{attr -> value}`
/// predicate map, honoring declared attribute order for a stable column
/// list and an optional row limit.
///
/// `proj` resolves to `*` by default, a single column, or a comma-joined
/// list; when `order` is set, a `*` projection is expanded into the
/// schema's explicit column list, working around the driver's known
/// `SELECT * ... ORDER BY` bug. `order` itself is emitted against the
/// schema's first declared range (clustering) column.
pub fn get(
    keyspace: &str,
    schema: &TableSchema,
    raw_predicate: BTreeMap<String, JsonValue>,
    proj: &Proj,
    order: Option<Order>,
    limit: Option<usize>,
) -> Result<Statement> {
    let mut predicate = Vec::with_capacity(raw_predicate.len());
    for (attr, value) in raw_predicate {
        if !schema.attributes.contains_key(&attr) {
            return Err(StoreError::InvalidQuery(format!(
                "predicate references undeclared attribute '{attr}'"
            )));
        }
        predicate.push((attr, PredicateValue::from_json(value)?));
    }

    let compiled = predicate::compile(&predicate)?;
    let where_clause = if compiled.fragment.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", compiled.fragment)
    };

    let order_clause = match (order, schema.range_attributes().first()) {
        (Some(dir), Some(range0)) => format!(
            " ORDER BY {} {}",
            quote_identifier(&range0.attribute),
            match dir {
                Order::Desc => "DESC",
                Order::Asc => "ASC",
            }
        ),
        _ => String::new(),
    };

    let select_list = projection_clause(schema, proj, order.is_some());
    let limit_clause = limit.map(|n| format!(" LIMIT {n}")).unwrap_or_default();

    Ok(Statement::new(
        format!(
            "SELECT {select_list} FROM {}.{}{where_clause}{order_clause}{limit_clause}",
            quote_identifier(keyspace),
            quote_identifier(ddl::DATA_TABLE),
        ),
        compiled.params,
    ))
}

/// Resolve a `proj` value to its `SELECT` column list.
fn projection_clause(schema: &TableSchema, proj: &Proj, ordered: bool) -> String {
    match proj {
        Proj::All if ordered => schema
            .attributes
            .keys()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(","),
        Proj::All => "*".to_string(),
        Proj::One(col) => quote_identifier(col),
        Proj::Many(cols) => cols.iter().map(|c| quote_identifier(c)).collect::<Vec<_>>().join(","),
    }
}

/// Build the `INSERT` for a single data-table row. The caller supplies
/// every attribute already present (including any synthesized `_tid`/
/// `_deleted`); this function does not fill in defaults.
pub fn put(
    keyspace: &str,
    row: &BTreeMap<String, JsonValue>,
    if_not_exists: bool,
) -> Statement {
    put_into(keyspace, ddl::DATA_TABLE, row, if_not_exists)
}

/// Build an `INSERT` against an arbitrary table in `keyspace` — used both
/// for the `data` table ([`put`]) and, by `index.rs`, for secondary-index
/// rows.
pub fn put_into(
    keyspace: &str,
    table: &str,
    row: &BTreeMap<String, JsonValue>,
    if_not_exists: bool,
) -> Statement {
    let cols: Vec<&String> = row.keys().collect();
    let placeholders = vec!["?"; cols.len()].join(",");
    let col_list = cols
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(",");
    let params: Vec<JsonValue> = cols.iter().map(|c| row[*c].clone()).collect();

    let cond = if if_not_exists { " IF NOT EXISTS" } else { "" };

    Statement::new(
        format!(
            "INSERT INTO {}.{} ({col_list}) VALUES ({placeholders}){cond}",
            quote_identifier(keyspace),
            quote_identifier(table),
        ),
        params,
    )
}

/// Build the unconditional partition/row `DELETE` from a primary-key
/// predicate — there is no delete-by-arbitrary-predicate path, only by
/// primary key.
pub fn delete(keyspace: &str, primary_key: &BTreeMap<String, JsonValue>) -> Result<Statement> {
    let predicate: Vec<(String, PredicateValue)> = primary_key
        .iter()
        .map(|(k, v)| (k.clone(), PredicateValue::eq(v.clone())))
        .collect();
    let compiled = predicate::compile(&predicate)?;
    Ok(Statement::new(
        format!(
            "DELETE FROM {}.{} WHERE {}",
            quote_identifier(keyspace),
            quote_identifier(ddl::DATA_TABLE),
            compiled.fragment,
        ),
        compiled.params,
    ))
}

/// Build the `UPDATE` for a put request that supplies non-primary-key
/// attributes without `if: 'not exists'`: primary-key attributes go in
/// `WHERE`, everything else in `SET`, and an optional predicate becomes
/// `IF <cond>`.
pub fn update(
    keyspace: &str,
    schema: &TableSchema,
    attributes: &BTreeMap<String, JsonValue>,
    if_predicate: Option<BTreeMap<String, JsonValue>>,
) -> Result<Statement> {
    update_into(keyspace, ddl::DATA_TABLE, schema, attributes, if_predicate)
}

/// Build an `UPDATE` against an arbitrary table — used both for [`update`]
/// and, potentially, index-row corrections.
pub fn update_into(
    keyspace: &str,
    table: &str,
    schema: &TableSchema,
    attributes: &BTreeMap<String, JsonValue>,
    if_predicate: Option<BTreeMap<String, JsonValue>>,
) -> Result<Statement> {
    let pk_attrs = schema.primary_key_attributes();

    let set_cols: Vec<&String> = attributes.keys().filter(|c| !pk_attrs.contains(c)).collect();
    let set_clause = set_cols
        .iter()
        .map(|c| format!("{} = ?", quote_identifier(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let mut params: Vec<JsonValue> = set_cols.iter().map(|c| attributes[*c].clone()).collect();

    let pk_predicate: Vec<(String, PredicateValue)> = pk_attrs
        .iter()
        .filter_map(|attr| attributes.get(attr).map(|v| (attr.clone(), PredicateValue::eq(v.clone()))))
        .collect();
    let compiled_key = predicate::compile(&pk_predicate)?;
    params.extend(compiled_key.params);

    let if_clause = match if_predicate {
        Some(raw) => {
            let parsed: Result<Vec<(String, PredicateValue)>> = raw
                .into_iter()
                .map(|(k, v)| PredicateValue::from_json(v).map(|pv| (k, pv)))
                .collect();
            let compiled_if = predicate::compile(&parsed?)?;
            params.extend(compiled_if.params);
            format!(" IF {}", compiled_if.fragment)
        }
        None => String::new(),
    };

    Ok(Statement::new(
        format!(
            "UPDATE {}.{} SET {set_clause} WHERE {}{if_clause}",
            quote_identifier(keyspace),
            quote_identifier(table),
            compiled_key.fragment,
        ),
        params,
    ))
}

/// Wrap a single put statement in a batch carrying the write timestamp
/// derived from its `_tid`, so index maintenance statements sharing the
/// batch get the same timestamp.
pub fn put_batch(statement: Statement, timestamp: Option<i64>) -> Batch {
    let mut batch = Batch::new();
    batch.push(statement);
    if let Some(ts) = timestamp {
        batch.timestamp = Some(ts);
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_emits_insert_with_all_columns() {
        let mut row = BTreeMap::new();
        row.insert("key".to_string(), json!("k1"));
        row.insert("body".to_string(), json!("hello"));
        let stmt = put("ks", &row, false);
        assert!(stmt.cql.starts_with("INSERT INTO \"ks\".\"data\""));
        assert_eq!(stmt.params.len(), 2);
        assert!(!stmt.cql.contains("IF NOT EXISTS"));
    }

    #[test]
    fn put_with_condition_appends_if_not_exists() {
        let mut row = BTreeMap::new();
        row.insert("key".to_string(), json!("k1"));
        let stmt = put("ks", &row, true);
        assert!(stmt.cql.ends_with("IF NOT EXISTS"));
    }

    #[test]
    fn delete_compiles_primary_key_predicate() {
        let mut pk = BTreeMap::new();
        pk.insert("key".to_string(), json!("k1"));
        let stmt = delete("ks", &pk).unwrap();
        assert_eq!(stmt.cql, "DELETE FROM \"ks\".\"data\" WHERE \"key\" = ?");
        assert_eq!(stmt.params, vec![json!("k1")]);
    }

    #[test]
    fn update_sets_non_key_columns_keyed_by_primary_key() {
        let schema = crate::schema::TableSchema {
            domain: "org.wikipedia.en".to_string(),
            table: "kv".to_string(),
            attributes: BTreeMap::from([
                ("key".to_string(), crate::schema::AttributeType::String),
                ("body".to_string(), crate::schema::AttributeType::String),
            ]),
            index: vec![crate::schema::IndexElement::hash("key")],
            secondary_indexes: BTreeMap::new(),
            options: crate::schema::TableOptions::default(),
            description: None,
        };
        let mut attributes = BTreeMap::new();
        attributes.insert("key".to_string(), json!("k1"));
        attributes.insert("body".to_string(), json!("updated"));
        let stmt = update("ks", &schema, &attributes, None).unwrap();
        assert!(stmt.cql.starts_with("UPDATE \"ks\".\"data\" SET \"body\" = ? WHERE \"key\" = ?"));
        assert_eq!(stmt.params, vec![json!("updated"), json!("k1")]);
    }

    #[test]
    fn get_rejects_undeclared_attribute() {
        let schema = crate::schema::TableSchema {
            domain: "org.wikipedia.en".to_string(),
            table: "kv".to_string(),
            attributes: BTreeMap::from([("key".to_string(), crate::schema::AttributeType::String)]),
            index: vec![crate::schema::IndexElement::hash("key")],
            secondary_indexes: BTreeMap::new(),
            options: crate::schema::TableOptions::default(),
            description: None,
        };
        let mut predicate = BTreeMap::new();
        predicate.insert("ghost".to_string(), json!("x"));
        let err = get("ks", &schema, predicate, &Proj::All, None, None).unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));
    }

    #[test]
    fn get_projects_star_by_default() {
        let schema = crate::schema::TableSchema {
            domain: "org.wikipedia.en".to_string(),
            table: "kv".to_string(),
            attributes: BTreeMap::from([("key".to_string(), crate::schema::AttributeType::String)]),
            index: vec![crate::schema::IndexElement::hash("key")],
            secondary_indexes: BTreeMap::new(),
            options: crate::schema::TableOptions::default(),
            description: None,
        };
        let stmt = get("ks", &schema, BTreeMap::new(), &Proj::All, None, None).unwrap();
        assert!(stmt.cql.starts_with("SELECT * FROM"));
    }

    #[test]
    fn get_expands_star_to_explicit_columns_when_ordered() {
        let schema = crate::schema::TableSchema {
            domain: "org.wikipedia.en".to_string(),
            table: "revisions".to_string(),
            attributes: BTreeMap::from([
                ("key".to_string(), crate::schema::AttributeType::String),
                ("tid".to_string(), crate::schema::AttributeType::Timeuuid),
                ("body".to_string(), crate::schema::AttributeType::String),
            ]),
            index: vec![
                crate::schema::IndexElement::hash("key"),
                crate::schema::IndexElement::range("tid", Some(Order::Desc)),
            ],
            secondary_indexes: BTreeMap::new(),
            options: crate::schema::TableOptions::default(),
            description: None,
        };
        let stmt = get("ks", &schema, BTreeMap::new(), &Proj::All, Some(Order::Desc), None).unwrap();
        assert!(!stmt.cql.contains("SELECT *"));
        assert!(stmt.cql.contains("\"body\""));
        assert!(stmt.cql.contains("ORDER BY \"tid\" DESC"));
    }

    #[test]
    fn get_honors_explicit_proj_list() {
        let schema = crate::schema::TableSchema {
            domain: "org.wikipedia.en".to_string(),
            table: "kv".to_string(),
            attributes: BTreeMap::from([
                ("key".to_string(), crate::schema::AttributeType::String),
                ("body".to_string(), crate::schema::AttributeType::String),
            ]),
            index: vec![crate::schema::IndexElement::hash("key")],
            secondary_indexes: BTreeMap::new(),
            options: crate::schema::TableOptions::default(),
            description: None,
        };
        let stmt = get(
            "ks",
            &schema,
            BTreeMap::new(),
            &Proj::Many(vec!["key".to_string(), "body".to_string()]),
            None,
            None,
        )
        .unwrap();
        assert!(stmt.cql.starts_with("SELECT \"key\",\"body\" FROM"));
    }
}
