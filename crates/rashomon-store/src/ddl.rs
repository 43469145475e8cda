//! DDL emission — turns a [`TableSchema`] into the `CREATE KEYSPACE`/
//! `CREATE TABLE` statements the facade issues on `createTable`. Every
//! table gets three physical tables in its keyspace:
//!
//! ```text
//! KEYSPACE <derived from domain+table>
//!   TABLE data                 -- the schema's own attributes
//!   TABLE meta                 -- one row: the schema's own JSON encoding
//!   TABLE idx_<name>_ever      -- one per secondary index, see index.rs
//! ```
//!
//! `createTable` is the one administrative operation this crate does not
//! attempt to make atomic across its three tables; a crash partway
//! through leaves a partially-created keyspace for a retried
//! `createTable` to finish.

use crate::driver::Statement;
use crate::names::quote_identifier;
use crate::schema::{Order, SecondaryIndexElementKind, TableSchema};

pub const META_TABLE: &str = "meta";
pub const DATA_TABLE: &str = "data";

/// The name of the backing table for a secondary index.
pub fn secondary_index_table_name(index_name: &str) -> String {
    format!("idx_{index_name}_ever")
}

/// `CREATE KEYSPACE IF NOT EXISTS ...` for the given derived keyspace name.
pub fn create_keyspace_statement(keyspace: &str, schema: &TableSchema) -> Statement {
    let replication = format!(
        "{{'class': '{}', 'replication_factor': 3}}",
        schema.options.storage_class
    );
    Statement::new(
        format!(
            "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {replication}",
            quote_identifier(keyspace)
        ),
        vec![],
    )
}

/// `DROP KEYSPACE IF EXISTS ...`, used by `dropTable`.
pub fn drop_keyspace_statement(keyspace: &str) -> Statement {
    Statement::new(
        format!("DROP KEYSPACE IF EXISTS {}", quote_identifier(keyspace)),
        vec![],
    )
}

fn column_clause(name: &str, cql_type: &str, is_static: bool) -> String {
    let suffix = if is_static { " static" } else { "" };
    format!("{} {cql_type}{suffix}", quote_identifier(name))
}

/// `CREATE TABLE ... data (...)` for a normalized schema: hash, range, and
/// static columns plus every declared attribute.
pub fn create_data_table_statement(keyspace: &str, schema: &TableSchema) -> Statement {
    let mut columns: Vec<String> = Vec::new();
    for (name, attr_type) in &schema.attributes {
        let is_static = schema
            .static_attributes()
            .iter()
            .any(|e| &e.attribute == name);
        columns.push(column_clause(name, &attr_type.cql_type(), is_static));
    }

    let hash = schema.hash_attribute().unwrap_or_default();
    let range_cols: Vec<String> = schema
        .range_attributes()
        .iter()
        .map(|e| quote_identifier(&e.attribute))
        .collect();

    let primary_key = if range_cols.is_empty() {
        format!("({})", quote_identifier(hash))
    } else {
        format!("(({}), {})", quote_identifier(hash), range_cols.join(", "))
    };
    columns.push(format!("PRIMARY KEY {primary_key}"));

    let mut clustering: Vec<String> = Vec::new();
    for element in schema.range_attributes() {
        let order = match element.order {
            Some(Order::Desc) => "DESC",
            _ => "ASC",
        };
        clustering.push(format!("{} {order}", quote_identifier(&element.attribute)));
    }

    let with_clause = if clustering.is_empty() {
        String::new()
    } else {
        format!(" WITH CLUSTERING ORDER BY ({})", clustering.join(", "))
    };

    Statement::new(
        format!(
            "CREATE TABLE IF NOT EXISTS {}.{} ({}){with_clause}",
            quote_identifier(keyspace),
            quote_identifier(DATA_TABLE),
            columns.join(", "),
        ),
        vec![],
    )
}

/// `CREATE TABLE ... meta (key text PRIMARY KEY, value text)`. Holds a
/// single row keyed by a fixed sentinel, carrying the schema's own JSON
/// encoding.
pub fn create_meta_table_statement(keyspace: &str) -> Statement {
    Statement::new(
        format!(
            "CREATE TABLE IF NOT EXISTS {}.{} (\"key\" text, \"value\" text, PRIMARY KEY ((\"key\")))",
            quote_identifier(keyspace),
            quote_identifier(META_TABLE),
        ),
        vec![],
    )
}

/// `CREATE TABLE ... idx_<name>_ever (...)` for one secondary index,
/// following the expanded index schema: the index's own hash and range
/// columns, plus the always-present `_tid`/`_deleted` pair and any
/// `proj`-ed columns copied from the data table.
pub fn create_secondary_index_table_statement(
    keyspace: &str,
    index_name: &str,
    schema: &TableSchema,
) -> Statement {
    let elements = schema.secondary_indexes.get(index_name).cloned().unwrap_or_default();

    let mut columns: Vec<String> = Vec::new();
    let mut hash_col = None;
    let mut range_cols: Vec<(String, Option<Order>)> = Vec::new();

    for element in &elements {
        let cql_type = schema
            .attributes
            .get(&element.attribute)
            .map(|t| t.cql_type())
            .unwrap_or_else(|| "text".to_string());
        match element.kind {
            SecondaryIndexElementKind::Hash => {
                columns.push(column_clause(&element.attribute, &cql_type, false));
                hash_col = Some(element.attribute.clone());
            }
            SecondaryIndexElementKind::Range => {
                columns.push(column_clause(&element.attribute, &cql_type, false));
                range_cols.push((element.attribute.clone(), element.order));
            }
            SecondaryIndexElementKind::Proj => {
                columns.push(column_clause(&element.attribute, &cql_type, false));
            }
        }
    }

    let tid_attr = schema.tid_attribute().to_string();
    if !elements.iter().any(|e| e.attribute == tid_attr) {
        columns.push(column_clause(&tid_attr, "timeuuid", false));
        range_cols.push((tid_attr.clone(), Some(Order::Desc)));
    }
    columns.push(column_clause("_deleted", "timeuuid", false));

    let hash = hash_col.unwrap_or_else(|| schema.hash_attribute().unwrap_or_default().to_string());
    let range_col_names: Vec<String> = range_cols
        .iter()
        .map(|(name, _)| quote_identifier(name))
        .collect();

    let primary_key = if range_col_names.is_empty() {
        format!("({})", quote_identifier(&hash))
    } else {
        format!("(({}), {})", quote_identifier(&hash), range_col_names.join(", "))
    };
    columns.push(format!("PRIMARY KEY {primary_key}"));

    let clustering: Vec<String> = range_cols
        .iter()
        .map(|(name, order)| {
            let direction = match order {
                Some(Order::Desc) => "DESC",
                _ => "ASC",
            };
            format!("{} {direction}", quote_identifier(name))
        })
        .collect();
    let with_clause = if clustering.is_empty() {
        String::new()
    } else {
        format!(" WITH CLUSTERING ORDER BY ({})", clustering.join(", "))
    };

    Statement::new(
        format!(
            "CREATE TABLE IF NOT EXISTS {}.{} ({}){with_clause}",
            quote_identifier(keyspace),
            quote_identifier(&secondary_index_table_name(index_name)),
            columns.join(", "),
        ),
        vec![],
    )
}

/// Every `CREATE TABLE` statement `createTable` must issue for a
/// normalized schema: `data`, `meta`, and one per secondary index.
pub fn all_create_table_statements(keyspace: &str, schema: &TableSchema) -> Vec<Statement> {
    let mut statements = vec![
        create_data_table_statement(keyspace, schema),
        create_meta_table_statement(keyspace),
    ];
    for name in schema.secondary_indexes.keys() {
        statements.push(create_secondary_index_table_statement(keyspace, name, schema));
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeType, IndexElement, SecondaryIndexElement, TableOptions};
    use std::collections::BTreeMap;

    fn schema_with_index() -> TableSchema {
        let mut attributes = BTreeMap::new();
        attributes.insert("key".to_string(), AttributeType::String);
        attributes.insert("uri".to_string(), AttributeType::String);
        let mut schema = TableSchema {
            domain: "org.wikipedia.en".to_string(),
            table: "kv".to_string(),
            attributes,
            index: vec![IndexElement::hash("key")],
            secondary_indexes: BTreeMap::new(),
            options: TableOptions::default(),
            description: None,
        };
        schema
            .secondary_indexes
            .insert("by_uri".to_string(), vec![SecondaryIndexElement::hash("uri")]);
        schema.normalized().unwrap()
    }

    #[test]
    fn data_table_includes_synthetic_tid_range() {
        let schema = schema_with_index();
        let stmt = create_data_table_statement("ks", &schema);
        assert!(stmt.cql.contains("\"_tid\" timeuuid"));
        assert!(stmt.cql.contains("CLUSTERING ORDER BY (\"_tid\" DESC)"));
    }

    #[test]
    fn secondary_index_table_has_hash_and_tid_tail() {
        let schema = schema_with_index();
        let stmt = create_secondary_index_table_statement("ks", "by_uri", &schema);
        assert!(stmt.cql.contains("idx_by_uri_ever"));
        assert!(stmt.cql.contains("\"uri\""));
        assert!(stmt.cql.contains("\"_tid\" timeuuid"));
        assert!(stmt.cql.contains("\"_deleted\" timeuuid"));
    }

    #[test]
    fn all_statements_cover_data_meta_and_every_index() {
        let schema = schema_with_index();
        let statements = all_create_table_statements("ks", &schema);
        assert_eq!(statements.len(), 3);
    }
}
