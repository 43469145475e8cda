//! Schema Model — table schema representation, validation, and the
//! synthetic `_tid`/`_deleted` augmentation that versioned secondary
//! indexes require.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Supported semantic attribute types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    String,
    Blob,
    Boolean,
    Decimal,
    Double,
    Varint,
    Uuid,
    Timeuuid,
    Timestamp,
    Json,
    /// `set<T>` for any of the scalar types above.
    Set(Box<AttributeType>),
}

impl AttributeType {
    /// The CQL type name this attribute maps to in emitted DDL.
    pub fn cql_type(&self) -> String {
        match self {
            AttributeType::String => "text".to_string(),
            AttributeType::Blob => "blob".to_string(),
            AttributeType::Boolean => "boolean".to_string(),
            AttributeType::Decimal => "decimal".to_string(),
            AttributeType::Double => "double".to_string(),
            AttributeType::Varint => "varint".to_string(),
            AttributeType::Uuid => "uuid".to_string(),
            AttributeType::Timeuuid => "timeuuid".to_string(),
            AttributeType::Timestamp => "timestamp".to_string(),
            // json is stored as text and round-tripped via JSON encoding.
            AttributeType::Json => "text".to_string(),
            AttributeType::Set(inner) => format!("set<{}>", inner.cql_type()),
        }
    }

    /// `true` for the v1-UUID revision-timestamp type used as `_tid`.
    pub fn is_timeuuid(&self) -> bool {
        matches!(self, AttributeType::Timeuuid)
    }
}

/// Clustering order for a range component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Asc,
    Desc,
}

/// The role an attribute plays in the primary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexElementKind {
    Hash,
    Range,
    Static,
}

/// One element of a table's primary index declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexElement {
    pub attribute: String,
    #[serde(rename = "type")]
    pub kind: IndexElementKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
}

impl IndexElement {
    pub fn hash(attribute: impl Into<String>) -> Self {
        IndexElement {
            attribute: attribute.into(),
            kind: IndexElementKind::Hash,
            order: None,
        }
    }

    pub fn range(attribute: impl Into<String>, order: Option<Order>) -> Self {
        IndexElement {
            attribute: attribute.into(),
            kind: IndexElementKind::Range,
            order,
        }
    }

    pub fn static_col(attribute: impl Into<String>) -> Self {
        IndexElement {
            attribute: attribute.into(),
            kind: IndexElementKind::Static,
            order: None,
        }
    }
}

/// The role an attribute plays in a secondary index declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecondaryIndexElementKind {
    Hash,
    Range,
    /// Copies additional data-table attributes into the index row.
    Proj,
}

/// One element of a secondary index declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryIndexElement {
    pub attribute: String,
    #[serde(rename = "type")]
    pub kind: SecondaryIndexElementKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
}

impl SecondaryIndexElement {
    pub fn hash(attribute: impl Into<String>) -> Self {
        SecondaryIndexElement {
            attribute: attribute.into(),
            kind: SecondaryIndexElementKind::Hash,
            order: None,
        }
    }

    pub fn range(attribute: impl Into<String>, order: Option<Order>) -> Self {
        SecondaryIndexElement {
            attribute: attribute.into(),
            kind: SecondaryIndexElementKind::Range,
            order,
        }
    }

    pub fn proj(attribute: impl Into<String>) -> Self {
        SecondaryIndexElement {
            attribute: attribute.into(),
            kind: SecondaryIndexElementKind::Proj,
            order: None,
        }
    }
}

/// Storage-class / durability knobs that drive the replication clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOptions {
    #[serde(default = "default_storage_class")]
    pub storage_class: String,
    #[serde(default = "default_durability_level")]
    pub durability_level: String,
}

fn default_storage_class() -> String {
    "SimpleStrategy".to_string()
}

fn default_durability_level() -> String {
    "local_quorum".to_string()
}

impl Default for TableOptions {
    fn default() -> Self {
        TableOptions {
            storage_class: default_storage_class(),
            durability_level: default_durability_level(),
        }
    }
}

/// The name under which the synthetic revision-timestamp column is added.
pub const TID_ATTRIBUTE: &str = "_tid";
/// The name under which the synthetic tombstone-timestamp column is added.
pub const DELETED_ATTRIBUTE: &str = "_deleted";

/// A declarative table schema: hash/range/static index structure,
/// attribute types, and optional secondary indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub domain: String,
    pub table: String,
    pub attributes: BTreeMap<String, AttributeType>,
    pub index: Vec<IndexElement>,
    #[serde(default)]
    pub secondary_indexes: BTreeMap<String, Vec<SecondaryIndexElement>>,
    #[serde(default)]
    pub options: TableOptions,
    /// Free-text, non-semantic description surfaced by admin tooling.
    /// Round-trips through the `meta` row like every other field but has
    /// no effect on query compilation or index maintenance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TableSchema {
    /// The single hash (partition key) attribute name.
    pub fn hash_attribute(&self) -> Result<&str> {
        self.index
            .iter()
            .find(|e| e.kind == IndexElementKind::Hash)
            .map(|e| e.attribute.as_str())
            .ok_or_else(|| StoreError::InvalidSchema("no hash attribute declared".to_string()))
    }

    /// Range (clustering) attributes in declared order.
    pub fn range_attributes(&self) -> Vec<&IndexElement> {
        self.index
            .iter()
            .filter(|e| e.kind == IndexElementKind::Range)
            .collect()
    }

    /// Static attributes, if any.
    pub fn static_attributes(&self) -> Vec<&IndexElement> {
        self.index
            .iter()
            .filter(|e| e.kind == IndexElementKind::Static)
            .collect()
    }

    /// Primary-key attribute names: hash followed by range components, in
    /// order. Static columns are not part of the primary key.
    pub fn primary_key_attributes(&self) -> Vec<String> {
        let mut keys = vec![self.hash_attribute().unwrap_or_default().to_string()];
        keys.extend(self.range_attributes().into_iter().map(|e| e.attribute.clone()));
        keys
    }

    /// `true` if the last range component is already a `timeuuid` (so it
    /// can play the role of `_tid` without adding a synthetic column).
    pub fn has_timeuuid_range_tail(&self) -> bool {
        match self.range_attributes().last() {
            Some(last) => self
                .attributes
                .get(&last.attribute)
                .map(|t| t.is_timeuuid())
                .unwrap_or(false),
            None => false,
        }
    }

    /// The attribute that plays the `_tid` role: either the existing
    /// `timeuuid` range tail, or the synthetic `_tid` column.
    pub fn tid_attribute(&self) -> &str {
        if self.has_timeuuid_range_tail() {
            &self.range_attributes().last().unwrap().attribute
        } else {
            TID_ATTRIBUTE
        }
    }

    /// `true` if this schema needs the synthetic `_tid`/`_deleted` columns
    /// (it has secondary indexes and no existing `timeuuid` range tail).
    pub fn needs_synthetic_tid(&self) -> bool {
        !self.secondary_indexes.is_empty() && !self.has_timeuuid_range_tail()
    }

    /// Validate the schema's structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.table.is_empty() {
            return Err(StoreError::InvalidSchema("table name must not be empty".to_string()));
        }

        let hash_count = self
            .index
            .iter()
            .filter(|e| e.kind == IndexElementKind::Hash)
            .count();
        if hash_count != 1 {
            return Err(StoreError::InvalidSchema(format!(
                "expected exactly one hash attribute, found {hash_count}"
            )));
        }

        let has_range = !self.range_attributes().is_empty();
        if !has_range && !self.static_attributes().is_empty() {
            return Err(StoreError::InvalidSchema(
                "static columns require at least one range attribute".to_string(),
            ));
        }

        for element in &self.index {
            if !self.attributes.contains_key(&element.attribute) {
                return Err(StoreError::InvalidSchema(format!(
                    "index attribute '{}' is not declared in attributes",
                    element.attribute
                )));
            }
        }

        for (name, elements) in &self.secondary_indexes {
            let hash_count = elements
                .iter()
                .filter(|e| e.kind == SecondaryIndexElementKind::Hash)
                .count();
            if hash_count != 1 {
                return Err(StoreError::InvalidSchema(format!(
                    "secondary index '{name}' must declare exactly one hash element"
                )));
            }
            for element in elements {
                if element.kind != SecondaryIndexElementKind::Proj
                    && !self.attributes.contains_key(&element.attribute)
                    && element.attribute != TID_ATTRIBUTE
                {
                    return Err(StoreError::InvalidSchema(format!(
                        "secondary index '{name}' references undeclared attribute '{}'",
                        element.attribute
                    )));
                }
            }
        }

        Ok(())
    }

    /// Apply the `_tid`/`_deleted` synthesis invariant, producing the
    /// effective schema used for the `data` table. Returns a clone; the
    /// caller installs the result in the schema cache.
    ///
    /// Idempotent: calling this twice on an already-normalized schema is a
    /// no-op, since `needs_synthetic_tid` becomes false once the tail is a
    /// `timeuuid`.
    pub fn normalized(&self) -> Result<TableSchema> {
        self.validate()?;
        let mut schema = self.clone();

        if schema.needs_synthetic_tid() {
            schema
                .attributes
                .insert(TID_ATTRIBUTE.to_string(), AttributeType::Timeuuid);
            schema
                .attributes
                .insert(DELETED_ATTRIBUTE.to_string(), AttributeType::Timeuuid);
            schema
                .index
                .push(IndexElement::range(TID_ATTRIBUTE, Some(Order::Desc)));
        }

        Ok(schema)
    }

    /// Serialize this schema for storage in the `meta` table's `schema` row.
    pub fn to_meta_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize a schema previously written by `to_meta_json`.
    pub fn from_meta_json(raw: &str) -> Result<TableSchema> {
        serde_json::from_str(raw)
            .map_err(|e| StoreError::InvalidSchema(format!("corrupt meta schema: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_schema() -> TableSchema {
        let mut attributes = BTreeMap::new();
        attributes.insert("key".to_string(), AttributeType::String);
        attributes.insert("tid".to_string(), AttributeType::Timeuuid);
        attributes.insert("body".to_string(), AttributeType::String);

        TableSchema {
            domain: "org.wikipedia.en".to_string(),
            table: "revisions".to_string(),
            attributes,
            index: vec![
                IndexElement::hash("key"),
                IndexElement::range("tid", Some(Order::Desc)),
            ],
            secondary_indexes: BTreeMap::new(),
            options: TableOptions::default(),
            description: None,
        }
    }

    #[test]
    fn validates_minimal_schema() {
        assert!(simple_schema().validate().is_ok());
    }

    #[test]
    fn rejects_missing_hash() {
        let mut schema = simple_schema();
        schema.index.retain(|e| e.kind != IndexElementKind::Hash);
        assert!(matches!(schema.validate(), Err(StoreError::InvalidSchema(_))));
    }

    #[test]
    fn rejects_static_without_range() {
        let mut schema = simple_schema();
        schema.index = vec![IndexElement::hash("key"), IndexElement::static_col("body")];
        assert!(matches!(schema.validate(), Err(StoreError::InvalidSchema(_))));
    }

    #[test]
    fn rejects_undeclared_index_attribute() {
        let mut schema = simple_schema();
        schema.index.push(IndexElement::range("ghost", None));
        assert!(matches!(schema.validate(), Err(StoreError::InvalidSchema(_))));
    }

    #[test]
    fn schema_round_trips_through_meta_json() {
        let schema = simple_schema();
        let json = schema.to_meta_json().unwrap();
        let restored = TableSchema::from_meta_json(&json).unwrap();
        assert_eq!(schema, restored);
    }

    #[test]
    fn timeuuid_tail_plays_tid_role_without_synthesis() {
        let mut schema = simple_schema();
        schema
            .secondary_indexes
            .insert("by_body".to_string(), vec![SecondaryIndexElement::hash("body")]);
        assert!(!schema.needs_synthetic_tid());
        let normalized = schema.normalized().unwrap();
        assert_eq!(normalized.tid_attribute(), "tid");
        assert!(!normalized.attributes.contains_key(TID_ATTRIBUTE));
    }

    #[test]
    fn non_timeuuid_primary_gets_synthetic_tid_and_deleted() {
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

        assert!(schema.needs_synthetic_tid());
        let normalized = schema.normalized().unwrap();
        assert_eq!(normalized.tid_attribute(), TID_ATTRIBUTE);
        assert_eq!(normalized.attributes.get(TID_ATTRIBUTE), Some(&AttributeType::Timeuuid));
        assert_eq!(
            normalized.attributes.get(DELETED_ATTRIBUTE),
            Some(&AttributeType::Timeuuid)
        );
        assert_eq!(normalized.range_attributes().last().unwrap().attribute, TID_ATTRIBUTE);
    }
}
