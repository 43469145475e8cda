//! Bucket Handlers — thin wrappers over [`StorageEngine`] that pre-declare
//! the two canonical bucket-kind schemas and offer revision-aware
//! convenience methods. This is the seam an HTTP routing layer sits
//! behind.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::driver::{Consistency, Row};
use crate::error::{Result, StoreError};
use crate::facade::{DeleteRequest, GetRequest, Proj, PutCondition, PutOutcome, PutRequest, StorageEngine};
use crate::schema::{AttributeType, IndexElement, Order, TableOptions, TableSchema};
use crate::tid;

/// A plain key-value bucket: one row per key, no revision history.
pub struct KvBucket {
    engine: StorageEngine,
    domain: String,
    table: String,
}

impl KvBucket {
    /// The canonical schema for a plain KV bucket named `table`: hash on
    /// `key`, a single `body` attribute.
    pub fn schema(table: &str) -> TableSchema {
        TableSchema {
            domain: String::new(),
            table: table.to_string(),
            attributes: BTreeMap::from([
                ("key".to_string(), AttributeType::String),
                ("body".to_string(), AttributeType::Json),
            ]),
            index: vec![IndexElement::hash("key")],
            secondary_indexes: BTreeMap::new(),
            options: TableOptions::default(),
            description: Some("plain key-value bucket".to_string()),
        }
    }

    /// Declare the bucket's backing table. Idempotent at the keyspace level
    /// like every `createTable`.
    pub async fn create(engine: &StorageEngine, domain: &str, table: &str) -> Result<Self> {
        let mut schema = Self::schema(table);
        schema.domain = domain.to_string();
        engine.create_table(domain, &schema).await?;
        Ok(KvBucket {
            engine: engine.clone(),
            domain: domain.to_string(),
            table: table.to_string(),
        })
    }

    /// Attach to an already-created bucket without re-running DDL.
    pub fn attach(engine: &StorageEngine, domain: &str, table: &str) -> Self {
        KvBucket {
            engine: engine.clone(),
            domain: domain.to_string(),
            table: table.to_string(),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Row>> {
        let mut attributes = BTreeMap::new();
        attributes.insert("key".to_string(), JsonValue::String(key.to_string()));
        let result = self
            .engine
            .get(
                &self.domain,
                GetRequest {
                    table: self.table.clone(),
                    index: None,
                    attributes,
                    proj: Proj::All,
                    order: None,
                    limit: Some(1),
                    consistency: Consistency::One,
                },
            )
            .await?;
        Ok(result.items.into_iter().next())
    }

    pub async fn put(&self, key: &str, body: JsonValue) -> Result<PutOutcome> {
        let mut attributes = BTreeMap::new();
        attributes.insert("key".to_string(), JsonValue::String(key.to_string()));
        attributes.insert("body".to_string(), body);
        self.engine
            .put(
                &self.domain,
                PutRequest {
                    table: self.table.clone(),
                    attributes,
                    if_condition: None,
                    consistency: Consistency::One,
                },
            )
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut primary_key = BTreeMap::new();
        primary_key.insert("key".to_string(), JsonValue::String(key.to_string()));
        self.engine
            .delete(
                &self.domain,
                DeleteRequest {
                    table: self.table.clone(),
                    primary_key,
                    consistency: Consistency::One,
                },
            )
            .await
    }
}

/// A revisioned key-value bucket: every `put` creates a new revision keyed
/// by `(key, tid)`, ordered newest-first.
pub struct RevisionedKvBucket {
    engine: StorageEngine,
    domain: String,
    table: String,
}

impl RevisionedKvBucket {
    /// The canonical schema for a revisioned KV bucket: hash on `key`,
    /// range on `tid` (descending, so "latest" is the first row).
    pub fn schema(table: &str) -> TableSchema {
        TableSchema {
            domain: String::new(),
            table: table.to_string(),
            attributes: BTreeMap::from([
                ("key".to_string(), AttributeType::String),
                ("tid".to_string(), AttributeType::Timeuuid),
                ("body".to_string(), AttributeType::Json),
            ]),
            index: vec![
                IndexElement::hash("key"),
                IndexElement::range("tid", Some(Order::Desc)),
            ],
            secondary_indexes: BTreeMap::new(),
            options: TableOptions::default(),
            description: Some("revisioned key-value bucket".to_string()),
        }
    }

    pub async fn create(engine: &StorageEngine, domain: &str, table: &str) -> Result<Self> {
        let mut schema = Self::schema(table);
        schema.domain = domain.to_string();
        engine.create_table(domain, &schema).await?;
        Ok(RevisionedKvBucket {
            engine: engine.clone(),
            domain: domain.to_string(),
            table: table.to_string(),
        })
    }

    pub fn attach(engine: &StorageEngine, domain: &str, table: &str) -> Self {
        RevisionedKvBucket {
            engine: engine.clone(),
            domain: domain.to_string(),
            table: table.to_string(),
        }
    }

    /// The most recent revision for `key`.
    pub async fn get_latest(&self, key: &str) -> Result<Option<Row>> {
        let rows = self.list_revisions(key, 1).await?;
        Ok(rows.into_iter().next())
    }

    /// A specific revision by its `tid` (a UUID v1 revision selector;
    /// date/`oldid` selectors belong to an HTTP layer's own parsing).
    pub async fn get_revision(&self, key: &str, tid: Uuid) -> Result<Row> {
        let mut attributes = BTreeMap::new();
        attributes.insert("key".to_string(), JsonValue::String(key.to_string()));
        attributes.insert("tid".to_string(), JsonValue::String(tid.to_string()));
        let result = self
            .engine
            .get(
                &self.domain,
                GetRequest {
                    table: self.table.clone(),
                    index: None,
                    attributes,
                    proj: Proj::All,
                    order: None,
                    limit: Some(1),
                    consistency: Consistency::One,
                },
            )
            .await?;
        result
            .items
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("no revision {tid} for key '{key}'")))
    }

    /// Up to `limit` revisions for `key`, newest first.
    pub async fn list_revisions(&self, key: &str, limit: usize) -> Result<Vec<Row>> {
        let mut attributes = BTreeMap::new();
        attributes.insert("key".to_string(), JsonValue::String(key.to_string()));
        let result = self
            .engine
            .get(
                &self.domain,
                GetRequest {
                    table: self.table.clone(),
                    index: None,
                    attributes,
                    proj: Proj::All,
                    order: Some(Order::Desc),
                    limit: Some(limit),
                    consistency: Consistency::One,
                },
            )
            .await?;
        Ok(result.items)
    }

    /// Write a fresh revision. The `_tid`-role `tid` attribute is always
    /// synthesized by the facade; callers never supply one.
    pub async fn put(&self, key: &str, body: JsonValue) -> Result<PutOutcome> {
        let mut attributes = BTreeMap::new();
        attributes.insert("key".to_string(), JsonValue::String(key.to_string()));
        attributes.insert("body".to_string(), body);
        self.engine
            .put(
                &self.domain,
                PutRequest {
                    table: self.table.clone(),
                    attributes,
                    if_condition: None,
                    consistency: Consistency::One,
                },
            )
            .await
    }

    /// Conditionally create a revision only if `key` has never been written
    /// (`IF NOT EXISTS` lightweight transaction).
    pub async fn put_if_not_exists(&self, key: &str, tid: Uuid, body: JsonValue) -> Result<PutOutcome> {
        let mut attributes = BTreeMap::new();
        attributes.insert("key".to_string(), JsonValue::String(key.to_string()));
        attributes.insert("tid".to_string(), JsonValue::String(tid.to_string()));
        attributes.insert("body".to_string(), body);
        self.engine
            .put(
                &self.domain,
                PutRequest {
                    table: self.table.clone(),
                    attributes,
                    if_condition: Some(PutCondition::NotExists),
                    consistency: Consistency::One,
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeCqlDriver;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn kv_bucket_put_then_get_round_trips() {
        let engine = StorageEngine::new(Arc::new(FakeCqlDriver::new()));
        let bucket = KvBucket::create(&engine, "org.wikipedia.en", "settings").await.unwrap();

        bucket.put("theme", json!("dark")).await.unwrap();
        let row = bucket.get("theme").await.unwrap().unwrap();
        assert_eq!(row.get("body"), Some(&json!("dark")));
    }

    #[tokio::test]
    async fn revisioned_bucket_latest_sees_most_recent_write() {
        let engine = StorageEngine::new(Arc::new(FakeCqlDriver::new()));
        let bucket = RevisionedKvBucket::create(&engine, "org.wikipedia.en", "revisions")
            .await
            .unwrap();

        bucket.put("testing", json!("v1")).await.unwrap();
        bucket.put("testing", json!("v2")).await.unwrap();

        let latest = bucket.get_latest("testing").await.unwrap().unwrap();
        assert_eq!(latest.get("body"), Some(&json!("v2")));

        let revisions = bucket.list_revisions("testing", 10).await.unwrap();
        assert_eq!(revisions.len(), 2);
    }
}
