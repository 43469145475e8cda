//! End-to-end scenarios exercising `StorageEngine` against the in-memory
//! driver: schema lifecycle, revisioned reads, conditional writes, and
//! secondary-index read-repair.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use rashomon_store::driver::fake::FakeCqlDriver;
use rashomon_store::driver::Consistency;
use rashomon_store::facade::{DeleteRequest, GetRequest, Proj, PutCondition, PutRequest};
use rashomon_store::names::keyspace_name;
use rashomon_store::schema::{AttributeType, IndexElement, Order, SecondaryIndexElement, TableOptions};
use rashomon_store::{StoreError, StorageEngine, TableSchema};

const DOMAIN: &str = "org.wikipedia.en";

fn revisioned_schema(table: &str) -> TableSchema {
    TableSchema {
        domain: DOMAIN.to_string(),
        table: table.to_string(),
        attributes: BTreeMap::from([
            ("key".to_string(), AttributeType::String),
            ("tid".to_string(), AttributeType::Timeuuid),
            ("body".to_string(), AttributeType::String),
        ]),
        index: vec![
            IndexElement::hash("key"),
            IndexElement::range("tid", Some(Order::Desc)),
        ],
        secondary_indexes: BTreeMap::new(),
        options: TableOptions::default(),
        description: None,
    }
}

async fn put(
    engine: &StorageEngine,
    table: &str,
    key: &str,
    tid: Uuid,
    body: &str,
) -> rashomon_store::facade::PutOutcome {
    let mut attrs = BTreeMap::new();
    attrs.insert("key".to_string(), json!(key));
    attrs.insert("tid".to_string(), json!(tid.to_string()));
    attrs.insert("body".to_string(), json!(body));
    engine
        .put(
            DOMAIN,
            PutRequest {
                table: table.to_string(),
                attributes: attrs,
                if_condition: None,
                consistency: Consistency::One,
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn create_table_derives_the_documented_keyspace_name() {
    let engine = StorageEngine::new(Arc::new(FakeCqlDriver::new()));
    let schema = revisioned_schema("someTable");

    engine.create_table(DOMAIN, &schema).await.unwrap();

    assert_eq!(keyspace_name(DOMAIN, "someTable"), "org_wikipedia_en_T_someTable");
    let fetched = engine.get_schema(DOMAIN, "someTable").await.unwrap();
    assert_eq!(fetched.table, "someTable");
}

#[tokio::test]
async fn get_at_a_revision_returns_the_attributes_written_at_that_tid() {
    let engine = StorageEngine::new(Arc::new(FakeCqlDriver::new()));
    let schema = revisioned_schema("revisions");
    engine.create_table(DOMAIN, &schema).await.unwrap();

    let t1 = Uuid::new_v4();
    let t2 = Uuid::new_v4();
    put(&engine, "revisions", "testing", t1, "<p>v1</p>").await;
    put(&engine, "revisions", "testing", t2, "<p>hi</p>").await;

    let mut predicate = BTreeMap::new();
    predicate.insert("key".to_string(), json!("testing"));
    predicate.insert("tid".to_string(), json!(t2.to_string()));
    let result = engine
        .get(
            DOMAIN,
            GetRequest {
                table: "revisions".to_string(),
                index: None,
                attributes: predicate,
                proj: Proj::All,
                order: None,
                limit: None,
                consistency: Consistency::One,
            },
        )
        .await
        .unwrap();

    assert_eq!(result.count, 1);
    assert_eq!(result.items[0].get("body"), Some(&json!("<p>hi</p>")));
}

#[tokio::test]
async fn between_predicate_on_the_range_key_bounds_the_revision_window() {
    let engine = StorageEngine::new(Arc::new(FakeCqlDriver::new()));
    let schema = revisioned_schema("revisions");
    engine.create_table(DOMAIN, &schema).await.unwrap();

    let t0 = Uuid::new_v4();
    let t1 = Uuid::new_v4();
    let t2 = Uuid::new_v4();
    put(&engine, "revisions", "testing", t0, "<p>v0</p>").await;
    put(&engine, "revisions", "testing", t1, "<p>v1</p>").await;
    put(&engine, "revisions", "testing", t2, "<p>v2</p>").await;

    let mut predicate = BTreeMap::new();
    predicate.insert("key".to_string(), json!("testing"));
    predicate.insert(
        "tid".to_string(),
        json!({"between": [t0.to_string(), t1.to_string()]}),
    );
    let result = engine
        .get(
            DOMAIN,
            GetRequest {
                table: "revisions".to_string(),
                index: None,
                attributes: predicate,
                proj: Proj::All,
                order: None,
                limit: Some(3),
                consistency: Consistency::One,
            },
        )
        .await
        .unwrap();

    assert_eq!(result.count, 1);
    assert_eq!(result.items[0].get("body"), Some(&json!("<p>v1</p>")));
}

#[tokio::test]
async fn conditional_put_fails_on_the_second_identical_write() {
    let engine = StorageEngine::new(Arc::new(FakeCqlDriver::new()));
    let schema = revisioned_schema("revisions");
    engine.create_table(DOMAIN, &schema).await.unwrap();

    let tid = Uuid::new_v4();
    let mut attrs = BTreeMap::new();
    attrs.insert("key".to_string(), json!("testing"));
    attrs.insert("tid".to_string(), json!(tid.to_string()));
    attrs.insert("body".to_string(), json!("<p>v1</p>"));

    let first = engine
        .put(
            DOMAIN,
            PutRequest {
                table: "revisions".to_string(),
                attributes: attrs.clone(),
                if_condition: Some(PutCondition::NotExists),
                consistency: Consistency::One,
            },
        )
        .await
        .unwrap();
    assert_eq!(first, rashomon_store::facade::PutOutcome::Created);

    let second = engine
        .put(
            DOMAIN,
            PutRequest {
                table: "revisions".to_string(),
                attributes: attrs,
                if_condition: Some(PutCondition::NotExists),
                consistency: Consistency::One,
            },
        )
        .await
        .unwrap();
    assert_eq!(second, rashomon_store::facade::PutOutcome::ConditionFailed);
}

#[tokio::test]
async fn secondary_index_read_repairs_away_the_old_projection_after_an_overwrite() {
    let engine = StorageEngine::new(Arc::new(FakeCqlDriver::new()));
    let schema = TableSchema {
        domain: DOMAIN.to_string(),
        table: "pages".to_string(),
        attributes: BTreeMap::from([
            ("key".to_string(), AttributeType::String),
            ("uri".to_string(), AttributeType::String),
            ("body".to_string(), AttributeType::String),
        ]),
        index: vec![IndexElement::hash("key")],
        secondary_indexes: BTreeMap::from([(
            "by_uri".to_string(),
            vec![SecondaryIndexElement::hash("uri"), SecondaryIndexElement::proj("body")],
        )]),
        options: TableOptions::default(),
        description: None,
    };
    engine.create_table(DOMAIN, &schema).await.unwrap();

    let mut attrs = BTreeMap::new();
    attrs.insert("key".to_string(), json!("testing"));
    attrs.insert("uri".to_string(), json!("/wiki/Old_Title"));
    attrs.insert("body".to_string(), json!("<p>hi</p>"));
    engine
        .put(
            DOMAIN,
            PutRequest {
                table: "pages".to_string(),
                attributes: attrs,
                if_condition: None,
                consistency: Consistency::One,
            },
        )
        .await
        .unwrap();

    let by_old_uri = |uri: &str| {
        let mut predicate = BTreeMap::new();
        predicate.insert("uri".to_string(), json!(uri));
        predicate
    };

    let found = engine
        .get(
            DOMAIN,
            GetRequest {
                table: "pages".to_string(),
                index: Some("by_uri".to_string()),
                attributes: by_old_uri("/wiki/Old_Title"),
                proj: Proj::All,
                order: None,
                limit: None,
                consistency: Consistency::One,
            },
        )
        .await
        .unwrap();
    assert_eq!(found.count, 1);

    let mut rewrite = BTreeMap::new();
    rewrite.insert("key".to_string(), json!("testing"));
    rewrite.insert("uri".to_string(), json!("/wiki/New_Title"));
    rewrite.insert("body".to_string(), json!("<p>hi</p>"));
    engine
        .put(
            DOMAIN,
            PutRequest {
                table: "pages".to_string(),
                attributes: rewrite,
                if_condition: None,
                consistency: Consistency::One,
            },
        )
        .await
        .unwrap();

    // The repair pass after the rewrite runs as a detached task; give it a
    // chance to run before checking whether it tombstoned the old entry.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let stale = engine
        .get(
            DOMAIN,
            GetRequest {
                table: "pages".to_string(),
                index: Some("by_uri".to_string()),
                attributes: by_old_uri("/wiki/Old_Title"),
                proj: Proj::All,
                order: None,
                limit: None,
                consistency: Consistency::One,
            },
        )
        .await
        .unwrap();
    assert_eq!(stale.count, 0, "old uri entry should have been read-repaired away");

    let fresh = engine
        .get(
            DOMAIN,
            GetRequest {
                table: "pages".to_string(),
                index: Some("by_uri".to_string()),
                attributes: by_old_uri("/wiki/New_Title"),
                proj: Proj::All,
                order: None,
                limit: None,
                consistency: Consistency::One,
            },
        )
        .await
        .unwrap();
    assert_eq!(fresh.count, 1);
    assert_eq!(fresh.items[0].get("body"), Some(&json!("<p>hi</p>")));
}

#[tokio::test]
async fn drop_table_then_get_schema_is_not_found() {
    let engine = StorageEngine::new(Arc::new(FakeCqlDriver::new()));
    let schema = revisioned_schema("revisions");
    engine.create_table(DOMAIN, &schema).await.unwrap();

    engine.drop_table(DOMAIN, "revisions").await.unwrap();

    let err = engine.get_schema(DOMAIN, "revisions").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn delete_removes_the_row_at_the_primary_key() {
    let engine = StorageEngine::new(Arc::new(FakeCqlDriver::new()));
    let schema = revisioned_schema("revisions");
    engine.create_table(DOMAIN, &schema).await.unwrap();

    let tid = Uuid::new_v4();
    put(&engine, "revisions", "testing", tid, "<p>hi</p>").await;

    let mut primary_key = BTreeMap::new();
    primary_key.insert("key".to_string(), json!("testing"));
    primary_key.insert("tid".to_string(), json!(tid.to_string()));
    engine
        .delete(
            DOMAIN,
            DeleteRequest {
                table: "revisions".to_string(),
                primary_key: primary_key.clone(),
                consistency: Consistency::One,
            },
        )
        .await
        .unwrap();

    let result = engine
        .get(
            DOMAIN,
            GetRequest {
                table: "revisions".to_string(),
                index: None,
                attributes: primary_key,
                proj: Proj::All,
                order: None,
                limit: None,
                consistency: Consistency::One,
            },
        )
        .await
        .unwrap();
    assert_eq!(result.count, 0);
}
