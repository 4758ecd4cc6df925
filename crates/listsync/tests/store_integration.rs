//! Store and cursor persistence against a migrated in-memory SQLite database.

#![cfg(all(feature = "sqlite", feature = "migrate"))]

mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use listsync::connect_and_migrate;
use listsync::normalize::{NormalizedRecord, RecordKey};
use listsync::provider::{PageResponse, ProviderKey};
use listsync::store::{MemoryStore, SeaOrmCursorTracker, SeaOrmRecordStore};
use listsync::sync::{ConcurrentUploadPool, Cursor, CursorTracker, SyncOptions, WalkState};
use listsync::{BatchUpserter, Document, UpsertPolicy};
use sea_orm::DatabaseConnection;
use serde_json::json;

use common::{ScriptedFetcher, listing};

async fn setup_test_db() -> Arc<DatabaseConnection> {
    let db = connect_and_migrate("sqlite::memory:")
        .await
        .expect("Failed to create test database");
    Arc::new(db)
}

fn record(key: i64, fields: serde_json::Value) -> NormalizedRecord {
    NormalizedRecord {
        key: RecordKey::Int(key),
        modified_at: Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
        fields: Document::from_json(&fields),
    }
}

fn five_listings() -> Vec<NormalizedRecord> {
    (1..=5)
        .map(|k| record(k, json!({ "ListPrice": k * 1000, "City": "Chicago" })))
        .collect()
}

fn record_store(db: &Arc<DatabaseConnection>, policy: UpsertPolicy) -> SeaOrmRecordStore {
    SeaOrmRecordStore::new(db.clone(), ProviderKey::new("bridge", "Property"), policy)
}

#[tokio::test]
async fn identical_batch_twice_changes_nothing() {
    let db = setup_test_db().await;
    let store = record_store(&db, UpsertPolicy::Replace);

    let first = store.upsert(five_listings()).await;
    assert_eq!(first.upserted, 5);
    assert_eq!(first.modified, 0);
    assert!(first.failed.is_empty());

    let before = store.get(&RecordKey::Int(3)).await.expect("get").expect("row");

    let second = store.upsert(five_listings()).await;
    assert_eq!(second.attempted, 5);
    assert_eq!(second.upserted, 0);
    assert_eq!(second.modified, 0);
    assert_eq!(second.unchanged(), 5);

    let after = store.get(&RecordKey::Int(3)).await.expect("get").expect("row");
    assert_eq!(after, before);
    assert_eq!(store.count().await.expect("count"), 5);
}

#[tokio::test]
async fn changed_record_is_modified_in_place() {
    let db = setup_test_db().await;
    let store = record_store(&db, UpsertPolicy::Replace);
    store.upsert(five_listings()).await;
    let original = store.get(&RecordKey::Int(2)).await.expect("get").expect("row");

    let outcome = store
        .upsert(vec![record(2, json!({ "ListPrice": 2500 }))])
        .await;

    assert_eq!(outcome.upserted, 0);
    assert_eq!(outcome.modified, 1);
    let row = store.get(&RecordKey::Int(2)).await.expect("get").expect("row");
    assert_eq!(row.id, original.id);
    assert_eq!(row.first_seen_at, original.first_seen_at);
    assert_ne!(row.content_hash, original.content_hash);
    let fields = row.document();
    assert_eq!(fields.get("ListPrice"), Some(&Document::Integer(2500)));
    assert!(fields.get("City").is_none());
}

#[tokio::test]
async fn merge_policy_keeps_absent_fields() {
    let db = setup_test_db().await;
    let store = record_store(&db, UpsertPolicy::Merge);
    store.upsert(five_listings()).await;

    let outcome = store
        .upsert(vec![record(4, json!({ "ListPrice": 4200, "Beds": 3 }))])
        .await;

    assert_eq!(outcome.modified, 1);
    let fields = store
        .get(&RecordKey::Int(4))
        .await
        .expect("get")
        .expect("row")
        .document();
    assert_eq!(fields.get("ListPrice"), Some(&Document::Integer(4200)));
    assert_eq!(fields.get("Beds"), Some(&Document::Integer(3)));
    assert_eq!(fields.get("City"), Some(&Document::Text("Chicago".into())));
}

#[tokio::test]
async fn decimals_survive_storage() {
    let db = setup_test_db().await;
    let store = record_store(&db, UpsertPolicy::Replace);
    let raw: serde_json::Value =
        serde_json::from_str(r#"{"ListPrice": 425000.50, "Rooms": [{"Area": 12.75}]}"#)
            .expect("json");

    store.upsert(vec![record(9, raw.clone())]).await;

    let fields = store
        .get(&RecordKey::Int(9))
        .await
        .expect("get")
        .expect("row")
        .document();
    assert_eq!(fields, Document::from_json(&raw));
}

#[tokio::test]
async fn keys_are_scoped_by_collection() {
    let db = setup_test_db().await;
    let property = record_store(&db, UpsertPolicy::Replace);
    let member = SeaOrmRecordStore::new(
        db.clone(),
        ProviderKey::new("bridge", "Member"),
        UpsertPolicy::Replace,
    );

    property.upsert(five_listings()).await;
    let outcome = member.upsert(five_listings()).await;

    assert_eq!(outcome.upserted, 5);
    assert_eq!(property.count().await.expect("count"), 5);
    assert_eq!(member.count().await.expect("count"), 5);
}

#[tokio::test]
async fn one_rejected_record_in_a_thousand() {
    let store = MemoryStore::default().with_validator(Arc::new(|r: &NormalizedRecord| {
        (r.key == RecordKey::Int(500)).then(|| "ListPrice out of range".to_string())
    }));
    let pool = ConcurrentUploadPool::new(Arc::new(store.clone()))
        .with_batch_size(100)
        .with_max_concurrency(4);
    let records = (1..=1000)
        .map(|k| record(k, json!({ "ListPrice": k })))
        .collect();

    let outcome = pool.run(records).await;

    assert_eq!(outcome.attempted, 1000);
    assert_eq!(outcome.upserted, 999);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].0, RecordKey::Int(500));
    assert_eq!(store.len(), 999);
}

#[tokio::test]
async fn cursor_commit_overwrites_single_row() {
    let db = setup_test_db().await;
    let tracker = SeaOrmCursorTracker::new(db);
    let key = ProviderKey::new("bridge", "Property");

    assert!(tracker.load(&key).await.expect("load").is_fresh());

    let mut cursor = Cursor {
        offset: 200,
        last_record_key: Some(RecordKey::Int(200)),
        last_modified_at: Some(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()),
        provider_state: WalkState {
            continuation: Some("https://api.example.com/Property?$skip=200".into()),
            ..WalkState::default()
        },
    };
    tracker.commit(&key, &cursor).await.expect("commit");
    assert_eq!(tracker.load(&key).await.expect("load"), cursor);

    cursor.offset = 400;
    cursor.provider_state.complete = true;
    tracker.commit(&key, &cursor).await.expect("commit");

    assert_eq!(tracker.load(&key).await.expect("load"), cursor);
    let all = tracker.list().await.expect("list");
    assert_eq!(all, vec![(key, cursor)]);
}

#[tokio::test]
async fn cursor_reset_removes_only_its_collection() {
    let db = setup_test_db().await;
    let tracker = SeaOrmCursorTracker::new(db);
    let cursor = Cursor {
        offset: 10,
        ..Cursor::default()
    };
    let keys = [
        ("bridge", "Property"),
        ("bridge", "Member"),
        ("trestle", "Property"),
    ];
    for (provider, collection) in keys {
        tracker
            .commit(&ProviderKey::new(provider, collection), &cursor)
            .await
            .expect("commit");
    }

    assert!(
        tracker
            .reset(&ProviderKey::new("trestle", "Property"))
            .await
            .expect("reset")
    );
    assert!(
        !tracker
            .reset(&ProviderKey::new("trestle", "Property"))
            .await
            .expect("reset")
    );
    assert_eq!(tracker.list().await.expect("list").len(), 2);

    assert_eq!(tracker.reset_provider("bridge").await.expect("reset"), 2);
    assert!(tracker.list().await.expect("list").is_empty());
}

#[tokio::test]
async fn engine_persists_through_sqlite_with_concurrent_batches() {
    let db = setup_test_db().await;
    let records = (1..=100).map(|id| listing(id, id)).collect();
    let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(PageResponse {
        records,
        next_link: None,
    })]));
    let store = Arc::new(SeaOrmRecordStore::new(
        db.clone(),
        common::key(),
        UpsertPolicy::Replace,
    ));
    let cursors = Arc::new(SeaOrmCursorTracker::new(db.clone()));
    let options = SyncOptions {
        batch_size: 10,
        max_concurrency: 4,
        ..SyncOptions::default()
    };
    let engine = common::engine(
        common::config(200),
        fetcher,
        store.clone(),
        cursors.clone(),
        options,
    );

    let run = engine.run(None).await;

    assert!(run.succeeded(), "{:?}", run.errors);
    assert_eq!(run.records_upserted, 100);
    assert_eq!(store.count().await.expect("count"), 100);
    let cursor = cursors.load(&common::key()).await.expect("load");
    assert_eq!(cursor.offset, 100);
    assert!(cursor.provider_state.complete);

    let row = store
        .get(&RecordKey::Int(42))
        .await
        .expect("get")
        .expect("row");
    assert!(row.document().get("@odata.id").is_none());
    assert_eq!(
        row.document().get("City"),
        Some(&Document::Text("Chicago".into()))
    );
}
