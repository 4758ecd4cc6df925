//! End-to-end engine runs against simulated providers.
//!
//! Key scenarios tested:
//! - Multi-page walks commit a cursor per page and finish on the last page
//! - One malformed record never costs the rest of its page
//! - A cancelled run resumes from its committed cursor without gaps
//! - Offset limits are worked around by reseeding, visiting each record once
//! - Completed walks continue incrementally from the newest record

#![cfg(all(feature = "sqlite", feature = "migrate"))]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use listsync::connect_and_migrate;
use listsync::provider::{PageResponse, ProviderConfig};
use listsync::store::{MemoryCursorTracker, MemoryStore, SeaOrmCursorTracker, SeaOrmRecordStore};
use listsync::sync::{
    CursorTracker, ProgressCallback, SyncOptions, SyncProgress, TerminalReason, sync_providers,
};
use listsync::{RecordKey, UpsertPolicy};
use serde_json::json;

use common::{BASE_URL, ODataFeed, ScriptedFetcher, listing};

/// If exceeded, the engine is likely stuck in a retry or paging loop.
const SYNC_TIMEOUT: Duration = Duration::from_secs(10);

/// Listings `1..=count`, four per timestamp so walks must break ties.
fn tied_listings(count: i64) -> Vec<serde_json::Value> {
    (1..=count).map(|id| listing(id, id / 4)).collect()
}

fn capped_config(page_size: u32, offset_limit: u64) -> ProviderConfig {
    ProviderConfig {
        offset_limit: Some(offset_limit),
        ..common::config(page_size)
    }
}

#[tokio::test]
async fn three_full_pages_then_no_continuation() {
    let db = Arc::new(
        connect_and_migrate("sqlite::memory:")
            .await
            .expect("Failed to create test database"),
    );

    let pages = (0..3)
        .map(|p: i64| {
            Ok(PageResponse {
                records: (1..=200).map(|i| listing(p * 200 + i, p * 200 + i)).collect(),
                next_link: (p < 2).then(|| format!("{BASE_URL}?$skip={}", (p + 1) * 200)),
            })
        })
        .collect();
    let fetcher = Arc::new(ScriptedFetcher::new(pages));
    let store = Arc::new(SeaOrmRecordStore::new(
        db.clone(),
        common::key(),
        UpsertPolicy::Replace,
    ));
    let cursors = Arc::new(SeaOrmCursorTracker::new(db.clone()));
    let config = ProviderConfig {
        follow_next_link: true,
        ..common::config(200)
    };
    let engine = common::engine(
        config,
        fetcher.clone(),
        store.clone(),
        cursors.clone(),
        SyncOptions::default(),
    );

    let run = tokio::time::timeout(SYNC_TIMEOUT, engine.run(None))
        .await
        .expect("sync run timed out");

    assert_eq!(run.terminal_reason, Some(TerminalReason::Completed));
    assert_eq!(run.records_upserted, 600);
    assert_eq!(run.records_failed, 0);
    assert_eq!(run.pages_fetched, 3);
    assert_eq!(run.last_cursor.offset, 600);
    assert_eq!(fetcher.requests().len(), 3);

    assert_eq!(store.count().await.expect("count"), 600);
    let stored = cursors.load(&common::key()).await.expect("load cursor");
    assert_eq!(stored.offset, 600);
    assert!(stored.provider_state.complete);
    assert_eq!(stored.last_record_key, Some(RecordKey::Int(600)));
}

#[tokio::test]
async fn one_malformed_record_does_not_cost_the_page() {
    let mut records: Vec<_> = (1..=999).map(|id| listing(id, id)).collect();
    records.insert(500, json!({ "ModificationTimestamp": "2024-06-02T00:00:00Z" }));
    let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(PageResponse {
        records,
        next_link: None,
    })]));
    let store = MemoryStore::default();
    let cursors = MemoryCursorTracker::new();
    let engine = common::memory_engine(common::config(1000), fetcher, &store, &cursors);

    let run = tokio::time::timeout(SYNC_TIMEOUT, engine.run(None))
        .await
        .expect("sync run timed out");

    assert!(run.succeeded());
    assert_eq!(run.records_seen, 1000);
    assert_eq!(run.records_upserted, 999);
    assert_eq!(run.records_skipped, 1);
    assert_eq!(run.records_failed, 0);
    assert_eq!(run.errors.len(), 1);
    assert!(run.errors[0].contains("ListingKeyNumeric"));
    assert_eq!(store.len(), 999);
    assert_eq!(run.last_cursor.offset, 1000);
}

#[tokio::test]
async fn cancelled_run_resumes_without_gaps() {
    let feed = Arc::new(ODataFeed::new((1..=10).map(|id| listing(id, id)).collect()));
    let store = MemoryStore::default();
    let cursors = MemoryCursorTracker::new();

    let first = common::memory_engine(common::config(3), feed.clone(), &store, &cursors);
    let flag = first.cancellation();
    let commits = AtomicUsize::new(0);
    let stop_after_two: ProgressCallback = Box::new(move |event| {
        if let SyncProgress::CursorCommitted { .. } = event
            && commits.fetch_add(1, Ordering::SeqCst) + 1 == 2
        {
            flag.cancel();
        }
    });

    let interrupted = tokio::time::timeout(SYNC_TIMEOUT, first.run(Some(&stop_after_two)))
        .await
        .expect("sync run timed out");

    assert_eq!(interrupted.terminal_reason, Some(TerminalReason::Cancelled));
    assert_eq!(interrupted.last_cursor.offset, 6);
    assert_eq!(store.len(), 6);

    let second = common::memory_engine(common::config(3), feed.clone(), &store, &cursors);
    let resumed = tokio::time::timeout(SYNC_TIMEOUT, second.run(None))
        .await
        .expect("sync run timed out");

    assert_eq!(resumed.terminal_reason, Some(TerminalReason::Completed));
    assert_eq!(resumed.records_upserted, 4);
    assert_eq!(store.len(), 10);
    assert_eq!(feed.served(), 10);
}

#[tokio::test]
async fn offset_limit_reseeds_and_visits_each_record_once() {
    let feed = Arc::new(ODataFeed::new(tied_listings(50)).with_skip_limit(10));
    let store = MemoryStore::default();
    let cursors = MemoryCursorTracker::new();
    let engine = common::memory_engine(capped_config(5, 10), feed.clone(), &store, &cursors);

    let run = tokio::time::timeout(SYNC_TIMEOUT, engine.run(None))
        .await
        .expect("sync run timed out");

    assert_eq!(run.terminal_reason, Some(TerminalReason::Completed));
    assert_eq!(run.records_upserted, 50);
    assert_eq!(run.records_modified, 0);
    assert_eq!(run.records_unchanged, 0);
    assert_eq!(run.reseeds, 5);
    assert_eq!(feed.served(), 50);
    assert_eq!(store.len(), 50);

    // The watermark pair never moves backwards.
    let history = cursors.history(&common::key());
    let marks: Vec<_> = history
        .iter()
        .map(|c| (c.last_modified_at, c.last_record_key.clone()))
        .collect();
    assert!(marks.windows(2).all(|w| w[0] <= w[1]), "{marks:?}");
    assert_eq!(marks.last().and_then(|m| m.1.clone()), Some(RecordKey::Int(50)));
}

#[tokio::test]
async fn offset_limit_without_key_order_redelivers_only_the_seam() {
    let feed = Arc::new(ODataFeed::new(tied_listings(50)).with_skip_limit(10));
    let store = MemoryStore::default();
    let cursors = MemoryCursorTracker::new();
    let config = ProviderConfig {
        key_tiebreak: false,
        ..capped_config(5, 10)
    };
    let engine = common::memory_engine(config, feed.clone(), &store, &cursors);

    let run = tokio::time::timeout(SYNC_TIMEOUT, engine.run(None))
        .await
        .expect("sync run timed out");

    assert_eq!(run.terminal_reason, Some(TerminalReason::Completed));
    assert_eq!(store.len(), 50);
    assert_eq!(run.records_upserted, 50);
    assert!(feed.served() > 50);
    assert_eq!(run.records_seen, feed.served());
    assert_eq!(run.records_unchanged, feed.served() - 50);
}

#[tokio::test]
async fn continuation_links_past_the_limit_trigger_reseed() {
    let feed = Arc::new(
        ODataFeed::new(tied_listings(30))
            .with_skip_limit(10)
            .with_next_links(),
    );
    let store = MemoryStore::default();
    let cursors = MemoryCursorTracker::new();
    let config = ProviderConfig {
        follow_next_link: true,
        ..capped_config(5, 10)
    };
    let engine = common::memory_engine(config, feed.clone(), &store, &cursors);

    let run = tokio::time::timeout(SYNC_TIMEOUT, engine.run(None))
        .await
        .expect("sync run timed out");

    assert_eq!(run.terminal_reason, Some(TerminalReason::Completed));
    assert_eq!(store.len(), 30);
    assert_eq!(feed.served(), 30);
    assert!(run.reseeds >= 2);
}

#[tokio::test]
async fn completed_walk_continues_incrementally() {
    let store = MemoryStore::default();
    let cursors = MemoryCursorTracker::new();

    let initial = Arc::new(ODataFeed::new((1..=20).map(|id| listing(id, id)).collect()));
    let first = common::memory_engine(common::config(5), initial, &store, &cursors);
    let run = tokio::time::timeout(SYNC_TIMEOUT, first.run(None))
        .await
        .expect("sync run timed out");
    assert!(run.succeeded());
    assert_eq!(run.records_upserted, 20);

    // Nothing new: nothing fetched beyond one empty page.
    let unchanged = Arc::new(ODataFeed::new((1..=20).map(|id| listing(id, id)).collect()));
    let second = common::memory_engine(common::config(5), unchanged.clone(), &store, &cursors);
    let run = tokio::time::timeout(SYNC_TIMEOUT, second.run(None))
        .await
        .expect("sync run timed out");
    assert!(run.succeeded());
    assert_eq!(run.records_seen, 0);
    assert_eq!(unchanged.requests().len(), 1);

    // One listing modified, one added.
    let mut records: Vec<_> = (1..=20).map(|id| listing(id, id)).collect();
    records[2] = listing(3, 30);
    records.push(listing(21, 31));
    let updated = Arc::new(ODataFeed::new(records));
    let third = common::memory_engine(common::config(5), updated.clone(), &store, &cursors);
    let run = tokio::time::timeout(SYNC_TIMEOUT, third.run(None))
        .await
        .expect("sync run timed out");

    assert!(run.succeeded());
    assert_eq!(updated.served(), 2);
    assert_eq!(run.records_upserted, 1);
    assert_eq!(run.records_modified, 1);
    assert_eq!(store.len(), 21);
}

#[tokio::test]
async fn providers_run_side_by_side() {
    let store_a = MemoryStore::default();
    let store_b = MemoryStore::default();
    let cursors = MemoryCursorTracker::new();

    let feed_a = Arc::new(ODataFeed::new((1..=12).map(|id| listing(id, id)).collect()));
    let feed_b = Arc::new(ODataFeed::new((1..=7).map(|id| listing(id, id)).collect()));
    let engine_a = common::memory_engine(common::config(5), feed_a, &store_a, &cursors);
    let engine_b = common::memory_engine(
        ProviderConfig {
            name: "other".into(),
            ..common::config(5)
        },
        feed_b,
        &store_b,
        &cursors,
    );

    let finished = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&finished);
    let callback: ProgressCallback = Box::new(move |event| {
        if let SyncProgress::RunFinished { .. } = event {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let runs = tokio::time::timeout(
        SYNC_TIMEOUT,
        sync_providers(vec![engine_a, engine_b], Some(Arc::new(callback))),
    )
    .await
    .expect("sync runs timed out");

    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.succeeded()));
    assert_eq!(runs[0].provider, "feed");
    assert_eq!(runs[1].provider, "other");
    assert_eq!(store_a.len(), 12);
    assert_eq!(store_b.len(), 7);
    assert_eq!(finished.load(Ordering::SeqCst), 2);
}
