//! In-process stores for dry runs and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::document::Document;
use crate::normalize::{NormalizedRecord, RecordKey};
use crate::provider::ProviderKey;
use crate::sync::{Cursor, CursorTracker, PersistError};

use super::{BatchOutcome, BatchUpserter, ErrorKind, UpsertPolicy};

/// Decides whether the store refuses a record; `Some(reason)` rejects it.
pub type RecordValidator = Arc<dyn Fn(&NormalizedRecord) -> Option<String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub modified_at: Option<DateTime<Utc>>,
    pub fields: Document,
    pub content_hash: String,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// [`BatchUpserter`] keeping records in a map.
///
/// Clones share state. Outages can be simulated with
/// [`fail_next_batches`](Self::fail_next_batches) and per-record refusals
/// with a validator.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<BTreeMap<RecordKey, StoredRecord>>>,
    policy: UpsertPolicy,
    validator: Option<RecordValidator>,
    unavailable_batches: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new(policy: UpsertPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_validator(mut self, validator: RecordValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Report the next `count` batches as wholly unavailable.
    pub fn fail_next_batches(&self, count: usize) {
        self.unavailable_batches.store(count, Ordering::SeqCst);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, key: &RecordKey) -> Option<StoredRecord> {
        lock(&self.records).get(key).cloned()
    }

    /// Every stored record, ordered by key.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<RecordKey, StoredRecord> {
        lock(&self.records).clone()
    }

    /// Number of `upsert` calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn take_outage(&self) -> bool {
        self.unavailable_batches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BatchUpserter for MemoryStore {
    async fn upsert(&self, batch: Vec<NormalizedRecord>) -> BatchOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.take_outage() {
            return BatchOutcome::all_failed(&batch, ErrorKind::StoreUnavailable);
        }

        let mut outcome = BatchOutcome {
            attempted: batch.len(),
            ..BatchOutcome::default()
        };
        let mut records = lock(&self.records);

        for record in batch {
            if let Some(reason) = self.validator.as_ref().and_then(|v| v(&record)) {
                outcome.failed.push((record.key, ErrorKind::Rejected { reason }));
                continue;
            }

            let existing = records.get(&record.key);
            let fields = match (self.policy, existing) {
                (UpsertPolicy::Merge, Some(stored)) => {
                    let mut merged = stored.fields.clone();
                    merged.merge_from(record.fields);
                    merged
                }
                _ => record.fields,
            };
            let content_hash = fields.digest();

            match existing {
                Some(stored)
                    if stored.content_hash == content_hash
                        && stored.modified_at == record.modified_at => {}
                Some(_) => outcome.modified += 1,
                None => outcome.upserted += 1,
            }

            records.insert(
                record.key,
                StoredRecord {
                    modified_at: record.modified_at,
                    fields,
                    content_hash,
                },
            );
        }

        outcome
    }
}

/// [`CursorTracker`] keeping every committed cursor, in commit order.
#[derive(Clone, Default)]
pub struct MemoryCursorTracker {
    history: Arc<Mutex<HashMap<ProviderKey, Vec<Cursor>>>>,
    failing_commits: Arc<AtomicUsize>,
}

impl MemoryCursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an already committed cursor.
    pub fn seeded(key: ProviderKey, cursor: Cursor) -> Self {
        let tracker = Self::default();
        lock(&tracker.history).insert(key, vec![cursor]);
        tracker
    }

    /// Fail the next `count` commits with a transient error.
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Every committed cursor for `key`, oldest first.
    #[must_use]
    pub fn history(&self, key: &ProviderKey) -> Vec<Cursor> {
        lock(&self.history).get(key).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn latest(&self, key: &ProviderKey) -> Option<Cursor> {
        lock(&self.history).get(key).and_then(|h| h.last().cloned())
    }
}

#[async_trait]
impl CursorTracker for MemoryCursorTracker {
    async fn load(&self, key: &ProviderKey) -> Result<Cursor, PersistError> {
        Ok(self.latest(key).unwrap_or_default())
    }

    async fn commit(&self, key: &ProviderKey, cursor: &Cursor) -> Result<(), PersistError> {
        if self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PersistError::Timeout(std::time::Duration::ZERO));
        }
        lock(&self.history)
            .entry(key.clone())
            .or_default()
            .push(cursor.clone());
        Ok(())
    }
}
