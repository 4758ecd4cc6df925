use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::entity::replicated_record::{
    ActiveModel, Column, Entity as ReplicatedRecord, Model, encode_key,
};
use crate::normalize::{NormalizedRecord, RecordKey};
use crate::provider::ProviderKey;

use super::{BatchOutcome, BatchUpserter, ErrorKind, UpsertPolicy, is_transient_db_error};

/// Rows per `INSERT ... ON CONFLICT` statement. Keeps SQLite under its
/// bound-parameter limit.
pub const WRITE_CHUNK_SIZE: usize = 500;

/// Keys per `IN (...)` lookup.
const LOOKUP_CHUNK_SIZE: usize = 500;

/// [`BatchUpserter`] over the `replicated_records` table, scoped to one
/// provider collection.
///
/// Existing rows are read first so unchanged records cost no write and the
/// outcome can tell inserts from modifications. With concurrent writers on
/// the same keys these counts are approximate; the stored state is not.
#[derive(Debug, Clone)]
pub struct SeaOrmRecordStore {
    db: Arc<DatabaseConnection>,
    scope: ProviderKey,
    policy: UpsertPolicy,
}

/// A planned write.
struct Pending {
    key: RecordKey,
    model: ActiveModel,
    is_new: bool,
}

impl SeaOrmRecordStore {
    pub fn new(
        db: impl Into<Arc<DatabaseConnection>>,
        scope: ProviderKey,
        policy: UpsertPolicy,
    ) -> Self {
        Self {
            db: db.into(),
            scope,
            policy,
        }
    }

    #[must_use]
    pub fn scope(&self) -> &ProviderKey {
        &self.scope
    }

    /// Number of stored records in this collection.
    pub async fn count(&self) -> super::Result<u64> {
        Ok(ReplicatedRecord::find()
            .filter(Column::Provider.eq(self.scope.provider.as_str()))
            .filter(Column::Collection.eq(self.scope.collection.as_str()))
            .count(self.db.as_ref())
            .await?)
    }

    /// The stored row for `key`.
    pub async fn get(&self, key: &RecordKey) -> super::Result<Option<Model>> {
        Ok(ReplicatedRecord::find()
            .filter(Column::Provider.eq(self.scope.provider.as_str()))
            .filter(Column::Collection.eq(self.scope.collection.as_str()))
            .filter(Column::RecordKey.eq(encode_key(key)))
            .one(self.db.as_ref())
            .await?)
    }

    async fn existing(&self, keys: &[String]) -> Result<HashMap<String, Model>, DbErr> {
        let mut found = HashMap::with_capacity(keys.len());
        for chunk in keys.chunks(LOOKUP_CHUNK_SIZE) {
            let rows = ReplicatedRecord::find()
                .filter(Column::Provider.eq(self.scope.provider.as_str()))
                .filter(Column::Collection.eq(self.scope.collection.as_str()))
                .filter(Column::RecordKey.is_in(chunk.iter().cloned()))
                .all(self.db.as_ref())
                .await?;
            found.extend(rows.into_iter().map(|row| (row.record_key.clone(), row)));
        }
        Ok(found)
    }

    /// Plan the write for `record`; `None` when the stored row is already current.
    fn plan(&self, record: NormalizedRecord, encoded: String, existing: Option<&Model>) -> Option<Pending> {
        let fields = match (self.policy, existing) {
            (UpsertPolicy::Merge, Some(row)) => {
                let mut merged = row.document();
                merged.merge_from(record.fields);
                merged
            }
            _ => record.fields,
        };
        let content_hash = fields.digest();
        let modified_at = record.modified_at.map(|t| t.fixed_offset());

        if let Some(row) = existing
            && row.content_hash == content_hash
            && row.modified_at == modified_at
        {
            return None;
        }

        let now = Utc::now().fixed_offset();
        Some(Pending {
            key: record.key,
            is_new: existing.is_none(),
            model: ActiveModel {
                id: Set(existing.map_or_else(Uuid::new_v4, |row| row.id)),
                provider: Set(self.scope.provider.clone()),
                collection: Set(self.scope.collection.clone()),
                record_key: Set(encoded),
                modified_at: Set(modified_at),
                fields: Set(fields.to_storage_json()),
                content_hash: Set(content_hash),
                first_seen_at: Set(existing.map_or(now, |row| row.first_seen_at)),
                synced_at: Set(now),
            },
        })
    }

    async fn write_chunk(&self, chunk: Vec<Pending>, outcome: &mut BatchOutcome) {
        let models: Vec<ActiveModel> = chunk.iter().map(|p| p.model.clone()).collect();

        match ReplicatedRecord::insert_many(models)
            .on_conflict(build_upsert_on_conflict())
            .exec_without_returning(self.db.as_ref())
            .await
        {
            Ok(_) => tally(outcome, &chunk),
            Err(err) if is_transient_db_error(&err) => {
                tracing::warn!(
                    scope = %self.scope,
                    count = chunk.len(),
                    error = %err,
                    "Bulk upsert hit a transient store error"
                );
                outcome
                    .failed
                    .extend(chunk.into_iter().map(|p| (p.key, ErrorKind::StoreUnavailable)));
            }
            Err(err) => {
                // Isolate the offending rows so the rest still commit.
                tracing::debug!(
                    scope = %self.scope,
                    count = chunk.len(),
                    error = %err,
                    "Bulk upsert failed, falling back to per-record writes"
                );
                for pending in chunk {
                    self.write_one(pending, outcome).await;
                }
            }
        }
    }

    async fn write_one(&self, pending: Pending, outcome: &mut BatchOutcome) {
        let result = ReplicatedRecord::insert(pending.model.clone())
            .on_conflict(build_upsert_on_conflict())
            .exec_without_returning(self.db.as_ref())
            .await;

        match result {
            Ok(_) => tally(outcome, std::slice::from_ref(&pending)),
            Err(err) => {
                let kind = if is_transient_db_error(&err) {
                    ErrorKind::StoreUnavailable
                } else {
                    ErrorKind::Rejected {
                        reason: err.to_string(),
                    }
                };
                outcome.failed.push((pending.key, kind));
            }
        }
    }
}

fn tally(outcome: &mut BatchOutcome, written: &[Pending]) {
    for pending in written {
        if pending.is_new {
            outcome.upserted += 1;
        } else {
            outcome.modified += 1;
        }
    }
}

/// Conflict target is the natural key; `id` and `first_seen_at` keep their
/// original values.
pub(crate) fn build_upsert_on_conflict() -> OnConflict {
    OnConflict::columns([Column::Provider, Column::Collection, Column::RecordKey])
        .update_columns([
            Column::ModifiedAt,
            Column::Fields,
            Column::ContentHash,
            Column::SyncedAt,
        ])
        .to_owned()
}

#[async_trait]
impl BatchUpserter for SeaOrmRecordStore {
    async fn upsert(&self, batch: Vec<NormalizedRecord>) -> BatchOutcome {
        if batch.is_empty() {
            return BatchOutcome::default();
        }

        let attempted = batch.len();
        let submitted: Vec<RecordKey> = batch.iter().map(|r| r.key.clone()).collect();

        // Same key twice: the later occurrence wins.
        let mut latest: HashMap<String, NormalizedRecord> = HashMap::with_capacity(batch.len());
        let mut order: Vec<String> = Vec::with_capacity(batch.len());
        for record in batch {
            let encoded = encode_key(&record.key);
            if latest.insert(encoded.clone(), record).is_none() {
                order.push(encoded);
            }
        }

        let existing = match self.existing(&order).await {
            Ok(existing) => existing,
            Err(err) => {
                tracing::warn!(scope = %self.scope, error = %err, "Could not read existing records");
                return BatchOutcome {
                    attempted,
                    failed: submitted
                        .into_iter()
                        .map(|key| (key, ErrorKind::StoreUnavailable))
                        .collect(),
                    ..BatchOutcome::default()
                };
            }
        };

        let pending: Vec<Pending> = order
            .into_iter()
            .filter_map(|encoded| {
                let record = latest.remove(&encoded)?;
                self.plan(record, encoded.clone(), existing.get(&encoded))
            })
            .collect();

        let mut outcome = BatchOutcome {
            attempted,
            ..BatchOutcome::default()
        };

        let mut pending = pending.into_iter().peekable();
        while pending.peek().is_some() {
            let chunk: Vec<Pending> = pending.by_ref().take(WRITE_CHUNK_SIZE).collect();
            self.write_chunk(chunk, &mut outcome).await;
        }

        tracing::debug!(
            scope = %self.scope,
            attempted = outcome.attempted,
            upserted = outcome.upserted,
            modified = outcome.modified,
            failed = outcome.failed.len(),
            "Batch upserted"
        );
        outcome
    }
}
