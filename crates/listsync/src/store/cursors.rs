use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use uuid::Uuid;

use crate::entity::replicated_record::encode_key;
use crate::entity::sync_cursor::{ActiveModel, Column, Entity as SyncCursor, Model};
use crate::provider::ProviderKey;
use crate::sync::{Cursor, CursorTracker, PersistError};

use super::StoreError;

/// [`CursorTracker`] over the `sync_cursors` table.
#[derive(Debug, Clone)]
pub struct SeaOrmCursorTracker {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmCursorTracker {
    pub fn new(db: impl Into<Arc<DatabaseConnection>>) -> Self {
        Self { db: db.into() }
    }

    /// Every stored cursor, ordered by provider and collection.
    pub async fn list(&self) -> super::Result<Vec<(ProviderKey, Cursor)>> {
        let rows = SyncCursor::find()
            .order_by_asc(Column::Provider)
            .order_by_asc(Column::Collection)
            .all(self.db.as_ref())
            .await?;

        rows.into_iter()
            .map(|row| {
                let cursor = decode(&row).map_err(|e| StoreError::Corrupt(e.to_string()))?;
                Ok((ProviderKey::new(row.provider, row.collection), cursor))
            })
            .collect()
    }

    /// Forget the cursor for `key`; the next run starts from scratch.
    /// Returns whether a cursor existed.
    pub async fn reset(&self, key: &ProviderKey) -> super::Result<bool> {
        let result = SyncCursor::delete_many()
            .filter(Column::Provider.eq(key.provider.as_str()))
            .filter(Column::Collection.eq(key.collection.as_str()))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Forget every cursor of `provider`. Returns the number removed.
    pub async fn reset_provider(&self, provider: &str) -> super::Result<u64> {
        let result = SyncCursor::delete_many()
            .filter(Column::Provider.eq(provider))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}

fn decode(row: &Model) -> Result<Cursor, serde_json::Error> {
    serde_json::from_value(row.state.clone())
}

fn to_active_model(key: &ProviderKey, cursor: &Cursor) -> Result<ActiveModel, PersistError> {
    let now = Utc::now().fixed_offset();
    Ok(ActiveModel {
        id: Set(Uuid::new_v4()),
        provider: Set(key.provider.clone()),
        collection: Set(key.collection.clone()),
        state: Set(serde_json::to_value(cursor)?),
        offset: Set(i64::try_from(cursor.offset).unwrap_or(i64::MAX)),
        last_modified_at: Set(cursor.last_modified_at.map(|t| t.fixed_offset())),
        last_record_key: Set(cursor.last_record_key.as_ref().map(encode_key)),
        complete: Set(cursor.provider_state.complete),
        updated_at: Set(now),
    })
}

fn build_on_conflict() -> OnConflict {
    OnConflict::columns([Column::Provider, Column::Collection])
        .update_columns([
            Column::State,
            Column::Offset,
            Column::LastModifiedAt,
            Column::LastRecordKey,
            Column::Complete,
            Column::UpdatedAt,
        ])
        .to_owned()
}

#[async_trait]
impl CursorTracker for SeaOrmCursorTracker {
    async fn load(&self, key: &ProviderKey) -> Result<Cursor, PersistError> {
        let row = SyncCursor::find()
            .filter(Column::Provider.eq(key.provider.as_str()))
            .filter(Column::Collection.eq(key.collection.as_str()))
            .one(self.db.as_ref())
            .await?;

        match row {
            Some(row) => Ok(decode(&row)?),
            None => Ok(Cursor::default()),
        }
    }

    async fn commit(&self, key: &ProviderKey, cursor: &Cursor) -> Result<(), PersistError> {
        SyncCursor::insert(to_active_model(key, cursor)?)
            .on_conflict(build_on_conflict())
            .exec_without_returning(self.db.as_ref())
            .await?;
        tracing::trace!(%key, offset = cursor.offset, "Cursor committed");
        Ok(())
    }
}
