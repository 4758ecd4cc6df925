//! ReplicatedRecord entity - one provider record, keyed by provider, collection and record key.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::normalize::RecordKey;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "replicated_records")]
pub struct Model {
    /// Internal UUID primary key.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    // ─── Identity ────────────────────────────────────────────────────────────
    pub provider: String,
    pub collection: String,
    /// `RecordKey` in its serde form, e.g. `{"int":42}` or `{"text":"A1"}`.
    #[sea_orm(column_type = "Text")]
    pub record_key: String,

    // ─── Content ─────────────────────────────────────────────────────────────
    /// Provider-side modification time.
    pub modified_at: Option<DateTimeWithTimeZone>,
    /// Fields in storage JSON form (decimals tagged as `$numberDecimal`).
    #[sea_orm(column_type = "Json")]
    pub fields: Json,
    /// Digest of `fields`; an equal digest means the write is a no-op.
    pub content_hash: String,

    // ─── Tracking ────────────────────────────────────────────────────────────
    pub first_seen_at: DateTimeWithTimeZone,
    pub synced_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Column encoding of a record key.
#[must_use]
pub fn encode_key(key: &RecordKey) -> String {
    match key {
        RecordKey::Int(i) => format!("{{\"int\":{i}}}"),
        RecordKey::Text(s) => serde_json::json!({ "text": s }).to_string(),
    }
}

impl Model {
    /// Decode the stored record key.
    pub fn key(&self) -> Option<RecordKey> {
        serde_json::from_str(&self.record_key).ok()
    }

    /// Decode the stored fields.
    pub fn document(&self) -> Document {
        Document::from_storage_json(&self.fields)
    }
}
