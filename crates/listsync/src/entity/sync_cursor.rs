//! SyncCursor entity - durable walk progress, one row per provider collection.
//!
//! The complete cursor lives in `state`; the other columns duplicate parts
//! of it so `listsync cursor show` and ad-hoc queries need no JSON parsing.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_cursors")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub provider: String,
    pub collection: String,

    /// Serialized `Cursor`.
    #[sea_orm(column_type = "Json")]
    pub state: Json,

    pub offset: i64,
    pub last_modified_at: Option<DateTimeWithTimeZone>,
    #[sea_orm(column_type = "Text", nullable)]
    pub last_record_key: Option<String>,
    /// Whether the last walk ran to the end of the collection.
    pub complete: bool,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
