//! Common re-exports for convenient entity usage.

pub use super::replicated_record::{
    ActiveModel as ReplicatedRecordActiveModel, Column as ReplicatedRecordColumn,
    Entity as ReplicatedRecord, Model as ReplicatedRecordModel,
};
pub use super::sync_cursor::{
    ActiveModel as SyncCursorActiveModel, Column as SyncCursorColumn, Entity as SyncCursor,
    Model as SyncCursorModel,
};
