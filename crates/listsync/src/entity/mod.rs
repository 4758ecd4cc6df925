//! SeaORM entity definitions for the replication store.

pub mod prelude;
pub mod replicated_record;
pub mod sync_cursor;
