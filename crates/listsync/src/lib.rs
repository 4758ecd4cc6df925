//! listsync - incremental replication of paginated listing provider APIs.
//!
//! Each configured provider collection is walked page by page, records are
//! normalized and upserted into a durable store, and a cursor is committed
//! after every page so an interrupted run resumes where it stopped.
//!
//! # Features
//!
//! - `sqlite` / `postgres` - sea-orm database backends
//! - `http` - reqwest-backed [`http::HttpTransport`] and
//!   [`provider::HttpPageFetcher`]
//! - `migrate` - Enables database migration support. When enabled, you can use
//!   [`connect_and_migrate`] to automatically run migrations on connection.
//!
//! # Example
//!
//! ```ignore
//! use listsync::connect_and_migrate;
//! use listsync::store::SeaOrmCursorTracker;
//!
//! let db = connect_and_migrate("sqlite://listsync.db?mode=rwc").await?;
//! for (key, cursor) in SeaOrmCursorTracker::new(db).list().await? {
//!     println!("{key}: offset {}", cursor.offset);
//! }
//! ```

pub mod db;
pub mod document;
pub mod entity;
pub mod http;
pub mod normalize;
pub mod provider;
pub mod retry;
pub mod store;
pub mod sync;

#[cfg(feature = "migrate")]
pub mod migration;

pub use db::connect;
#[cfg(feature = "migrate")]
pub use db::connect_and_migrate;
pub use document::Document;
pub use entity::prelude::*;
pub use normalize::{NormalizeError, NormalizedRecord, RecordKey, RecordNormalizer, RemoteRecord};
pub use provider::{ProviderAdapter, ProviderConfig, ProviderKey};
pub use store::{BatchOutcome, BatchUpserter, ErrorKind, UpsertPolicy};
pub use sync::{SyncEngine, SyncOptions, SyncRun, TerminalReason};
