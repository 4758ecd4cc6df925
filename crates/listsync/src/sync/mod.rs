//! The sync engine and the state it threads through a run.
//!
//! # Module Structure
//!
//! - [`engine`] - `SyncEngine`, the per-collection state machine, and `sync_providers()`
//! - [`cursor`] - `Cursor`, `CursorTracker` and the resume rules
//! - [`pool`] - `ConcurrentUploadPool`, bounded concurrent batch upserts
//! - [`types`] - `SyncOptions`, `SyncRun`, `TerminalReason`, constants
//! - [`progress`] - Progress reporting: `SyncProgress`, `ProgressCallback`, `emit()`
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use listsync::provider::{HttpPageFetcher, ODataAdapter, PageFormat, StaticCredentials};
//! use listsync::store::{SeaOrmCursorTracker, SeaOrmRecordStore};
//! use listsync::sync::{SyncEngine, SyncOptions};
//!
//! let engine = SyncEngine::new(
//!     Arc::new(ODataAdapter::new(config.clone())),
//!     Arc::new(HttpPageFetcher::new(transport, PageFormat::default())),
//!     Arc::new(StaticCredentials::from(config.credential.clone())),
//!     Arc::new(SeaOrmRecordStore::new(db.clone(), config.key(), config.upsert_policy)),
//!     Arc::new(SeaOrmCursorTracker::new(db)),
//! )
//! .with_options(SyncOptions::default());
//! let run = engine.run(None).await;
//! println!("{}: {:?}", run.provider, run.terminal_reason);
//! ```

pub mod cursor;
pub mod engine;
pub mod pool;
mod progress;
mod types;

pub use cursor::{Cursor, CursorTracker, PersistError, WalkState};
pub use engine::{SyncEngine, sync_providers};
pub use pool::ConcurrentUploadPool;

pub use types::{CancellationFlag, SyncOptions, SyncRun, TerminalReason};

pub use types::{
    DEFAULT_BATCH_SIZE, DEFAULT_COMMIT_TIMEOUT, DEFAULT_FETCH_TIMEOUT,
    DEFAULT_MAX_COMMIT_ATTEMPTS, DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_FETCH_ATTEMPTS,
    DEFAULT_MAX_REAUTH, DEFAULT_MAX_UPLOAD_ATTEMPTS, MAX_RUN_ERRORS,
};

pub use progress::{ProgressCallback, SyncProgress, emit};
