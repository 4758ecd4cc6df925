//! Durable record storage.
//!
//! The engine writes through [`BatchUpserter`]: one call per batch, one
//! [`BatchOutcome`] back, with per-record failures instead of batch-fatal
//! errors. Implementations:
//!
//! - [`records::SeaOrmRecordStore`] - `replicated_records` table via sea-orm
//! - [`memory::MemoryStore`] - in-process map for dry runs and tests

pub mod cursors;
pub mod memory;
pub mod records;

use async_trait::async_trait;
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::normalize::{NormalizedRecord, RecordKey};

pub use cursors::SeaOrmCursorTracker;
pub use memory::{MemoryCursorTracker, MemoryStore};
pub use records::SeaOrmRecordStore;

/// What happens to stored fields when a known key is re-delivered.
///
/// Fields missing from a fresh payload are kept unless the collection is
/// explicitly configured to `replace`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertPolicy {
    /// The fresh payload replaces every stored field.
    Replace,
    /// Fresh fields overwrite stored ones; fields absent from the payload are kept.
    #[default]
    Merge,
}

/// Why one record's write failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// The store could not be reached; the write may succeed on retry.
    #[error("store unavailable")]
    StoreUnavailable,

    /// The store refused this record.
    #[error("rejected: {reason}")]
    Rejected { reason: String },
}

/// Counts for one upsert call (or an aggregate of several).
///
/// `upserted` counts keys that were new to the store, `modified` counts
/// known keys whose stored content changed. Re-applying identical content
/// counts as neither.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub attempted: usize,
    pub upserted: usize,
    pub modified: usize,
    /// Failed records in submission order.
    pub failed: Vec<(RecordKey, ErrorKind)>,
}

impl BatchOutcome {
    /// Outcome for a batch none of whose writes went through.
    #[must_use]
    pub fn all_failed(records: &[NormalizedRecord], kind: ErrorKind) -> Self {
        Self {
            attempted: records.len(),
            upserted: 0,
            modified: 0,
            failed: records.iter().map(|r| (r.key.clone(), kind.clone())).collect(),
        }
    }

    /// Records written (or confirmed current) without error.
    #[must_use]
    pub fn committed(&self) -> usize {
        self.attempted.saturating_sub(self.failed.len())
    }

    /// Committed records whose stored content was already identical.
    #[must_use]
    pub fn unchanged(&self) -> usize {
        self.committed()
            .saturating_sub(self.upserted + self.modified)
    }

    /// Whether any failure is a store outage rather than a per-record refusal.
    #[must_use]
    pub fn store_unavailable(&self) -> bool {
        self.failed
            .iter()
            .any(|(_, kind)| *kind == ErrorKind::StoreUnavailable)
    }

    /// Fold another outcome into this one, keeping failure order.
    pub fn absorb(&mut self, other: BatchOutcome) {
        self.attempted += other.attempted;
        self.upserted += other.upserted;
        self.modified += other.modified;
        self.failed.extend(other.failed);
    }
}

/// Writes batches of records idempotently, keyed by [`RecordKey`].
#[async_trait]
pub trait BatchUpserter: Send + Sync {
    async fn upsert(&self, batch: Vec<NormalizedRecord>) -> BatchOutcome;
}

/// Errors from store maintenance operations (reads, deletes).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Whether a database error is worth retrying (locks, lost connections).
pub(crate) fn is_transient_db_error(err: &DbErr) -> bool {
    match err {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => true,
        DbErr::Exec(_) | DbErr::Query(_) => {
            let err_str = err.to_string().to_lowercase();
            // SQLite: database is locked, busy
            // PostgreSQL: connection refused, too many connections
            err_str.contains("locked")
                || err_str.contains("busy")
                || err_str.contains("timeout")
                || err_str.contains("connection")
                || err_str.contains("temporarily unavailable")
        }
        _ => false,
    }
}
