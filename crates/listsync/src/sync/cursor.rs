//! Durable walk progress.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::normalize::{NormalizedRecord, RecordKey};
use crate::provider::{PageRequest, ProviderAdapter, ProviderKey, SeedPoint};

/// Progress through one provider collection.
///
/// `offset` counts raw records consumed by the current walk. The
/// `(last_modified_at, last_record_key)` pair is taken from the newest record
/// committed so far and never moves backwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cursor {
    pub offset: u64,
    pub last_record_key: Option<RecordKey>,
    pub last_modified_at: Option<DateTime<Utc>>,
    pub provider_state: WalkState,
}

/// Where the current walk started and how far it got.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkState {
    pub seed_watermark: Option<DateTime<Utc>>,
    pub seed_key: Option<RecordKey>,
    /// The walk ran to the end of the collection.
    pub complete: bool,
    /// Provider continuation for the next page, when one was handed out.
    pub continuation: Option<String>,
}

impl WalkState {
    fn seed_point(&self, offset: u64) -> SeedPoint {
        SeedPoint {
            watermark: self.seed_watermark,
            after_key: self.seed_key.clone(),
            offset,
        }
    }
}

impl Cursor {
    /// Whether nothing was ever committed for this collection.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        *self == Cursor::default()
    }

    /// Seed for a new walk that starts right after the newest committed record.
    /// Without any timestamped record the current walk's seed is reused.
    #[must_use]
    pub fn reseed_point(&self, orders_by_key: bool) -> SeedPoint {
        let Some(watermark) = self.last_modified_at else {
            return self.walk_seed();
        };
        SeedPoint {
            watermark: Some(watermark),
            after_key: if orders_by_key {
                self.last_record_key.clone()
            } else {
                None
            },
            offset: 0,
        }
    }

    /// The seed of the current walk.
    #[must_use]
    pub fn walk_seed(&self) -> SeedPoint {
        self.provider_state.seed_point(0)
    }

    /// Start a new walk from `seed`. The watermark pair is kept.
    pub fn begin_walk(&mut self, seed: &SeedPoint) {
        self.offset = seed.offset;
        self.provider_state = WalkState {
            seed_watermark: seed.watermark,
            seed_key: seed.after_key.clone(),
            complete: false,
            continuation: None,
        };
    }

    /// Advance the watermark pair to `record` unless that would move it back.
    /// Pairs compare by timestamp, then key. Returns `false` when the record
    /// sorts before the current pair.
    pub fn observe(&mut self, record: &NormalizedRecord) -> bool {
        let Some(modified_at) = record.modified_at else {
            return true;
        };
        match (self.last_modified_at, &self.last_record_key) {
            (Some(current), _) if modified_at < current => false,
            (Some(current), Some(key)) if modified_at == current && record.key < *key => false,
            _ => {
                self.last_modified_at = Some(modified_at);
                self.last_record_key = Some(record.key.clone());
                true
            }
        }
    }

    /// First request to issue when resuming from this cursor.
    ///
    /// - fresh: a walk seeded at `since`
    /// - completed walk: a new walk right after the newest committed record
    /// - interrupted walk: keyset seek when the adapter orders by key, else the
    ///   saved continuation, else the walk's seed query at the committed offset
    pub fn resume_request<A: ProviderAdapter + ?Sized>(
        &mut self,
        adapter: &A,
        since: Option<DateTime<Utc>>,
    ) -> PageRequest {
        if self.is_fresh() {
            let seed = SeedPoint {
                watermark: since,
                after_key: None,
                offset: 0,
            };
            self.begin_walk(&seed);
            return adapter.build_initial_request(&seed);
        }

        if self.provider_state.complete {
            let seed = self.reseed_point(adapter.orders_by_key());
            self.begin_walk(&seed);
            return adapter.build_initial_request(&seed);
        }

        if adapter.orders_by_key() && self.last_record_key.is_some() && self.offset > 0 {
            let seed = self.reseed_point(true);
            self.begin_walk(&seed);
            return adapter.build_initial_request(&seed);
        }

        if let Some(link) = &self.provider_state.continuation {
            return PageRequest::Continuation(link.clone());
        }

        adapter.build_initial_request(&self.provider_state.seed_point(self.offset))
    }
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("cursor commit timed out after {0:?}")]
    Timeout(Duration),

    #[error("cursor state is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PersistError {
    /// Whether retrying the commit may help.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            PersistError::Database(err) => crate::store::is_transient_db_error(err),
            PersistError::Timeout(_) => true,
            PersistError::Serialization(_) => false,
        }
    }
}

/// Durable cursor storage, one cursor per provider collection.
#[async_trait]
pub trait CursorTracker: Send + Sync {
    /// The stored cursor, or the zero cursor when none was committed.
    async fn load(&self, key: &ProviderKey) -> Result<Cursor, PersistError>;

    /// Store `cursor`. Durable before returning.
    async fn commit(&self, key: &ProviderKey, cursor: &Cursor) -> Result<(), PersistError>;
}
