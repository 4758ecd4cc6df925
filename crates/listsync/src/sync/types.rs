//! Engine options, run summaries and terminal reasons.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::provider::ProviderKey;
use crate::retry::RetryConfig;

use super::cursor::Cursor;

/// Records per upsert batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Concurrent upsert batches per page.
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Attempts per page fetch before the run fails.
pub const DEFAULT_MAX_FETCH_ATTEMPTS: u32 = 5;

/// Consecutive re-authentications before the run fails.
pub const DEFAULT_MAX_REAUTH: u32 = 3;

/// Attempts per page upload before the run fails.
pub const DEFAULT_MAX_UPLOAD_ATTEMPTS: u32 = 5;

/// Attempts per cursor commit before the run fails.
pub const DEFAULT_MAX_COMMIT_ATTEMPTS: u32 = 5;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_COMMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// At most this many error messages are kept on a [`SyncRun`].
pub const MAX_RUN_ERRORS: usize = 100;

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub batch_size: usize,
    pub max_concurrency: usize,
    /// Pause after a transport failure before fetching again.
    pub transport_retry_delay: Duration,
    pub max_fetch_attempts: u32,
    pub max_reauth: u32,
    pub max_upload_attempts: u32,
    pub max_commit_attempts: u32,
    pub fetch_timeout: Duration,
    pub commit_timeout: Duration,
    /// Backoff for throttling, server errors and store outages.
    pub backoff: RetryConfig,
    /// Records without a modification timestamp are skipped.
    pub require_timestamps: bool,
    /// Skip an offset-addressed page the provider refuses with a 4xx
    /// instead of failing the run.
    pub skip_rejected_pages: bool,
    /// Watermark for collections that were never synced.
    pub since: Option<DateTime<Utc>>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            transport_retry_delay: crate::provider::fetch::TRANSPORT_RETRY_DELAY,
            max_fetch_attempts: DEFAULT_MAX_FETCH_ATTEMPTS,
            max_reauth: DEFAULT_MAX_REAUTH,
            max_upload_attempts: DEFAULT_MAX_UPLOAD_ATTEMPTS,
            max_commit_attempts: DEFAULT_MAX_COMMIT_ATTEMPTS,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            commit_timeout: DEFAULT_COMMIT_TIMEOUT,
            backoff: RetryConfig::default(),
            require_timestamps: true,
            skip_rejected_pages: false,
            since: None,
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
#[non_exhaustive]
pub enum TerminalReason {
    /// The walk reached the end of the collection.
    Completed,
    /// Cancellation was requested.
    Cancelled,
    /// No usable credential.
    AuthFailure,
    /// Connection-level failures exhausted the fetch budget.
    Transport,
    /// The provider kept answering 429.
    Throttled,
    /// The provider kept answering 5xx.
    ServerError { status: u16 },
    /// The provider refused a request with a non-retryable 4xx.
    HttpRejected { status: u16, body: String },
    /// The store stayed unreachable.
    StoreUnavailable,
    /// The store refused every record of a page.
    PageRejected,
    /// The cursor could not be committed.
    PersistFailure,
    /// Reseeding would restart the walk at the same point.
    PaginationStalled,
    /// The provider kept returning undecodable pages.
    MalformedPage,
}

impl TerminalReason {
    /// Whether this reason ends the run in `Done` rather than `Failed`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, TerminalReason::Completed | TerminalReason::Cancelled)
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalReason::Completed => f.write_str("completed"),
            TerminalReason::Cancelled => f.write_str("cancelled"),
            TerminalReason::AuthFailure => f.write_str("authentication failed"),
            TerminalReason::Transport => f.write_str("transport failure"),
            TerminalReason::Throttled => f.write_str("throttled"),
            TerminalReason::ServerError { status } => write!(f, "server error ({status})"),
            TerminalReason::HttpRejected { status, .. } => write!(f, "request rejected ({status})"),
            TerminalReason::StoreUnavailable => f.write_str("store unavailable"),
            TerminalReason::PageRejected => f.write_str("page rejected by store"),
            TerminalReason::PersistFailure => f.write_str("cursor commit failed"),
            TerminalReason::PaginationStalled => f.write_str("pagination stalled"),
            TerminalReason::MalformedPage => f.write_str("malformed page"),
        }
    }
}

/// Summary of one engine run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRun {
    pub provider: String,
    pub collection: String,
    pub start_time: DateTime<Utc>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    /// Raw records received.
    pub records_seen: usize,
    /// Records new to the store.
    pub records_upserted: usize,
    /// Known records whose stored content changed.
    pub records_modified: usize,
    /// Records re-delivered with identical content.
    pub records_unchanged: usize,
    /// Records the store refused after every retry.
    pub records_failed: usize,
    /// Records that could not be normalized.
    pub records_skipped: usize,
    /// Earlier copies of a key superseded within the same page.
    pub duplicates_superseded: usize,
    pub pages_fetched: usize,
    pub pages_skipped: usize,
    pub reseeds: usize,
    pub terminal_reason: Option<TerminalReason>,
    /// The last cursor known to be committed.
    pub last_cursor: Cursor,
    pub errors: Vec<String>,
}

impl SyncRun {
    pub fn new(key: &ProviderKey) -> Self {
        Self {
            provider: key.provider.clone(),
            collection: key.collection.clone(),
            start_time: Utc::now(),
            elapsed: Duration::ZERO,
            records_seen: 0,
            records_upserted: 0,
            records_modified: 0,
            records_unchanged: 0,
            records_failed: 0,
            records_skipped: 0,
            duplicates_superseded: 0,
            pages_fetched: 0,
            pages_skipped: 0,
            reseeds: 0,
            terminal_reason: None,
            last_cursor: Cursor::default(),
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn provider_key(&self) -> ProviderKey {
        ProviderKey::new(&self.provider, &self.collection)
    }

    /// Whether the run ended without failure.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.terminal_reason
            .as_ref()
            .is_some_and(TerminalReason::is_success)
    }

    /// Keep an error message; the list is capped at [`MAX_RUN_ERRORS`].
    pub fn record_error(&mut self, message: impl Into<String>) {
        if self.errors.len() < MAX_RUN_ERRORS {
            self.errors.push(message.into());
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

/// Run-level cancellation signal. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing flag, e.g. one set by a signal handler.
    pub fn from_shared(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
