//! Progress events emitted while a run advances.
//!
//! Every event names the provider and collection it belongs to so a single
//! callback can follow several concurrent runs.

use std::time::Duration;

use super::types::TerminalReason;

/// Progress events emitted during sync operations.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SyncProgress {
    /// A run started. `resumed` is true when a committed cursor was found.
    RunStarted {
        provider: String,
        collection: String,
        resumed: bool,
        offset: u64,
    },

    /// Obtaining or refreshing the credential.
    Authenticating {
        provider: String,
        collection: String,
        refresh: bool,
    },

    /// Fetched a page of raw records.
    FetchedPage {
        provider: String,
        collection: String,
        /// Page number within this run (1-indexed).
        page: usize,
        count: usize,
        /// Running total of raw records received.
        total_so_far: usize,
    },

    /// A fetch failed and will be retried.
    FetchRetry {
        provider: String,
        collection: String,
        /// HTTP status, if the provider answered.
        status: Option<u16>,
        delay: Duration,
        attempt: u32,
    },

    /// A record was left out because it could not be normalized.
    RecordSkipped {
        provider: String,
        collection: String,
        reason: String,
    },

    /// Handing a page's records to the store.
    UploadingPage {
        provider: String,
        collection: String,
        records: usize,
        batches: usize,
    },

    /// Some records of a page failed and are being resubmitted.
    UploadRetry {
        provider: String,
        collection: String,
        failed: usize,
        delay: Duration,
        attempt: u32,
    },

    /// A page's records are durable.
    BatchCommitted {
        provider: String,
        collection: String,
        upserted: usize,
        modified: usize,
        unchanged: usize,
        failed: usize,
    },

    /// The walk hit the provider's offset limit and restarts from the
    /// last committed record.
    Reseeded {
        provider: String,
        collection: String,
        reseeds: usize,
    },

    /// The cursor now points past the committed page.
    CursorCommitted {
        provider: String,
        collection: String,
        offset: u64,
    },

    /// A run ended.
    RunFinished {
        provider: String,
        collection: String,
        reason: TerminalReason,
        records_upserted: usize,
        records_failed: usize,
    },

    /// Starting runs for several providers.
    SyncingProviders { count: usize },

    /// Every provider run ended.
    SyncProvidersComplete { successful: usize, failed: usize },

    /// Warning message (non-fatal).
    Warning { message: String },
}

/// Callback for progress updates during sync operations.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: SyncProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn emit_with_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let callback: ProgressCallback = Box::new(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        emit(Some(&callback), SyncProgress::SyncingProviders { count: 2 });
        emit(
            Some(&callback),
            SyncProgress::SyncProvidersComplete {
                successful: 2,
                failed: 0,
            },
        );

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn emit_without_callback() {
        emit(
            None,
            SyncProgress::Warning {
                message: "ignored".to_string(),
            },
        );
    }

    #[test]
    fn callback_sees_event_payload() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Box::new(move |event| {
            if let SyncProgress::RunFinished { reason, .. } = event {
                sink.lock().expect("lock").push(reason);
            }
        });

        emit(
            Some(&callback),
            SyncProgress::RunFinished {
                provider: "bridge".into(),
                collection: "Property".into(),
                reason: TerminalReason::Completed,
                records_upserted: 10,
                records_failed: 0,
            },
        );

        assert_eq!(*seen.lock().expect("lock"), vec![TerminalReason::Completed]);
    }

    #[test]
    fn debug_names_variant_and_fields() {
        let event = SyncProgress::FetchRetry {
            provider: "bridge".into(),
            collection: "Property".into(),
            status: Some(429),
            delay: Duration::from_secs(2),
            attempt: 1,
        };

        let debug_str = format!("{:?}", event);
        assert!(debug_str.contains("FetchRetry"));
        assert!(debug_str.contains("429"));
    }
}
