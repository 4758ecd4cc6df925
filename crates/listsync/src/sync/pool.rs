use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::normalize::NormalizedRecord;
use crate::store::{BatchOutcome, BatchUpserter, ErrorKind};

use super::types::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_CONCURRENCY};

/// Fans a page's records out into fixed-size batches and upserts them
/// concurrently.
///
/// Every submitted batch runs to completion; one batch failing never cancels
/// its siblings. Failures come back in submission order.
#[derive(Clone)]
pub struct ConcurrentUploadPool {
    upserter: Arc<dyn BatchUpserter>,
    batch_size: usize,
    max_concurrency: usize,
    timeout: Option<Duration>,
}

impl ConcurrentUploadPool {
    pub fn new(upserter: Arc<dyn BatchUpserter>) -> Self {
        Self {
            upserter,
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Bound each batch; an expired batch is reported as store-unavailable.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Split `records` into batches and upsert them.
    pub async fn run(&self, records: Vec<NormalizedRecord>) -> BatchOutcome {
        let mut batches = Vec::with_capacity(records.len().div_ceil(self.batch_size));
        let mut records = records.into_iter().peekable();
        while records.peek().is_some() {
            batches.push(records.by_ref().take(self.batch_size).collect::<Vec<_>>());
        }
        self.run_batches(batches).await
    }

    /// Upsert pre-split batches, at most `max_concurrency` at a time.
    pub async fn run_batches(&self, batches: Vec<Vec<NormalizedRecord>>) -> BatchOutcome {
        let mut total = BatchOutcome::default();
        if batches.is_empty() {
            return total;
        }

        let concurrency = self.max_concurrency.clamp(1, batches.len());
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut handles = Vec::with_capacity(batches.len());

        for batch in batches {
            let upserter = Arc::clone(&self.upserter);
            let semaphore = Arc::clone(&semaphore);
            let timeout = self.timeout;
            // Kept so a lost task can still be reported key by key.
            let submitted = BatchOutcome::all_failed(&batch, ErrorKind::StoreUnavailable);

            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return BatchOutcome::all_failed(&batch, ErrorKind::StoreUnavailable);
                };

                match timeout {
                    Some(limit) => {
                        let unavailable =
                            BatchOutcome::all_failed(&batch, ErrorKind::StoreUnavailable);
                        match tokio::time::timeout(limit, upserter.upsert(batch)).await {
                            Ok(outcome) => outcome,
                            Err(_) => {
                                tracing::warn!(
                                    size = unavailable.attempted,
                                    ?limit,
                                    "Batch upsert timed out"
                                );
                                unavailable
                            }
                        }
                    }
                    None => upserter.upsert(batch).await,
                }
            });

            handles.push((handle, submitted));
        }

        for (handle, submitted) in handles {
            match handle.await {
                Ok(outcome) => total.absorb(outcome),
                Err(e) => {
                    tracing::error!(error = %e, "Batch upsert task failed");
                    total.absorb(submitted);
                }
            }
        }

        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::normalize::RecordKey;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn records(n: i64) -> Vec<NormalizedRecord> {
        (1..=n)
            .map(|k| NormalizedRecord {
                key: RecordKey::Int(k),
                modified_at: None,
                fields: Document::empty_map(),
            })
            .collect()
    }

    #[tokio::test]
    async fn splits_into_batches_and_aggregates() {
        let store = MemoryStore::default();
        let pool = ConcurrentUploadPool::new(Arc::new(store.clone()))
            .with_batch_size(100)
            .with_max_concurrency(4);

        let outcome = pool.run(records(250)).await;

        assert_eq!(outcome.attempted, 250);
        assert_eq!(outcome.upserted, 250);
        assert!(outcome.failed.is_empty());
        assert_eq!(store.calls(), 3);
        assert_eq!(store.len(), 250);
    }

    #[tokio::test]
    async fn failing_batch_does_not_cancel_siblings() {
        let store = MemoryStore::default();
        store.fail_next_batches(1);
        let pool = ConcurrentUploadPool::new(Arc::new(store.clone()))
            .with_batch_size(10)
            .with_max_concurrency(1);

        let outcome = pool.run(records(30)).await;

        assert_eq!(outcome.attempted, 30);
        assert_eq!(outcome.upserted, 20);
        assert_eq!(outcome.failed.len(), 10);
        assert_eq!(store.len(), 20);
    }

    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl BatchUpserter for Gauge {
        async fn upsert(&self, batch: Vec<NormalizedRecord>) -> BatchOutcome {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            BatchOutcome {
                attempted: batch.len(),
                upserted: batch.len(),
                ..BatchOutcome::default()
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_max_concurrency() {
        let gauge = Arc::new(Gauge {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let pool = ConcurrentUploadPool::new(gauge.clone())
            .with_batch_size(1)
            .with_max_concurrency(3);

        let outcome = pool.run(records(12)).await;

        assert_eq!(outcome.upserted, 12);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_batch_is_unavailable() {
        let gauge = Arc::new(Gauge {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let pool = ConcurrentUploadPool::new(gauge)
            .with_batch_size(5)
            .with_timeout(Duration::from_millis(10));

        let outcome = pool.run(records(5)).await;

        assert_eq!(outcome.committed(), 0);
        assert!(outcome.store_unavailable());
    }
}
