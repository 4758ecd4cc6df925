//! The replication engine: one sequential state machine per provider
//! collection.
//!
//! ```text
//! Idle -> Authenticating -> FetchingPage -> Normalizing -> Uploading
//!      -> AdvancingCursor -> (FetchingPage | Done | Failed)
//! ```
//!
//! The next page is never requested before the cursor covering the current
//! page is committed, so a crash at any point resumes without losing
//! records. Records may be delivered twice around a crash or a reseed; the
//! store's upserts make that harmless.
//!
//! Cancellation is checked on entry to `FetchingPage`, `Uploading` and
//! `AdvancingCursor`. A cancelled run ends `Done` with
//! [`TerminalReason::Cancelled`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use backon::ExponentialBackoff;

use crate::normalize::{NormalizedRecord, RecordKey, RecordNormalizer};
use crate::provider::{
    Credential, CredentialProvider, FetchError, NextPage, PageFetcher, PageRequest, PageResponse,
    ProviderAdapter, ProviderKey,
};
use crate::retry;
use crate::store::{BatchOutcome, BatchUpserter, ErrorKind};

use super::cursor::{Cursor, CursorTracker, PersistError};
use super::pool::ConcurrentUploadPool;
use super::progress::{ProgressCallback, SyncProgress, emit};
use super::types::{CancellationFlag, SyncOptions, SyncRun, TerminalReason};

enum State {
    Idle,
    Authenticating {
        refresh: bool,
    },
    FetchingPage,
    Normalizing {
        page: PageResponse,
    },
    Uploading {
        records: Vec<NormalizedRecord>,
        staged: Cursor,
        page: PageResponse,
    },
    AdvancingCursor {
        staged: Cursor,
        page: PageResponse,
    },
    Done(TerminalReason),
    Failed(TerminalReason),
}

/// Mutable position of a run.
struct Walk {
    key: ProviderKey,
    /// Last committed cursor, or the loaded one adjusted for the next request.
    cursor: Cursor,
    request: Option<PageRequest>,
    credential: Option<Credential>,
    fetch_attempts: u32,
    /// Delays for the failing request; dropped once a page arrives.
    fetch_backoff: Option<ExponentialBackoff>,
    reauths: u32,
}

/// Replicates one provider collection into a store.
#[derive(Clone)]
pub struct SyncEngine {
    adapter: Arc<dyn ProviderAdapter>,
    fetcher: Arc<dyn PageFetcher>,
    credentials: Arc<dyn CredentialProvider>,
    upserter: Arc<dyn BatchUpserter>,
    cursors: Arc<dyn CursorTracker>,
    options: SyncOptions,
    cancel: CancellationFlag,
}

impl SyncEngine {
    pub fn new(
        adapter: Arc<dyn ProviderAdapter>,
        fetcher: Arc<dyn PageFetcher>,
        credentials: Arc<dyn CredentialProvider>,
        upserter: Arc<dyn BatchUpserter>,
        cursors: Arc<dyn CursorTracker>,
    ) -> Self {
        Self {
            adapter,
            fetcher,
            credentials,
            upserter,
            cursors,
            options: SyncOptions::default(),
            cancel: CancellationFlag::new(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Observe `cancel` instead of a private flag.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// The flag that stops this engine.
    #[must_use]
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    #[must_use]
    pub fn provider_key(&self) -> ProviderKey {
        self.adapter.provider_key()
    }

    #[must_use]
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Run until the collection is exhausted, the run is cancelled, or a
    /// failure ends it. Never returns an error: the outcome is the
    /// [`SyncRun`]'s terminal reason.
    #[tracing::instrument(
        skip_all,
        fields(provider = %self.adapter.name(), collection = %self.adapter.collection())
    )]
    pub async fn run(&self, on_progress: Option<&ProgressCallback>) -> SyncRun {
        let started = Instant::now();
        let key = self.adapter.provider_key();
        let mut run = SyncRun::new(&key);
        let mut walk = Walk {
            key,
            cursor: Cursor::default(),
            request: None,
            credential: None,
            fetch_attempts: 0,
            fetch_backoff: None,
            reauths: 0,
        };
        let pool = ConcurrentUploadPool::new(Arc::clone(&self.upserter))
            .with_batch_size(self.options.batch_size)
            .with_max_concurrency(self.options.max_concurrency);

        let mut state = State::Idle;
        let reason = loop {
            state = match state {
                State::Idle => self.start(&mut walk, &mut run, on_progress).await,
                State::Authenticating { refresh } => {
                    self.authenticate(refresh, &mut walk, &mut run, on_progress)
                        .await
                }
                State::FetchingPage => self.fetch_page(&mut walk, &mut run, on_progress).await,
                State::Normalizing { page } => self.normalize_page(page, &walk, &mut run, on_progress),
                State::Uploading {
                    records,
                    staged,
                    page,
                } => {
                    self.upload(&pool, records, staged, page, &walk, &mut run, on_progress)
                        .await
                }
                State::AdvancingCursor { staged, page } => {
                    self.advance(staged, page, &mut walk, &mut run, on_progress)
                        .await
                }
                State::Done(reason) | State::Failed(reason) => break reason,
            };
        };

        run.elapsed = started.elapsed();
        if reason.is_success() {
            tracing::info!(
                reason = %reason,
                pages = run.pages_fetched,
                upserted = run.records_upserted,
                modified = run.records_modified,
                unchanged = run.records_unchanged,
                failed = run.records_failed,
                skipped = run.records_skipped,
                elapsed = ?run.elapsed,
                "Sync run finished"
            );
        } else {
            tracing::error!(
                reason = %reason,
                pages = run.pages_fetched,
                upserted = run.records_upserted,
                offset = run.last_cursor.offset,
                "Sync run failed"
            );
        }

        emit(
            on_progress,
            SyncProgress::RunFinished {
                provider: run.provider.clone(),
                collection: run.collection.clone(),
                reason: reason.clone(),
                records_upserted: run.records_upserted,
                records_failed: run.records_failed,
            },
        );
        run.terminal_reason = Some(reason);
        run
    }

    async fn start(
        &self,
        walk: &mut Walk,
        run: &mut SyncRun,
        on_progress: Option<&ProgressCallback>,
    ) -> State {
        let cursor = match self.cursors.load(&walk.key).await {
            Ok(cursor) => cursor,
            Err(e) => {
                run.record_error(format!("loading cursor: {e}"));
                return State::Failed(TerminalReason::PersistFailure);
            }
        };

        let resumed = !cursor.is_fresh();
        run.last_cursor = cursor.clone();
        walk.cursor = cursor;

        tracing::info!(resumed, offset = walk.cursor.offset, "Starting sync run");
        emit(
            on_progress,
            SyncProgress::RunStarted {
                provider: run.provider.clone(),
                collection: run.collection.clone(),
                resumed,
                offset: walk.cursor.offset,
            },
        );

        let request = walk
            .cursor
            .resume_request(self.adapter.as_ref(), self.options.since);
        match self.route(&mut walk.cursor, request, run, on_progress) {
            Ok(request) => {
                walk.request = Some(request);
                State::Authenticating { refresh: false }
            }
            Err(reason) => State::Failed(reason),
        }
    }

    async fn authenticate(
        &self,
        refresh: bool,
        walk: &mut Walk,
        run: &mut SyncRun,
        on_progress: Option<&ProgressCallback>,
    ) -> State {
        emit(
            on_progress,
            SyncProgress::Authenticating {
                provider: run.provider.clone(),
                collection: run.collection.clone(),
                refresh,
            },
        );

        let result = if refresh {
            self.credentials.refresh().await
        } else {
            self.credentials.credential().await
        };

        match result {
            Ok(credential) => {
                walk.credential = Some(credential);
                State::FetchingPage
            }
            Err(e) => {
                tracing::error!(error = %e, refresh, "Could not obtain credential");
                run.record_error(e.to_string());
                State::Failed(TerminalReason::AuthFailure)
            }
        }
    }

    async fn fetch_page(
        &self,
        walk: &mut Walk,
        run: &mut SyncRun,
        on_progress: Option<&ProgressCallback>,
    ) -> State {
        if self.cancel.is_cancelled() {
            return State::Done(TerminalReason::Cancelled);
        }
        let Some(request) = walk.request.clone() else {
            return State::Done(TerminalReason::Completed);
        };
        let Some(credential) = walk.credential.clone() else {
            return State::Authenticating { refresh: false };
        };

        let limit = self.options.fetch_timeout;
        let result = match tokio::time::timeout(limit, self.fetcher.fetch(&request, &credential))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Transport(format!(
                "fetch timed out after {limit:?}"
            ))),
        };

        let page = match result {
            Ok(page) => page,
            Err(e) => return self.fetch_failed(e, &request, walk, run, on_progress).await,
        };

        walk.fetch_attempts = 0;
        walk.fetch_backoff = None;
        walk.reauths = 0;

        if page.records.is_empty() {
            tracing::debug!(url = %request.url(), "Empty page, walk complete");
            return self.finish_walk(walk, run, on_progress).await;
        }

        run.pages_fetched += 1;
        run.records_seen += page.records.len();
        tracing::debug!(
            page = run.pages_fetched,
            count = page.records.len(),
            url = %request.url(),
            "Fetched page"
        );
        emit(
            on_progress,
            SyncProgress::FetchedPage {
                provider: run.provider.clone(),
                collection: run.collection.clone(),
                page: run.pages_fetched,
                count: page.records.len(),
                total_so_far: run.records_seen,
            },
        );

        State::Normalizing { page }
    }

    async fn fetch_failed(
        &self,
        err: FetchError,
        request: &PageRequest,
        walk: &mut Walk,
        run: &mut SyncRun,
        on_progress: Option<&ProgressCallback>,
    ) -> State {
        if err.status() == Some(401) {
            walk.credential = None;
            if walk.reauths >= self.options.max_reauth {
                tracing::error!(reauths = walk.reauths, "Credential rejected after refresh");
                run.record_error(err.to_string());
                return State::Failed(TerminalReason::AuthFailure);
            }
            walk.reauths += 1;
            tracing::info!(attempt = walk.reauths, "Credential rejected, re-authenticating");
            return State::Authenticating { refresh: true };
        }

        let attempt = walk.fetch_attempts + 1;
        let backoff = walk
            .fetch_backoff
            .get_or_insert_with(|| {
                self.options
                    .backoff
                    .clone()
                    .with_max_retries(self.options.max_fetch_attempts as usize)
                    .delays()
            })
            .next()
            .unwrap_or(self.options.backoff.max_delay);
        let (delay, exhausted) = match &err {
            FetchError::Transport(_) => (self.options.transport_retry_delay, TerminalReason::Transport),
            FetchError::Http {
                status: 429,
                retry_after,
                ..
            } => (retry_after.unwrap_or(backoff), TerminalReason::Throttled),
            FetchError::Http { status, .. } if *status >= 500 => {
                (backoff, TerminalReason::ServerError { status: *status })
            }
            FetchError::Decode(_) => (backoff, TerminalReason::MalformedPage),
            FetchError::Http { status, body, .. } => {
                return self.rejected_page(*status, body, request, walk, run, on_progress);
            }
        };

        if attempt >= self.options.max_fetch_attempts {
            tracing::error!(error = %err, attempts = attempt, "Fetch attempts exhausted");
            run.record_error(err.to_string());
            return State::Failed(exhausted);
        }

        walk.fetch_attempts = attempt;
        tracing::warn!(error = %err, attempt, ?delay, "Fetch failed, retrying");
        emit(
            on_progress,
            SyncProgress::FetchRetry {
                provider: run.provider.clone(),
                collection: run.collection.clone(),
                status: err.status(),
                delay,
                attempt,
            },
        );
        tokio::time::sleep(delay).await;
        State::FetchingPage
    }

    /// A 4xx other than 401 and 429.
    fn rejected_page(
        &self,
        status: u16,
        body: &str,
        request: &PageRequest,
        walk: &mut Walk,
        run: &mut SyncRun,
        on_progress: Option<&ProgressCallback>,
    ) -> State {
        let next = if self.options.skip_rejected_pages {
            self.adapter.skip_request(request)
        } else {
            None
        };

        let Some(next) = next else {
            tracing::error!(status, body, url = %request.url(), "Provider rejected request");
            run.record_error(format!("http {status}: {body}"));
            return State::Failed(TerminalReason::HttpRejected {
                status,
                body: body.to_string(),
            });
        };

        tracing::warn!(status, url = %request.url(), "Skipping page the provider rejected");
        run.pages_skipped += 1;
        run.record_error(format!("skipped page ({status}): {}", request.url()));

        if let Some(offset) = self.adapter.request_offset(&next) {
            walk.cursor.offset = offset;
        }
        match self.route(&mut walk.cursor, next, run, on_progress) {
            Ok(next) => {
                walk.request = Some(next);
                State::FetchingPage
            }
            Err(reason) => State::Failed(reason),
        }
    }

    fn normalize_page(
        &self,
        page: PageResponse,
        walk: &Walk,
        run: &mut SyncRun,
        on_progress: Option<&ProgressCallback>,
    ) -> State {
        let normalizer = RecordNormalizer::new(self.options.require_timestamps);
        let mut staged = walk.cursor.clone();
        let mut records = Vec::with_capacity(page.records.len());

        for raw in &page.records {
            match normalizer.normalize(self.adapter.as_ref(), raw) {
                Ok(record) => {
                    if !staged.observe(&record) {
                        tracing::debug!(key = %record.key, "Record older than cursor watermark");
                    }
                    records.push(record);
                }
                Err(e) => {
                    run.records_skipped += 1;
                    tracing::warn!(error = %e, "Skipping record");
                    run.record_error(e.to_string());
                    emit(
                        on_progress,
                        SyncProgress::RecordSkipped {
                            provider: run.provider.clone(),
                            collection: run.collection.clone(),
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }

        let (records, superseded) = supersede_duplicates(records);
        run.duplicates_superseded += superseded;

        if records.is_empty() {
            State::AdvancingCursor { staged, page }
        } else {
            State::Uploading {
                records,
                staged,
                page,
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload(
        &self,
        pool: &ConcurrentUploadPool,
        records: Vec<NormalizedRecord>,
        staged: Cursor,
        page: PageResponse,
        walk: &Walk,
        run: &mut SyncRun,
        on_progress: Option<&ProgressCallback>,
    ) -> State {
        if self.cancel.is_cancelled() {
            return State::Done(TerminalReason::Cancelled);
        }

        let attempted = records.len();
        emit(
            on_progress,
            SyncProgress::UploadingPage {
                provider: run.provider.clone(),
                collection: run.collection.clone(),
                records: attempted,
                batches: attempted.div_ceil(self.options.batch_size.max(1)),
            },
        );

        // Refused records are final; only records caught in a store outage
        // are resubmitted.
        let mut delays = self
            .options
            .backoff
            .clone()
            .with_max_retries(self.options.max_upload_attempts.saturating_sub(1) as usize)
            .delays();
        let mut pending = records;
        let mut total = BatchOutcome::default();
        let mut unchanged = 0;
        let mut rejected = Vec::new();
        let mut attempt = 1;
        let unavailable = loop {
            let outcome = pool.run(pending.clone()).await;
            total.upserted += outcome.upserted;
            total.modified += outcome.modified;
            unchanged += outcome.unchanged();

            let (outage, refused): (Vec<_>, Vec<_>) = outcome
                .failed
                .into_iter()
                .partition(|(_, kind)| *kind == ErrorKind::StoreUnavailable);
            rejected.extend(refused);

            if outage.is_empty() {
                break Vec::new();
            }
            let Some(delay) = delays.next() else {
                break outage;
            };

            let retry: HashSet<&RecordKey> = outage.iter().map(|(key, _)| key).collect();
            pending.retain(|record| retry.contains(&record.key));

            tracing::warn!(
                failed = outage.len(),
                attempt,
                ?delay,
                "Store unavailable, retrying batch"
            );
            emit(
                on_progress,
                SyncProgress::UploadRetry {
                    provider: run.provider.clone(),
                    collection: run.collection.clone(),
                    failed: outage.len(),
                    delay,
                    attempt,
                },
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        };

        run.records_upserted += total.upserted;
        run.records_modified += total.modified;
        run.records_unchanged += unchanged;

        if !unavailable.is_empty() {
            tracing::error!(
                failed = unavailable.len(),
                offset = walk.cursor.offset,
                "Store unavailable after retries"
            );
            run.record_error(format!("store unavailable for {} records", unavailable.len()));
            return State::Failed(TerminalReason::StoreUnavailable);
        }

        for (key, kind) in &rejected {
            tracing::warn!(%key, error = %kind, "Record rejected by store");
            run.record_error(format!("{key}: {kind}"));
        }
        run.records_failed += rejected.len();

        let committed = attempted - rejected.len();
        if committed == 0 {
            return State::Failed(TerminalReason::PageRejected);
        }

        tracing::debug!(
            upserted = total.upserted,
            modified = total.modified,
            unchanged,
            failed = rejected.len(),
            "Page uploaded"
        );
        emit(
            on_progress,
            SyncProgress::BatchCommitted {
                provider: run.provider.clone(),
                collection: run.collection.clone(),
                upserted: total.upserted,
                modified: total.modified,
                unchanged,
                failed: rejected.len(),
            },
        );

        State::AdvancingCursor { staged, page }
    }

    async fn advance(
        &self,
        mut staged: Cursor,
        page: PageResponse,
        walk: &mut Walk,
        run: &mut SyncRun,
        on_progress: Option<&ProgressCallback>,
    ) -> State {
        if self.cancel.is_cancelled() {
            return State::Done(TerminalReason::Cancelled);
        }
        let Some(current) = walk.request.take() else {
            return State::Done(TerminalReason::Completed);
        };

        staged.offset += page.records.len() as u64;
        staged.provider_state.continuation = None;

        let next = match self.adapter.build_next_request(&current, &page) {
            NextPage::Exhausted => {
                staged.provider_state.complete = true;
                Ok(None)
            }
            NextPage::Request(next) => self
                .route(&mut staged, next, run, on_progress)
                .map(Some),
        };

        if let Err(e) = self.commit(&walk.key, &staged, on_progress).await {
            tracing::error!(error = %e, offset = staged.offset, "Could not commit cursor");
            run.record_error(format!("committing cursor: {e}"));
            return State::Failed(TerminalReason::PersistFailure);
        }

        walk.cursor = staged;
        run.last_cursor = walk.cursor.clone();
        emit(
            on_progress,
            SyncProgress::CursorCommitted {
                provider: run.provider.clone(),
                collection: run.collection.clone(),
                offset: walk.cursor.offset,
            },
        );

        match next {
            Ok(Some(request)) => {
                walk.request = Some(request);
                State::FetchingPage
            }
            Ok(None) => State::Done(TerminalReason::Completed),
            Err(reason) => State::Failed(reason),
        }
    }

    /// Commit an empty trailing page: the walk is complete.
    async fn finish_walk(
        &self,
        walk: &mut Walk,
        run: &mut SyncRun,
        on_progress: Option<&ProgressCallback>,
    ) -> State {
        let mut staged = walk.cursor.clone();
        staged.provider_state.complete = true;
        staged.provider_state.continuation = None;

        if let Err(e) = self.commit(&walk.key, &staged, on_progress).await {
            tracing::error!(error = %e, "Could not commit completed cursor");
            run.record_error(format!("committing cursor: {e}"));
            return State::Failed(TerminalReason::PersistFailure);
        }
        walk.cursor = staged;
        run.last_cursor = walk.cursor.clone();
        State::Done(TerminalReason::Completed)
    }

    /// Point `cursor` at `next`, restarting the walk when `next` would cross
    /// the provider's offset limit.
    fn route(
        &self,
        cursor: &mut Cursor,
        next: PageRequest,
        run: &mut SyncRun,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<PageRequest, TerminalReason> {
        if let PageRequest::Continuation(link) = &next {
            cursor.provider_state.continuation = Some(link.clone());
        }

        let over_limit = match (self.adapter.offset_limit(), self.adapter.request_offset(&next)) {
            (Some(limit), Some(offset)) => offset >= limit,
            _ => false,
        };
        if !over_limit {
            return Ok(next);
        }

        let seed = cursor.reseed_point(self.adapter.orders_by_key());
        if seed == cursor.walk_seed() {
            tracing::error!(
                watermark = ?seed.watermark,
                "Offset limit reached without advancing the watermark"
            );
            run.record_error("offset limit reached without advancing the watermark");
            return Err(TerminalReason::PaginationStalled);
        }

        cursor.begin_walk(&seed);
        run.reseeds += 1;
        tracing::info!(
            watermark = ?seed.watermark,
            after_key = ?seed.after_key,
            reseeds = run.reseeds,
            "Offset limit reached, reseeding walk"
        );
        emit(
            on_progress,
            SyncProgress::Reseeded {
                provider: run.provider.clone(),
                collection: run.collection.clone(),
                reseeds: run.reseeds,
            },
        );
        Ok(self.adapter.build_initial_request(&seed))
    }

    async fn commit(
        &self,
        key: &ProviderKey,
        cursor: &Cursor,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<(), PersistError> {
        let config = self
            .options
            .backoff
            .clone()
            .with_max_retries(self.options.max_commit_attempts.saturating_sub(1) as usize);
        let limit = self.options.commit_timeout;
        let cursors = &self.cursors;

        retry::with_retry(
            || async move {
                match tokio::time::timeout(limit, cursors.commit(key, cursor)).await {
                    Ok(result) => result,
                    Err(_) => Err(PersistError::Timeout(limit)),
                }
            },
            config,
            PersistError::is_transient,
            |e: &PersistError, delay: Duration| {
                tracing::warn!(error = %e, ?delay, "Cursor commit failed, retrying");
                emit(
                    on_progress,
                    SyncProgress::Warning {
                        message: format!("{key}: cursor commit failed ({e}), retrying in {delay:?}"),
                    },
                );
            },
        )
        .await
    }
}

/// Keep one record per key: the greatest `modified_at` wins, a tie goes to
/// the later record. Returns the survivors in first-seen order and the
/// number of superseded copies.
fn supersede_duplicates(records: Vec<NormalizedRecord>) -> (Vec<NormalizedRecord>, usize) {
    let mut index: HashMap<RecordKey, usize> = HashMap::with_capacity(records.len());
    let mut kept: Vec<NormalizedRecord> = Vec::with_capacity(records.len());
    let mut superseded = 0;

    for record in records {
        match index.get(&record.key) {
            Some(&at) => {
                superseded += 1;
                if record.modified_at >= kept[at].modified_at {
                    kept[at] = record;
                }
            }
            None => {
                index.insert(record.key.clone(), kept.len());
                kept.push(record);
            }
        }
    }

    (kept, superseded)
}

/// Run every engine concurrently, one task each, and collect their runs in
/// input order. Engines share nothing mutable.
#[tracing::instrument(skip_all, fields(provider_count = engines.len()))]
pub async fn sync_providers(
    engines: Vec<SyncEngine>,
    on_progress: Option<Arc<ProgressCallback>>,
) -> Vec<SyncRun> {
    if engines.is_empty() {
        return Vec::new();
    }

    emit(
        on_progress.as_deref(),
        SyncProgress::SyncingProviders {
            count: engines.len(),
        },
    );

    let mut handles = Vec::with_capacity(engines.len());
    for engine in engines {
        let key = engine.provider_key();
        let progress = on_progress.clone();
        let handle = tokio::spawn(async move { engine.run(progress.as_deref()).await });
        handles.push((key, handle));
    }

    let mut runs = Vec::with_capacity(handles.len());
    for (key, handle) in handles {
        match handle.await {
            Ok(run) => runs.push(run),
            Err(e) => {
                tracing::error!(%key, error = %e, "Sync task failed");
                let mut run = SyncRun::new(&key);
                run.record_error(format!("task panic: {e}"));
                runs.push(run);
            }
        }
    }

    let successful = runs.iter().filter(|r| r.succeeded()).count();
    emit(
        on_progress.as_deref(),
        SyncProgress::SyncProvidersComplete {
            successful,
            failed: runs.len() - successful,
        },
    );

    runs
}
