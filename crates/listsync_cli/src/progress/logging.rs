use listsync::sync::SyncProgress;

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn handle(&self, event: SyncProgress) {
        match event {
            SyncProgress::RunStarted {
                provider,
                collection,
                resumed,
                offset,
            } => {
                tracing::info!(%provider, %collection, resumed, offset, "Sync started");
            }

            SyncProgress::Authenticating {
                provider,
                collection,
                refresh,
            } => {
                tracing::debug!(%provider, %collection, refresh, "Authenticating");
            }

            SyncProgress::FetchedPage {
                provider,
                collection,
                page,
                count,
                total_so_far,
            } => {
                tracing::debug!(%provider, %collection, page, count, total_so_far, "Fetched page");
            }

            SyncProgress::FetchRetry {
                provider,
                collection,
                status,
                delay,
                attempt,
            } => {
                tracing::warn!(
                    %provider,
                    %collection,
                    status = ?status,
                    delay_ms = delay.as_millis() as u64,
                    attempt,
                    "Fetch failed, retrying"
                );
            }

            SyncProgress::RecordSkipped {
                provider,
                collection,
                reason,
            } => {
                tracing::warn!(%provider, %collection, reason = %reason, "Skipped record");
            }

            SyncProgress::UploadingPage {
                provider,
                collection,
                records,
                batches,
            } => {
                tracing::debug!(%provider, %collection, records, batches, "Uploading page");
            }

            SyncProgress::UploadRetry {
                provider,
                collection,
                failed,
                delay,
                attempt,
            } => {
                tracing::warn!(
                    %provider,
                    %collection,
                    failed,
                    delay_ms = delay.as_millis() as u64,
                    attempt,
                    "Upload incomplete, resubmitting failed records"
                );
            }

            SyncProgress::BatchCommitted {
                provider,
                collection,
                upserted,
                modified,
                unchanged,
                failed,
            } => {
                tracing::debug!(
                    %provider,
                    %collection,
                    upserted,
                    modified,
                    unchanged,
                    failed,
                    "Page stored"
                );
            }

            SyncProgress::Reseeded {
                provider,
                collection,
                reseeds,
            } => {
                tracing::info!(%provider, %collection, reseeds, "Offset limit reached, reseeded walk");
            }

            SyncProgress::CursorCommitted {
                provider,
                collection,
                offset,
            } => {
                tracing::debug!(%provider, %collection, offset, "Cursor committed");
            }

            SyncProgress::RunFinished {
                provider,
                collection,
                reason,
                records_upserted,
                records_failed,
            } => {
                if reason.is_success() {
                    tracing::info!(
                        %provider,
                        %collection,
                        reason = %reason,
                        records_upserted,
                        records_failed,
                        "Sync finished"
                    );
                } else {
                    tracing::error!(
                        %provider,
                        %collection,
                        reason = %reason,
                        records_upserted,
                        records_failed,
                        "Sync failed"
                    );
                }
            }

            SyncProgress::SyncingProviders { count } => {
                tracing::info!(count, "Syncing providers");
            }

            SyncProgress::SyncProvidersComplete { successful, failed } => {
                tracing::info!(successful, failed, "All provider runs finished");
            }

            SyncProgress::Warning { message } => {
                tracing::warn!("{}", message);
            }

            _ => {}
        }
    }
}
