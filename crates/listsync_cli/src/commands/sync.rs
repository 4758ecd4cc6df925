//! The `sync` command: one engine per selected provider collection, run
//! side by side.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use console::{Term, style};
use sea_orm::DatabaseConnection;

use listsync::http::reqwest_transport::ReqwestTransport;
use listsync::provider::{
    ApiRateLimiter, HttpPageFetcher, ODataAdapter, PageFetcher, PageFormat, RateLimitedFetcher,
    StaticCredentials,
};
use listsync::store::{MemoryCursorTracker, MemoryStore, SeaOrmCursorTracker, SeaOrmRecordStore};
use listsync::sync::{
    CancellationFlag, Cursor, CursorTracker, SyncEngine, SyncOptions, SyncRun, sync_providers,
};
use listsync::{BatchUpserter, ProviderConfig};

use crate::SyncArgs;
use crate::config::Config;
use crate::progress::ProgressReporter;

/// Longest lookback honoured; larger values are clamped.
const MAX_LOOKBACK_HOURS: u64 = 24 * 365 * 50;

/// Engine options after merging CLI flags over the config file.
#[derive(Debug)]
struct Resolved {
    options: SyncOptions,
    rate_limit: bool,
    requests_per_second: u32,
    request_timeout: Duration,
}

fn resolve_options(args: &SyncArgs, config: &Config, now: DateTime<Utc>) -> Resolved {
    let lookback = args.lookback_hours.or(config.sync.lookback_hours);
    let since = args.since.or_else(|| {
        lookback.map(|hours| now - chrono::Duration::hours(hours.min(MAX_LOOKBACK_HOURS) as i64))
    });

    let options = SyncOptions {
        batch_size: args.batch_size.unwrap_or(config.sync.batch_size).max(1),
        max_concurrency: args.concurrency.unwrap_or(config.sync.concurrency).max(1),
        max_fetch_attempts: config.sync.max_fetch_attempts.max(1),
        skip_rejected_pages: args.skip_rejected_pages || config.sync.skip_rejected_pages,
        since,
        ..SyncOptions::default()
    };

    Resolved {
        options,
        rate_limit: !(args.no_rate_limit || config.sync.no_rate_limit),
        requests_per_second: config.sync.requests_per_second,
        request_timeout: Duration::from_secs(config.sync.request_timeout_secs.max(1)),
    }
}

/// Handle `listsync sync`.
pub(crate) async fn handle_sync(
    args: SyncArgs,
    config: &Config,
    database_url: &str,
    cancel: CancellationFlag,
) -> Result<(), Box<dyn std::error::Error>> {
    let is_tty = Term::stdout().is_term();
    let providers = config.select_providers(&args.providers)?;
    if providers.is_empty() {
        return Err(
            "no enabled providers configured; add a [[providers]] entry to listsync.toml".into(),
        );
    }

    let resolved = resolve_options(&args, config, Utc::now());
    if !resolved.rate_limit && is_tty {
        eprintln!("Warning: Rate limiting disabled - providers may throttle requests\n");
    }
    if args.dry_run && is_tty {
        println!(
            "{} records are fetched and normalized but nothing is written\n",
            style("Dry run:").yellow().bold()
        );
    }

    let db = Arc::new(if args.dry_run {
        listsync::connect(database_url).await?
    } else {
        listsync::connect_and_migrate(database_url).await?
    });

    let transport = ReqwestTransport::with_timeout(resolved.request_timeout)?;
    // One limiter per provider account, shared by its collections
    let mut limiters: HashMap<String, ApiRateLimiter> = HashMap::new();

    let mut engines = Vec::with_capacity(providers.len());
    let mut dry_stores = Vec::new();
    for provider in providers {
        let format = PageFormat {
            records_field: provider.records_field.clone(),
            next_link_field: provider.next_link_field.clone(),
        };
        let http = HttpPageFetcher::new(transport.clone(), format)
            .with_retry_delay(resolved.options.transport_retry_delay);
        let fetcher: Arc<dyn PageFetcher> = if resolved.rate_limit {
            let rps = provider
                .requests_per_second
                .unwrap_or(resolved.requests_per_second);
            let limiter = limiters
                .entry(provider.name.clone())
                .or_insert_with(|| ApiRateLimiter::new(rps))
                .clone();
            Arc::new(RateLimitedFetcher::new(http, limiter))
        } else {
            Arc::new(http)
        };

        let (store, cursors) = if args.dry_run {
            let (store, cursors) = dry_run_stores(&db, &provider).await;
            dry_stores.push((provider.key(), store.clone()));
            (Arc::new(store) as Arc<dyn BatchUpserter>, cursors)
        } else {
            let store: Arc<dyn BatchUpserter> = Arc::new(SeaOrmRecordStore::new(
                Arc::clone(&db),
                provider.key(),
                provider.upsert_policy,
            ));
            let cursors: Arc<dyn CursorTracker> =
                Arc::new(SeaOrmCursorTracker::new(Arc::clone(&db)));
            (store, cursors)
        };

        let credentials = Arc::new(StaticCredentials::from(provider.credential.clone()));
        let engine = SyncEngine::new(
            Arc::new(ODataAdapter::new(provider)),
            fetcher,
            credentials,
            store,
            cursors,
        )
        .with_options(resolved.options.clone())
        .with_cancellation(cancel.clone());
        engines.push(engine);
    }

    let reporter = Arc::new(ProgressReporter::new());
    let runs = sync_providers(engines, Some(reporter.as_callback())).await;
    reporter.finish();

    print_summary(&runs, is_tty);
    for (key, store) in &dry_stores {
        let line = format!("{key}: {} distinct records would be written", store.len());
        if is_tty {
            println!("{line}");
        } else {
            tracing::info!("{line}");
        }
    }

    let failed = runs.iter().filter(|run| !run.succeeded()).count();
    if failed > 0 {
        return Err(format!("{failed} of {} provider runs failed", runs.len()).into());
    }
    Ok(())
}

/// Stores for a dry run: records go to memory, and the cursor starts from
/// the committed one so the run shows what the next real sync would fetch.
async fn dry_run_stores(
    db: &Arc<DatabaseConnection>,
    provider: &ProviderConfig,
) -> (MemoryStore, Arc<dyn CursorTracker>) {
    let key = provider.key();
    let committed = match SeaOrmCursorTracker::new(Arc::clone(db)).load(&key).await {
        Ok(cursor) => cursor,
        Err(e) => {
            tracing::warn!(%key, error = %e, "No readable cursor, dry run starts fresh");
            Cursor::default()
        }
    };
    (
        MemoryStore::new(provider.upsert_policy),
        Arc::new(MemoryCursorTracker::seeded(key, committed)),
    )
}

/// One row of the end-of-run table.
#[derive(Debug, tabled::Tabled)]
struct RunRow {
    #[tabled(rename = "Provider")]
    provider: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "New")]
    upserted: usize,
    #[tabled(rename = "Changed")]
    modified: usize,
    #[tabled(rename = "Unchanged")]
    unchanged: usize,
    #[tabled(rename = "Skipped")]
    skipped: usize,
    #[tabled(rename = "Failed")]
    failed: usize,
    #[tabled(rename = "Pages")]
    pages: usize,
    #[tabled(rename = "Offset")]
    offset: u64,
    #[tabled(rename = "Elapsed")]
    elapsed: String,
}

impl From<&SyncRun> for RunRow {
    fn from(run: &SyncRun) -> Self {
        Self {
            provider: run.provider_key().to_string(),
            result: run
                .terminal_reason
                .as_ref()
                .map_or_else(|| "crashed".to_string(), ToString::to_string),
            upserted: run.records_upserted,
            modified: run.records_modified,
            unchanged: run.records_unchanged,
            skipped: run.records_skipped,
            failed: run.records_failed,
            pages: run.pages_fetched,
            offset: run.last_cursor.offset,
            elapsed: format!("{:.1}s", run.elapsed.as_secs_f64()),
        }
    }
}

fn print_summary(runs: &[SyncRun], is_tty: bool) {
    if is_tty {
        let rows: Vec<RunRow> = runs.iter().map(RunRow::from).collect();
        let mut table = tabled::Table::new(rows);
        table.with(tabled::settings::Style::rounded());
        println!("\n{table}");
    }

    for run in runs {
        if !is_tty {
            tracing::info!(
                provider = %run.provider_key(),
                reason = ?run.terminal_reason,
                upserted = run.records_upserted,
                modified = run.records_modified,
                unchanged = run.records_unchanged,
                skipped = run.records_skipped,
                failed = run.records_failed,
                pages = run.pages_fetched,
                reseeds = run.reseeds,
                elapsed_secs = run.elapsed.as_secs_f64(),
                "Run summary"
            );
        }

        // Limited to the first few to avoid flooding
        let shown = run.errors.len().min(10);
        for error in run.errors.iter().take(shown) {
            if is_tty {
                eprintln!("  {} {}: {error}", style("-").red(), run.provider_key());
            } else {
                tracing::warn!(provider = %run.provider_key(), error = %error, "Run error");
            }
        }
        if run.errors.len() > shown && is_tty {
            eprintln!("  ... and {} more errors", run.errors.len() - shown);
        }
    }
}
