//! listsync CLI - replicates listing provider feeds into a local database.

mod commands;
mod config;
mod progress;
mod shutdown;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use console::Term;
use listsync::sync::CancellationFlag;
use tracing_subscriber::EnvFilter;

use crate::commands::cursor::OutputFormat;

#[derive(Parser)]
#[command(name = "listsync")]
#[command(version)]
#[command(about = "Incremental replication of listing provider APIs")]
#[command(
    long_about = "listsync walks paginated listing feeds (OData providers such as Bridge, \
Trestle or MLS Grid), normalizes every record and upserts it into a local database. \
A cursor is committed after every stored page, so an interrupted sync resumes where it \
stopped and a completed one continues incrementally."
)]
#[command(after_long_help = r#"EXAMPLES
    Sync every enabled provider:
        $ listsync sync

    Sync one provider, seeding a first run one week back:
        $ listsync sync bridge --lookback-hours 168

    Dry run to see what would be fetched:
        $ listsync sync bridge --dry-run

    Show committed cursors:
        $ listsync cursor show

    Start a provider over from scratch:
        $ listsync cursor reset bridge

CONFIGURATION
    listsync reads configuration from:
      1. ~/.config/listsync/config.toml (or $XDG_CONFIG_HOME/listsync/config.toml)
      2. ./listsync.toml
      3. Environment variables (LISTSYNC_ prefix, nested keys joined with __)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    LISTSYNC_DATABASE__URL    Database connection string (default: ~/.local/state/listsync/listsync.db)
    LISTSYNC_SYNC__BATCH_SIZE Records per upsert batch
    RUST_LOG                  Log filter for non-interactive output (default: listsync=info,listsync_cli=info)
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replicate provider collections into the database
    Sync(SyncArgs),
    /// Inspect or reset committed cursors
    Cursor {
        #[command(subcommand)]
        action: CursorAction,
    },
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
    /// Generate man page(s)
    Man {
        /// Output directory for man pages (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Options for `listsync sync`.
#[derive(Debug, Clone, clap::Args)]
struct SyncArgs {
    /// Provider name(s) to sync; every enabled provider when omitted
    providers: Vec<String>,

    /// Dry run - fetch and normalize, but write neither records nor cursors
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Seed never-synced collections at this RFC 3339 timestamp
    #[arg(long, conflicts_with = "lookback_hours")]
    since: Option<DateTime<Utc>>,

    /// Seed never-synced collections this many hours back (default from config)
    #[arg(short = 'l', long)]
    lookback_hours: Option<u64>,

    /// Concurrent upsert batches per page (default from config or 16)
    #[arg(short = 'c', long)]
    concurrency: Option<usize>,

    /// Records per upsert batch (default from config or 1000)
    #[arg(short = 'b', long)]
    batch_size: Option<usize>,

    /// Disable proactive rate limiting (may cause API throttling)
    #[arg(short = 'R', long)]
    no_rate_limit: bool,

    /// Skip pages the provider refuses instead of failing the run
    #[arg(long)]
    skip_rejected_pages: bool,
}

#[derive(Subcommand)]
enum CursorAction {
    /// Show committed cursors
    Show {
        /// Only show cursors of this provider
        provider: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Forget cursors so the next sync starts over
    Reset {
        /// Provider whose cursors are removed
        provider: String,

        /// Only reset this collection (default: every collection of the provider)
        #[arg(short = 'C', long)]
        collection: Option<String>,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Rollback the last migration
    Down,
    /// Show migration status
    Status,
    /// Fresh install - drop all tables and reapply migrations
    Fresh,
}

/// Create the parent directory of a `sqlite://` database file.
fn ensure_sqlite_dir(database_url: &str) -> std::io::Result<()> {
    let Some(db_path) = database_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    // Strip query parameters (e.g., ?mode=rwc) before path operations
    let db_path = db_path.split('?').next().unwrap_or(db_path);
    let db_path = Path::new(db_path);

    if db_path.is_relative() && !db_path.as_os_str().is_empty() {
        tracing::warn!(
            "Database path '{}' is relative - behavior depends on current directory. \
             Consider using an absolute path.",
            db_path.display()
        );
    }

    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Interactive sessions get progress bars instead of log lines
    if !Term::stdout().is_term() {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new("listsync=info,listsync_cli=info"),
        };

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    // Commands that need neither configuration nor a database
    match &cli.command {
        Commands::Completions { shell } => {
            commands::meta::handle_completions(*shell)?;
            return Ok(());
        }
        Commands::Man { output } => {
            commands::meta::handle_man(output.clone())?;
            return Ok(());
        }
        _ => {}
    }

    let config = config::Config::load()?;
    let database_url = config
        .database_url()
        .ok_or("could not determine a database location; set LISTSYNC_DATABASE__URL")?;
    ensure_sqlite_dir(&database_url)?;

    match cli.command {
        Commands::Sync(args) => {
            let cancel = CancellationFlag::new();
            shutdown::setup_shutdown_handler(cancel.clone());
            commands::sync::handle_sync(args, &config, &database_url, cancel).await?;
        }
        Commands::Cursor { action } => {
            commands::cursor::handle_cursor(action, &database_url).await?;
        }
        Commands::Migrate { action } => {
            commands::migrate::handle_migrate(action, &database_url).await?;
        }
        Commands::Completions { .. } | Commands::Man { .. } => {}
    }

    Ok(())
}
