//! Inspecting and resetting committed cursors.

use clap::ValueEnum;
use console::style;
use serde::Serialize;

use listsync::ProviderKey;
use listsync::store::SeaOrmCursorTracker;
use listsync::sync::Cursor;

use crate::CursorAction;

/// Output format for `cursor show`.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Display as a formatted table (default)
    #[default]
    Table,
    /// Display as JSON
    Json,
}

#[derive(Debug, Clone, Serialize, tabled::Tabled)]
pub(crate) struct CursorRow {
    #[tabled(rename = "Provider")]
    provider: String,
    #[tabled(rename = "Collection")]
    collection: String,
    #[tabled(rename = "Offset")]
    offset: u64,
    #[tabled(rename = "Last Key")]
    last_record_key: String,
    #[tabled(rename = "Last Modified")]
    last_modified_at: String,
    #[tabled(rename = "Walk")]
    walk: String,
    #[tabled(skip)]
    cursor: Cursor,
}

impl CursorRow {
    fn new(key: ProviderKey, cursor: Cursor) -> Self {
        let walk = if cursor.provider_state.complete {
            "complete"
        } else if cursor.is_fresh() {
            "not started"
        } else {
            "in progress"
        };
        Self {
            provider: key.provider,
            collection: key.collection,
            offset: cursor.offset,
            last_record_key: cursor
                .last_record_key
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string),
            last_modified_at: cursor
                .last_modified_at
                .map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
            walk: walk.to_string(),
            cursor,
        }
    }

    fn print_many(items: Vec<Self>, format: OutputFormat) -> Result<(), serde_json::Error> {
        match format {
            OutputFormat::Table => {
                if items.is_empty() {
                    println!("No cursors committed yet.");
                    return Ok(());
                }
                let mut table = tabled::Table::new(items);
                table.with(tabled::settings::Style::rounded());
                println!("{table}");
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&items)?);
            }
        }
        Ok(())
    }
}

/// Handle `listsync cursor`.
pub(crate) async fn handle_cursor(
    action: CursorAction,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = listsync::connect_and_migrate(database_url).await?;
    let tracker = SeaOrmCursorTracker::new(db);

    match action {
        CursorAction::Show { provider, output } => {
            let rows = tracker
                .list()
                .await?
                .into_iter()
                .filter(|(key, _)| provider.as_ref().is_none_or(|p| &key.provider == p))
                .map(|(key, cursor)| CursorRow::new(key, cursor))
                .collect();
            CursorRow::print_many(rows, output)?;
        }
        CursorAction::Reset {
            provider,
            collection: Some(collection),
        } => {
            let key = ProviderKey::new(provider, collection);
            if tracker.reset(&key).await? {
                println!(
                    "{} Cursor for {key} removed; the next sync starts over.",
                    style("✓").green()
                );
            } else {
                println!("No cursor stored for {key}.");
            }
        }
        CursorAction::Reset {
            provider,
            collection: None,
        } => {
            let removed = tracker.reset_provider(&provider).await?;
            println!(
                "{} Removed {removed} cursor(s) for provider '{provider}'.",
                style("✓").green()
            );
        }
    }

    Ok(())
}
