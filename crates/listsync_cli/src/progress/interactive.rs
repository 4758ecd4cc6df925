use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use listsync::sync::SyncProgress;

/// Per-collection counters shown next to the spinner.
struct RunState {
    bar: ProgressBar,
    pages: usize,
    upserted: usize,
    modified: usize,
    skipped: usize,
    reseeds: usize,
}

impl RunState {
    fn summary(&self) -> String {
        let mut parts = vec![
            format!("page {}", self.pages),
            format!("{} new", self.upserted),
            format!("{} changed", self.modified),
        ];
        if self.skipped > 0 {
            parts.push(format!("{} skipped", self.skipped));
        }
        if self.reseeds > 0 {
            parts.push(format!("{} reseeds", self.reseeds));
        }
        parts.join(", ")
    }
}

/// Interactive progress reporter using indicatif.
///
/// One spinner per provider collection; its position counts records stored
/// so far. All mutable state sits behind a single lock.
pub struct InteractiveReporter {
    multi: MultiProgress,
    runs: Mutex<HashMap<String, RunState>>,
}

impl InteractiveReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            runs: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RunState>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn handle(&self, event: SyncProgress) {
        let mut runs = self.lock();

        match event {
            SyncProgress::RunStarted {
                provider,
                collection,
                resumed,
                offset,
            } => {
                let label = format!("{provider}/{collection}");
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(Self::counter_style());
                bar.set_prefix(format!("{label:24}"));
                bar.enable_steady_tick(Duration::from_millis(100));
                bar.set_message(if resumed {
                    format!("resuming at offset {offset}...")
                } else {
                    "starting...".to_string()
                });
                runs.insert(
                    label,
                    RunState {
                        bar,
                        pages: 0,
                        upserted: 0,
                        modified: 0,
                        skipped: 0,
                        reseeds: 0,
                    },
                );
            }

            SyncProgress::FetchedPage {
                provider,
                collection,
                page,
                ..
            } => {
                if let Some(run) = runs.get_mut(&format!("{provider}/{collection}")) {
                    run.pages = page;
                    run.bar.set_message(run.summary());
                }
            }

            SyncProgress::FetchRetry {
                provider,
                collection,
                status,
                delay,
                attempt,
            } => {
                if let Some(run) = runs.get(&format!("{provider}/{collection}")) {
                    let cause = status
                        .map_or_else(|| "connection failed".to_string(), |s| format!("HTTP {s}"));
                    run.bar.set_message(format!(
                        "{}, retry {attempt} in {}s",
                        style(cause).yellow(),
                        delay.as_secs()
                    ));
                }
            }

            SyncProgress::RecordSkipped {
                provider,
                collection,
                ..
            } => {
                if let Some(run) = runs.get_mut(&format!("{provider}/{collection}")) {
                    run.skipped += 1;
                }
            }

            SyncProgress::BatchCommitted {
                provider,
                collection,
                upserted,
                modified,
                unchanged,
                ..
            } => {
                if let Some(run) = runs.get_mut(&format!("{provider}/{collection}")) {
                    run.upserted += upserted;
                    run.modified += modified;
                    run.bar.inc((upserted + modified + unchanged) as u64);
                    run.bar.set_message(run.summary());
                }
            }

            SyncProgress::Reseeded {
                provider,
                collection,
                reseeds,
            } => {
                if let Some(run) = runs.get_mut(&format!("{provider}/{collection}")) {
                    run.reseeds = reseeds;
                    run.bar.set_message(run.summary());
                }
            }

            SyncProgress::RunFinished {
                provider,
                collection,
                reason,
                ..
            } => {
                if let Some(run) = runs.get(&format!("{provider}/{collection}")) {
                    let mark = if reason.is_success() {
                        style("✓").green()
                    } else {
                        style("✗").red()
                    };
                    run.bar
                        .finish_with_message(format!("{mark} {} ({reason})", run.summary()));
                }
            }

            SyncProgress::Warning { message } => {
                self.multi
                    .println(format!("{} {message}", style("warning:").yellow()))
                    .ok();
            }

            _ => {}
        }
    }

    pub fn finish(&self) {
        for run in self.lock().values() {
            if !run.bar.is_finished() {
                run.bar.finish();
            }
        }
    }

    fn counter_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.cyan} {spinner:.green} {pos:>7} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
    }
}

impl Default for InteractiveReporter {
    fn default() -> Self {
        Self::new()
    }
}
