//! Download engine: walks the catalog in order, resolves each item against
//! the local store and fetches what is missing, one item at a time, until
//! the catalog ends or the per-run download limit is reached.

pub mod error;
pub mod file;
pub mod paths;
pub mod resolver;

use std::collections::HashSet;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

pub use self::error::{DownloadError, SyncAborted};
use self::resolver::{Decision, PlacementResolver};
use crate::auth::Session;
use crate::catalog::{self, CatalogStream};
use crate::icloud::{RemoteItem, RemoteService};

/// Subset of application config consumed by the download engine.
/// Decoupled from CLI parsing so the engine can be tested independently.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub(crate) directory: PathBuf,
    pub(crate) download_limit: usize,
    /// Items whose folder comes from the added date instead of the asset date.
    pub(crate) added_date_ids: HashSet<String>,
    pub(crate) dry_run: bool,
    pub(crate) no_progress_bar: bool,
}

/// Counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub scanned: usize,
    pub skipped: usize,
    /// Items fetched, or that would have been in a dry run.
    pub downloaded: usize,
    pub limit_reached: bool,
    pub cancelled: bool,
}

/// Create a progress bar with a consistent template.
///
/// Returns `ProgressBar::hidden()` when the user passed `--no-progress-bar` or
/// stdout is not a TTY (e.g. piped output, cron jobs).
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

/// Process `items` in order until they run out, the limit is reached or
/// `shutdown` fires.
///
/// A catalog, fetch or disk error stops the run; the counts reached so far
/// travel with the error.
pub async fn run(
    service: &dyn RemoteService,
    mut items: CatalogStream<'_>,
    config: &DownloadConfig,
    progress: &ProgressBar,
    shutdown: &CancellationToken,
) -> Result<SyncReport, SyncAborted> {
    let resolver = PlacementResolver::new(&config.directory, config.added_date_ids.iter().cloned());
    let mut report = SyncReport::default();

    loop {
        if report.downloaded >= config.download_limit {
            report.limit_reached = true;
            progress.suspend(|| {
                tracing::info!("Download limit of {} reached, stopping", config.download_limit)
            });
            break;
        }
        if shutdown.is_cancelled() {
            report.cancelled = true;
            progress.suspend(|| tracing::info!("Shutdown requested, stopping new downloads"));
            break;
        }

        let entry = match items.next().await {
            Some(Ok(entry)) => entry,
            Some(Err(e)) => return Err(SyncAborted { report, source: e.into() }),
            None => break,
        };
        report.scanned += 1;

        let decision = match resolver.resolve(&entry.item).await {
            Ok(decision) => decision,
            Err(source) => return Err(SyncAborted { report, source }),
        };
        match decision {
            Decision::Skip(path) => {
                tracing::debug!("{} already exists", path.display());
                report.skipped += 1;
            }
            Decision::Fetch { path, mtime } => {
                progress.set_message(entry.item.filename.clone());
                if config.dry_run {
                    progress.suspend(|| {
                        tracing::info!("[DRY RUN] Would download {}", path.display())
                    });
                } else if let Err(source) = fetch_item(service, &entry.item, &path, mtime).await {
                    return Err(SyncAborted { report, source });
                }
                report.downloaded += 1;
            }
        }
        progress.inc(1);
    }

    Ok(report)
}

async fn fetch_item(
    service: &dyn RemoteService,
    item: &RemoteItem,
    path: &Path,
    mtime: i64,
) -> Result<(), DownloadError> {
    tracing::debug!(
        id = %item.id,
        size_bytes = ?item.size,
        path = %path.display(),
        "downloading",
    );
    let content = service
        .fetch_original(item)
        .await
        .map_err(|source| DownloadError::Fetch {
            id: item.id.clone(),
            source,
        })?;
    file::write_atomically(content, &item.id, path, item.size, mtime).await?;
    tracing::info!("Downloaded {}", path.display());
    Ok(())
}

/// Entry point for the download engine: list the catalog, run the engine
/// behind a progress bar and log the summary, also when the run aborts.
pub async fn sync_library(
    service: &dyn RemoteService,
    session: &Session,
    config: &DownloadConfig,
    shutdown: CancellationToken,
) -> Result<SyncReport> {
    let started = Instant::now();
    let items = catalog::list_all_items(service, session)?;

    // Only sizes the progress bar.
    let total = match service.item_count().await {
        Ok(count) => count.unwrap_or(0),
        Err(e) => {
            tracing::debug!("Could not count catalog items: {}", e);
            0
        }
    };
    let pb = create_progress_bar(config.no_progress_bar, total);

    let result = run(service, items, config, &pb, &shutdown).await;
    pb.finish_and_clear();

    match result {
        Ok(report) => {
            log_summary(&report, config, started.elapsed());
            Ok(report)
        }
        Err(aborted) => {
            log_summary(&aborted.report, config, started.elapsed());
            Err(aborted.into())
        }
    }
}

fn log_summary(report: &SyncReport, config: &DownloadConfig, elapsed: Duration) {
    if config.dry_run {
        tracing::info!("── Dry Run Summary ──");
        tracing::info!(
            "  {} scanned, {} up to date, {} would be downloaded",
            report.scanned,
            report.skipped,
            report.downloaded
        );
    } else {
        tracing::info!("── Summary ──");
        tracing::info!(
            "  {} scanned, {} up to date, {} downloaded",
            report.scanned,
            report.skipped,
            report.downloaded
        );
    }
    tracing::info!("  destination: {}", config.directory.display());
    if report.limit_reached {
        tracing::info!("  download limit: {}", config.download_limit);
    }
    tracing::info!("  elapsed: {}", format_duration(elapsed));
}

fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
