use std::path::PathBuf;
use std::time::Duration;

use metube_core::{CleanupSection, FetchOrchestrator, SweepReport};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Periodically clear old scratch files and expired cache entries.
pub fn spawn(
    fetch: FetchOrchestrator,
    cleanup: CleanupSection,
    keep: Vec<PathBuf>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cleanup.interval());
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            run_once(&fetch, cleanup.max_age(), &keep).await;
        }
    })
}

pub async fn run_once(
    fetch: &FetchOrchestrator,
    max_age: Duration,
    keep: &[PathBuf],
) -> SweepReport {
    let scratch = fetch.scratch().clone();
    let keep = keep.to_vec();
    let report = match tokio::task::spawn_blocking(move || scratch.sweep(max_age, &keep)).await {
        Ok(report) => report,
        Err(err) => {
            warn!(error = %err, "scratch sweep aborted");
            SweepReport::default()
        }
    };
    if report.removed > 0 {
        info!(
            removed = report.removed,
            bytes_freed = report.bytes_freed,
            "swept scratch directory"
        );
    } else {
        debug!(skipped = report.skipped, "scratch sweep found nothing to remove");
    }

    match fetch.purge_expired_cache().await {
        Ok(0) => {}
        Ok(purged) => info!(purged, "purged expired cache entries"),
        Err(err) => warn!(error = %err, "failed to purge expired cache entries"),
    }
    report
}
