use std::time::SystemTime;

use library::{LibraryError, ScanMode, ScanSummary};
use tracing::{info, warn};

use crate::state::{AppState, LibraryStatus};
use crate::watch::configure_watcher;

/// Startup scan. Incremental, so rows indexed by a previous run are reused
/// when their files are unchanged and their art was re-extracted.
pub fn start_index(state: AppState) {
    if state.roots.is_empty() {
        info!("No music roots configured; set music_roots in the config file.");
        *state.status.write() = LibraryStatus::Unconfigured;
        return;
    }
    for root in state.roots.iter() {
        if !root.exists() {
            warn!("Music root not found: {}", root.display());
        }
    }
    start_scan(state, ScanMode::Incremental, true);
}

/// Spawns a scan unless one is already running. Returns `false` when the
/// request was refused.
pub fn start_scan(state: AppState, mode: ScanMode, watch_after: bool) -> bool {
    if !mark_scanning(&state) {
        return false;
    }
    tokio::spawn(async move {
        run_scan(state.clone(), mode).await;
        if watch_after {
            configure_watcher(&state);
        }
    });
    true
}

pub(crate) fn mark_scanning(state: &AppState) -> bool {
    let mut status = state.status.write();
    if matches!(*status, LibraryStatus::Scanning { .. }) || state.library.is_scanning() {
        return false;
    }
    *status = LibraryStatus::Scanning {
        started: SystemTime::now(),
    };
    true
}

/// Runs one scan on the blocking pool and records the outcome in the
/// shared status. Callers must have won `mark_scanning` first.
pub(crate) async fn run_scan(state: AppState, mode: ScanMode) -> Option<ScanSummary> {
    let library = state.library.clone();
    let roots = state.roots.as_ref().clone();
    match tokio::task::spawn_blocking(move || library.scan(&roots, mode)).await {
        Ok(result) => record_scan_result(&state, result),
        Err(err) => {
            let message = err.to_string();
            warn!("Library scan join error: {}", message);
            *state.status.write() = LibraryStatus::Error(message);
            None
        }
    }
}

fn record_scan_result(
    state: &AppState,
    result: Result<ScanSummary, LibraryError>,
) -> Option<ScanSummary> {
    match result {
        Ok(summary) => {
            info!(
                "Library ready: {} tracks, {} artists, {} albums, {} genres",
                summary.stats.tracks, summary.stats.artists, summary.stats.albums, summary.stats.genres
            );
            *state.status.write() = LibraryStatus::Idle;
            Some(summary)
        }
        Err(LibraryError::ScanCancelled) => {
            info!("Library scan cancelled");
            *state.status.write() = LibraryStatus::Idle;
            None
        }
        Err(LibraryError::ScanInProgress) => {
            info!("Library scan already running");
            *state.status.write() = LibraryStatus::Idle;
            None
        }
        Err(err) => {
            let message = err.to_string();
            warn!("Library scan failed: {}", message);
            *state.status.write() = LibraryStatus::Error(message);
            None
        }
    }
}
