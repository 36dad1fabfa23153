use std::path::PathBuf;
use std::time::Duration;

use common::has_supported_extension;
use library::ScanMode;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use crate::scan::{mark_scanning, run_scan};
use crate::state::AppState;

pub fn configure_watcher(state: &AppState) {
    if !state.watch_music {
        info!("Watcher disabled (watch_music=false)");
        *state.watcher.write() = None;
        return;
    }
    if state.watcher.read().is_some() {
        return;
    }

    let watch_debounce_secs = if state.watch_debounce_secs == 0 {
        2
    } else {
        state.watch_debounce_secs
    };
    let watch_debounce = Duration::from_secs(watch_debounce_secs);

    match setup_watcher(state.clone(), state.roots.as_ref(), watch_debounce) {
        Ok(watcher) => {
            info!(
                "Watching {} root(s) for changes (debounce {}s)",
                state.roots.len(),
                watch_debounce.as_secs()
            );
            *state.watcher.write() = Some(watcher);
        }
        Err(err) => {
            warn!("Failed to start watcher: {}", err);
            *state.watcher.write() = None;
        }
    }
}

fn setup_watcher(
    state: AppState,
    roots: &[PathBuf],
    debounce: Duration,
) -> Result<RecommendedWatcher, notify::Error> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        NotifyConfig::default(),
    )?;

    for root in roots {
        if let Err(err) = watcher.watch(root, RecursiveMode::Recursive) {
            warn!("Failed to watch {}: {}", root.display(), err);
        }
    }

    tokio::spawn(async move {
        watch_loop(state, rx, debounce).await;
    });

    Ok(watcher)
}

async fn watch_loop(state: AppState, mut rx: UnboundedReceiver<Event>, debounce: Duration) {
    loop {
        let event = match rx.recv().await {
            Some(event) => event,
            None => break,
        };
        if !is_relevant_event(&event) {
            continue;
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => {
                    if mark_scanning(&state) {
                        info!("Library auto-scan started");
                        run_scan(state.clone(), ScanMode::Incremental).await;
                    } else {
                        info!("Scan already running; auto-scan skipped");
                    }
                    break;
                }
                maybe_event = rx.recv() => {
                    if maybe_event.is_none() {
                        return;
                    }
                }
            }
        }
    }
}

/// Create, modify and remove events that touch an audio file or a
/// directory.
fn is_relevant_event(event: &Event) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }
    event.paths.iter().any(|path| {
        match path.extension() {
            Some(_) => path
                .file_name()
                .map(|name| has_supported_extension(&name.to_string_lossy()).is_some())
                .unwrap_or(false),
            None => true,
        }
    })
}
