use std::env;
use std::path::PathBuf;

use library::{ArtCache, Library, ScanMode};
use tracing_subscriber::EnvFilter;

/// Usage: import_scan [--full] <index_path> <music_root>...
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut mode = ScanMode::Incremental;
    let mut positional: Vec<String> = Vec::new();
    for arg in env::args().skip(1) {
        if arg == "--full" {
            mode = ScanMode::Full;
        } else {
            positional.push(arg);
        }
    }
    let mut positional = positional.into_iter();
    let index_path = positional
        .next()
        .or_else(|| env::var("INDEX_PATH").ok())
        .unwrap_or_else(|| "data/library.redb".to_string());
    let mut roots: Vec<PathBuf> = positional.map(PathBuf::from).collect();
    if roots.is_empty() {
        let music_root = env::var("MUSIC_ROOT").map_err(|_| "MUSIC_ROOT not set and no path argument")?;
        roots.push(PathBuf::from(music_root));
    }

    let library = Library::open(&PathBuf::from(&index_path), ArtCache::new())?;
    let summary = library.scan(&roots, mode)?;
    let session = &summary.session;

    println!(
        "Scan {}: {} found, {} added, {} updated, {} removed",
        session.id, session.found, session.added, session.updated, session.removed
    );
    println!(
        "Indexed: {} tracks, {} artists, {} albums, {} genres",
        summary.stats.tracks, summary.stats.artists, summary.stats.albums, summary.stats.genres
    );

    Ok(())
}
