use std::time::Duration;

use library::{ArtCache, Library};
use server::app_router;
use server::config::{
    config_path_from_env, load_or_create_config, resolve_music_roots, resolve_path, DEFAULT_PORT,
};
use server::scan::start_index;
use server::state::AppState;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let index_path_value = config.index_path.trim();
    let index_path_value = if index_path_value.is_empty() {
        "library.redb"
    } else {
        index_path_value
    };
    let port = if config.port == 0 { DEFAULT_PORT } else { config.port };
    let bind_addr = format!("0.0.0.0:{}", port);

    let index_path = resolve_path(&config_path, index_path_value);
    let art = ArtCache::with_max_entries(config.art_cache_max_entries);
    let library = Library::open(&index_path, art.clone())?;

    let roots = resolve_music_roots(&config_path, &config.music_roots);
    let mut state = AppState::new(library, roots);
    state.watch_music = config.watch_music;
    state.watch_debounce_secs = config.watch_debounce_secs;
    start_index(state.clone());

    if let Ok(delay_ms) = std::env::var("SOUNDSHELF_START_DELAY_MS") {
        if let Ok(delay_ms) = delay_ms.parse::<u64>() {
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }

    let app = app_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.library.cancel_scans();
    *state.watcher.write() = None;
    art.clear();
    info!("Art cache cleared; bye.");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}
