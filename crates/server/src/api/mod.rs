pub mod library;

use axum::{
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::state::{AppState, HealthResponse};

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/songs", get(library::list_songs))
        .route("/songs/:track_id", get(library::stream_song))
        .route("/art/:art_id", get(library::get_art))
        .route("/status", get(library::get_status))
        .route("/scan", post(library::trigger_scan))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}
