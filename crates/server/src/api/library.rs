use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use library::ScanMode;
use tracing::warn;

use crate::query::run_query;
use crate::scan::start_scan;
use crate::state::{
    AppState, JsonResult, ScanQuery, ScanStartedResponse, SongsQuery, SongsResponse, StatusResponse,
    TrackJson,
};
use crate::streaming::{art_response, file_range_response};
use crate::utils::{json_error, json_error_response};

pub async fn list_songs(
    State(state): State<AppState>,
    Query(params): Query<SongsQuery>,
) -> JsonResult<SongsResponse> {
    let tracks = state.library.tracks().map_err(|err| {
        warn!("Failed to load tracks: {}", err);
        json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("library error: {}", err),
        )
    })?;
    let page = run_query(tracks, &params)
        .map_err(|err| json_error(StatusCode::BAD_REQUEST, err.to_string()))?;
    Ok(Json(SongsResponse {
        data: page.tracks.iter().map(TrackJson::from).collect(),
        meta: page.meta,
    }))
}

pub async fn stream_song(
    State(state): State<AppState>,
    AxumPath(track_id): AxumPath<String>,
    headers: HeaderMap,
) -> Response {
    let row = match state.library.get_track_row(&track_id) {
        Ok(Some(row)) => row,
        Ok(None) => return json_error_response(StatusCode::NOT_FOUND, "track not found"),
        Err(err) => {
            warn!("Failed to load track {}: {}", track_id, err);
            return json_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("library error: {}", err),
            );
        }
    };
    // A header that is not visible ASCII falls through as an invalid range.
    let range = headers
        .get(header::RANGE)
        .map(|value| value.to_str().unwrap_or(""));
    file_range_response(&row.file_path, range).await
}

pub async fn get_art(
    State(state): State<AppState>,
    AxumPath(art_id): AxumPath<String>,
) -> Response {
    match state.art().fetch(&art_id) {
        Some(entry) => art_response(entry),
        None => json_error_response(StatusCode::NOT_FOUND, "art not found"),
    }
}

pub async fn get_status(State(state): State<AppState>) -> JsonResult<StatusResponse> {
    let stats = state.library.stats().map_err(|err| {
        json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("library error: {}", err),
        )
    })?;
    let last_scan = state.library.last_scan().map_err(|err| {
        json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("library error: {}", err),
        )
    })?;
    let status = state.status.read().clone();
    Ok(Json(StatusResponse::new(&status, stats, last_scan)))
}

pub async fn trigger_scan(
    State(state): State<AppState>,
    Query(params): Query<ScanQuery>,
) -> Response {
    if state.roots.is_empty() {
        return json_error_response(StatusCode::BAD_REQUEST, "no music roots configured");
    }
    let mode = if params.full.unwrap_or(false) {
        ScanMode::Full
    } else {
        ScanMode::Incremental
    };
    if !start_scan(state, mode, false) {
        return json_error_response(StatusCode::CONFLICT, "a scan is already running");
    }
    (
        StatusCode::ACCEPTED,
        Json(ScanStartedResponse { status: "loading" }),
    )
        .into_response()
}
