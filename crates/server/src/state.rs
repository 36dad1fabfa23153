use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use axum::http::StatusCode;
use axum::Json;
use common::{ScanSession, Track};
use library::{ArtCache, Library, LibraryStats};
use notify::RecommendedWatcher;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::query::PageMeta;

#[derive(Clone)]
pub struct AppState {
    pub library: Library,
    pub status: Arc<RwLock<LibraryStatus>>,
    pub roots: Arc<Vec<PathBuf>>,
    pub watch_music: bool,
    pub watch_debounce_secs: u64,
    pub watcher: Arc<RwLock<Option<RecommendedWatcher>>>,
}

impl AppState {
    pub fn new(library: Library, roots: Vec<PathBuf>) -> Self {
        let status = if roots.is_empty() {
            LibraryStatus::Unconfigured
        } else {
            LibraryStatus::Idle
        };
        Self {
            library,
            status: Arc::new(RwLock::new(status)),
            roots: Arc::new(roots),
            watch_music: false,
            watch_debounce_secs: 2,
            watcher: Arc::new(RwLock::new(None)),
        }
    }

    pub fn art(&self) -> &ArtCache {
        self.library.art()
    }
}

#[derive(Clone, Debug)]
pub enum LibraryStatus {
    Unconfigured,
    Scanning { started: SystemTime },
    Idle,
    Error(String),
}

impl LibraryStatus {
    pub fn label(&self) -> &'static str {
        match self {
            LibraryStatus::Unconfigured => "unconfigured",
            LibraryStatus::Scanning { .. } => "loading",
            LibraryStatus::Idle => "idle",
            LibraryStatus::Error(_) => "error",
        }
    }

    pub fn message(&self) -> Option<String> {
        match self {
            LibraryStatus::Unconfigured => Some("no music roots configured".to_string()),
            LibraryStatus::Scanning { started } => {
                let secs = started.elapsed().map(|d| d.as_secs()).unwrap_or(0);
                Some(format!("library indexing in progress ({}s)", secs))
            }
            LibraryStatus::Idle => None,
            LibraryStatus::Error(message) => Some(format!("library error: {}", message)),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub message: Option<String>,
    pub tracks: usize,
    pub artists: usize,
    pub albums: usize,
    pub genres: usize,
    pub last_scan: Option<ScanSession>,
}

impl StatusResponse {
    pub fn new(status: &LibraryStatus, stats: LibraryStats, last_scan: Option<ScanSession>) -> Self {
        Self {
            status: status.label(),
            message: status.message(),
            tracks: stats.tracks,
            artists: stats.artists,
            albums: stats.albums,
            genres: stats.genres,
            last_scan,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SongsQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub filter: Option<String>,
    pub sort: Option<String>,
    pub subkeyfilter: Option<String>,
}

#[derive(Serialize)]
pub struct SongsResponse {
    pub data: Vec<TrackJson>,
    pub meta: PageMeta,
}

/// Wire shape of a track. Empty lists are sent as `null`.
#[derive(Debug, PartialEq, Serialize)]
pub struct TrackJson {
    pub id: String,
    pub name: String,
    pub link: String,
    pub artist: Option<Vec<String>>,
    pub album: Option<Vec<String>>,
    pub art: Option<Vec<String>>,
    pub length: String,
    #[serde(rename = "fileType")]
    pub file_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<TrackNumberJson>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct TrackNumberJson {
    pub no: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
}

impl From<&Track> for TrackJson {
    fn from(track: &Track) -> Self {
        Self {
            id: track.id.clone(),
            name: track.title.clone(),
            link: track.link.clone(),
            artist: non_empty(&track.artists),
            album: non_empty(&track.album),
            art: non_empty(
                &track
                    .art_ids
                    .iter()
                    .map(|id| common::art_link(id))
                    .collect::<Vec<_>>(),
            ),
            length: format_length(track.duration_secs),
            file_type: track.file_type.clone(),
            track: track.track_number.map(|number| TrackNumberJson {
                no: number.no,
                total: number.total,
            }),
        }
    }
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}

fn format_length(duration_secs: Option<f64>) -> String {
    match duration_secs {
        Some(secs) if secs.is_finite() && secs > 0.0 => format!("{}", secs),
        _ => "0".to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanQuery {
    /// Re-extract every file instead of reusing unchanged rows.
    pub full: Option<bool>,
}

#[derive(Serialize)]
pub struct ScanStartedResponse {
    pub status: &'static str,
}

pub type JsonResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

#[cfg(test)]
mod tests {
    use super::*;
    use common::TrackNumber;
    use std::path::PathBuf;

    fn track() -> Track {
        Track {
            id: "abc".to_string(),
            title: "Song".to_string(),
            artists: Vec::new(),
            album: vec!["Record".to_string()],
            duration_secs: None,
            track_number: None,
            file_type: "flac".to_string(),
            file_path: PathBuf::from("/music/song.flac"),
            art_ids: Vec::new(),
            link: "/songs/abc".to_string(),
        }
    }

    #[test]
    fn empty_lists_serialize_as_null() {
        let json = serde_json::to_value(TrackJson::from(&track())).unwrap();
        assert!(json["artist"].is_null());
        assert!(json["art"].is_null());
        assert_eq!(json["album"], serde_json::json!(["Record"]));
        assert_eq!(json["length"], "0");
        assert_eq!(json["fileType"], "flac");
        assert!(json.get("track").is_none());
    }

    #[test]
    fn art_ids_become_links_and_track_number_is_nested() {
        let mut track = track();
        track.art_ids = vec!["a1".to_string(), "a2".to_string()];
        track.duration_secs = Some(215.5);
        track.track_number = Some(TrackNumber { no: 4, total: None });
        let json = serde_json::to_value(TrackJson::from(&track)).unwrap();
        assert_eq!(json["art"], serde_json::json!(["/art/a1", "/art/a2"]));
        assert_eq!(json["length"], "215.5");
        assert_eq!(json["track"], serde_json::json!({ "no": 4 }));
    }
}
