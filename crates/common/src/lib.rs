use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Extensions the scanner will hand to the tag extractor.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "opus", "m4a", "wav", "aiff"];

/// Canonical, client-facing record for one audio file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album: Vec<String>,
    pub duration_secs: Option<f64>,
    pub track_number: Option<TrackNumber>,
    pub file_type: String,
    pub file_path: PathBuf,
    pub art_ids: Vec<String>,
    pub link: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackNumber {
    pub no: u32,
    pub total: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub sort_name: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub sort_title: Option<String>,
    pub year: Option<i32>,
    /// Denormalized name of the first album artist, used for listings.
    pub primary_artist: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Genre {
    pub id: String,
    pub name: String,
}

/// Durable index row. Names are denormalized so the hot read path never
/// needs the join tables.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackRow {
    pub id: String,
    pub content_hash: String,
    pub file_path: PathBuf,
    pub file_size: u64,
    pub modified: u64,
    pub title: String,
    pub artists: Vec<String>,
    pub album: Vec<String>,
    pub album_id: Option<String>,
    pub genres: Vec<String>,
    pub duration_ms: Option<u64>,
    pub track_number: Option<TrackNumber>,
    pub disc_no: Option<u32>,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub codec: Option<String>,
    pub file_type: String,
    pub art_ids: Vec<String>,
}

impl TrackRow {
    pub fn to_track(&self) -> Track {
        Track {
            id: self.id.clone(),
            title: self.title.clone(),
            artists: self.artists.clone(),
            album: self.album.clone(),
            duration_secs: self.duration_ms.map(|ms| ms as f64 / 1000.0),
            track_number: self.track_number,
            file_type: self.file_type.clone(),
            file_path: self.file_path.clone(),
            art_ids: self.art_ids.clone(),
            link: song_link(&self.id),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtistRole {
    Performer,
    AlbumArtist,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackArtist {
    pub track_id: String,
    pub artist_id: String,
    pub role: ArtistRole,
    pub position: u16,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumArtist {
    pub album_id: String,
    pub artist_id: String,
    pub role: ArtistRole,
    pub position: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSession {
    pub id: String,
    pub started_at: u64,
    pub finished_at: Option<u64>,
    pub status: ScanStatus,
    pub paths: Vec<String>,
    pub found: usize,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackScan {
    pub scan_id: String,
    pub track_id: String,
    pub path: String,
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

/// Path-derived track id. Never reads the file, so a rename changes the id.
pub fn content_identifier(resolved: &Path) -> String {
    stable_id(&resolved.to_string_lossy())
}

/// Returns the lowercased extension when it is on the allow-list.
pub fn has_supported_extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        Some(ext)
    } else {
        None
    }
}

pub fn song_link(id: &str) -> String {
    format!("/songs/{}", id)
}

pub fn art_link(id: &str) -> String {
    format!("/art/{}", id)
}

pub fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}
