use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{Album, AlbumArtist, Artist, Genre, ScanSession, ScanStatus, Track, TrackArtist, TrackRow, TrackScan};
use metadata::MetadataError;
use redb::{CommitError, Database, DatabaseError, StorageError, TableError, TransactionError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub mod art;
mod index;
pub mod scan;

pub use art::{ArtCache, ArtEntry};
pub use scan::{content_hash, FileState, IngestedFile, ScannedFile};

use scan::{collect_audio_files, extract_all, root_labels, scan_scope, ScanLocks};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanMode {
    /// Re-extract every file.
    Full,
    /// Reuse rows whose size and mtime are unchanged.
    Incremental,
}

#[derive(Clone)]
pub struct Library {
    db: Arc<Database>,
    art: ArtCache,
    locks: ScanLocks,
    cancel: Arc<AtomicBool>,
}

impl Library {
    pub fn open(db_path: &Path, art: ArtCache) -> Result<Self, LibraryError> {
        let db = Self::open_db(db_path)?;
        let library = Self::with_db(db, art)?;
        info!("Loaded index from {:?}", db_path);
        Ok(library)
    }

    pub fn with_db(db: Arc<Database>, art: ArtCache) -> Result<Self, LibraryError> {
        index::ensure_schema(&db)?;
        Ok(Self {
            db,
            art,
            locks: ScanLocks::default(),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn open_db(path: &Path) -> Result<Arc<Database>, LibraryError> {
        let db = index::open_or_create_db(path)?;
        Ok(Arc::new(db))
    }

    /// Runs one scan session over `roots` and commits it atomically.
    pub fn scan(&self, roots: &[PathBuf], mode: ScanMode) -> Result<ScanSummary, LibraryError> {
        let _guard = self
            .locks
            .try_acquire(roots)
            .ok_or(LibraryError::ScanInProgress)?;
        self.cancel.store(false, Ordering::Relaxed);
        let session = index::begin_session(&self.db, root_labels(roots))?;
        info!("Scan {} started ({:?}) over {:?}", session.id, mode, session.paths);

        let result = self.run_scan(&session, roots, mode);
        self.close_session(&session, result)
    }

    /// Commits an already extracted file list as a scan of `roots`.
    pub fn apply_scan(
        &self,
        roots: &[PathBuf],
        files: Vec<ScannedFile>,
    ) -> Result<ScanSummary, LibraryError> {
        let _guard = self
            .locks
            .try_acquire(roots)
            .ok_or(LibraryError::ScanInProgress)?;
        self.cancel.store(false, Ordering::Relaxed);
        let session = index::begin_session(&self.db, root_labels(roots))?;
        let result = self.commit(&session, roots, files);
        self.close_session(&session, result)
    }

    fn run_scan(
        &self,
        session: &ScanSession,
        roots: &[PathBuf],
        mode: ScanMode,
    ) -> Result<ScanSummary, LibraryError> {
        let files = collect_audio_files(roots);
        let known = match mode {
            ScanMode::Full => HashMap::new(),
            ScanMode::Incremental => index::file_states(&self.db)?,
        };
        let scanned = extract_all(&files, &known, &self.art, &self.cancel)?;
        self.commit(session, roots, scanned)
    }

    fn commit(
        &self,
        session: &ScanSession,
        roots: &[PathBuf],
        scanned: Vec<ScannedFile>,
    ) -> Result<ScanSummary, LibraryError> {
        let fresh_art: Vec<String> = scanned
            .iter()
            .flat_map(|file| file.fresh_art_ids().iter().cloned())
            .collect();
        if self.cancel.load(Ordering::Relaxed) {
            self.art.remove(&fresh_art);
            return Err(LibraryError::ScanCancelled);
        }
        match index::commit_scan(&self.db, session, &scan_scope(roots), scanned) {
            Ok(outcome) => {
                self.art.remove(&outcome.evicted_art);
                Ok(outcome.summary)
            }
            Err(err) => {
                self.art.remove(&fresh_art);
                Err(err)
            }
        }
    }

    fn close_session(
        &self,
        session: &ScanSession,
        result: Result<ScanSummary, LibraryError>,
    ) -> Result<ScanSummary, LibraryError> {
        match result {
            Ok(summary) => {
                info!(
                    "Scan {} completed: {} found, {} added, {} updated, {} removed",
                    summary.session.id,
                    summary.session.found,
                    summary.session.added,
                    summary.session.updated,
                    summary.session.removed
                );
                Ok(summary)
            }
            Err(err) => {
                let status = match err {
                    LibraryError::ScanCancelled => ScanStatus::Cancelled,
                    _ => ScanStatus::Failed,
                };
                warn!("Scan {} ended {:?}: {}", session.id, status, err);
                if let Err(close_err) = index::finish_session(&self.db, &session.id, status) {
                    warn!("Failed to close scan {}: {}", session.id, close_err);
                }
                Err(err)
            }
        }
    }

    /// Asks running scans to stop before their commit.
    pub fn cancel_scans(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_scanning(&self) -> bool {
        self.locks.any_active()
    }

    /// Every indexed track, ordered by file path.
    pub fn tracks(&self) -> Result<Vec<Track>, LibraryError> {
        let mut rows = index::read_track_rows(&self.db)?;
        rows.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        Ok(rows.iter().map(TrackRow::to_track).collect())
    }

    pub fn get_track(&self, track_id: &str) -> Result<Option<Track>, LibraryError> {
        Ok(self.get_track_row(track_id)?.map(|row| row.to_track()))
    }

    pub fn get_track_row(&self, track_id: &str) -> Result<Option<TrackRow>, LibraryError> {
        index::get_track_row(&self.db, track_id)
    }

    pub fn find_track_by_hash(&self, content_hash: &str) -> Result<Option<TrackRow>, LibraryError> {
        index::find_track_by_hash(&self.db, content_hash)
    }

    pub fn stats(&self) -> Result<LibraryStats, LibraryError> {
        index::read_stats(&self.db)
    }

    /// The most recent completed scan session.
    pub fn last_scan(&self) -> Result<Option<ScanSession>, LibraryError> {
        index::last_completed_session(&self.db)
    }

    pub fn get_scan_session(&self, scan_id: &str) -> Result<Option<ScanSession>, LibraryError> {
        index::get_session(&self.db, scan_id)
    }

    /// Newest first.
    pub fn list_scan_sessions(&self, limit: usize) -> Result<Vec<ScanSession>, LibraryError> {
        index::list_sessions(&self.db, limit)
    }

    pub fn track_scans(&self, scan_id: &str) -> Result<Vec<TrackScan>, LibraryError> {
        index::track_scans(&self.db, scan_id)
    }

    pub fn track_artists(&self, track_id: &str) -> Result<Vec<TrackArtist>, LibraryError> {
        index::track_artists(&self.db, track_id)
    }

    pub fn album_artists(&self, album_id: &str) -> Result<Vec<AlbumArtist>, LibraryError> {
        index::album_artists(&self.db, album_id)
    }

    pub fn get_artist(&self, artist_id: &str) -> Result<Option<Artist>, LibraryError> {
        index::get_artist(&self.db, artist_id)
    }

    /// Case-insensitive lookup by display name.
    pub fn find_artist(&self, name: &str) -> Result<Option<Artist>, LibraryError> {
        index::find_artist(&self.db, name)
    }

    pub fn list_artists(&self) -> Result<Vec<Artist>, LibraryError> {
        index::list_artists(&self.db)
    }

    pub fn get_album(&self, album_id: &str) -> Result<Option<Album>, LibraryError> {
        index::get_album(&self.db, album_id)
    }

    pub fn list_albums(&self) -> Result<Vec<Album>, LibraryError> {
        index::list_albums(&self.db)
    }

    pub fn list_genres(&self) -> Result<Vec<Genre>, LibraryError> {
        let mut genres = index::list_genres(&self.db)?;
        genres.sort_by_key(|genre| genre.name.to_lowercase());
        Ok(genres)
    }

    pub fn art(&self) -> &ArtCache {
        &self.art
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryStats {
    pub artists: usize,
    pub albums: usize,
    pub genres: usize,
    pub tracks: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanSummary {
    pub session: ScanSession,
    pub stats: LibraryStats,
}

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Metadata(MetadataError),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    KeyParse(String),
    Unsupported(PathBuf),
    ScanInProgress,
    ScanCancelled,
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Metadata(err) => write!(f, "metadata error: {}", err),
            LibraryError::Redb(err) => write!(f, "db error: {}", err),
            LibraryError::Bincode(err) => write!(f, "bincode error: {}", err),
            LibraryError::KeyParse(value) => write!(f, "key parse error: {}", value),
            LibraryError::Unsupported(path) => write!(f, "unsupported file: {:?}", path),
            LibraryError::ScanInProgress => write!(f, "a scan of these paths is already running"),
            LibraryError::ScanCancelled => write!(f, "scan cancelled"),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<MetadataError> for LibraryError {
    fn from(err: MetadataError) -> Self {
        LibraryError::Metadata(err)
    }
}

impl From<redb::Error> for LibraryError {
    fn from(err: redb::Error) -> Self {
        LibraryError::Redb(err)
    }
}

impl From<DatabaseError> for LibraryError {
    fn from(err: DatabaseError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TableError> for LibraryError {
    fn from(err: TableError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TransactionError> for LibraryError {
    fn from(err: TransactionError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<CommitError> for LibraryError {
    fn from(err: CommitError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for LibraryError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LibraryError::Bincode(err)
    }
}
