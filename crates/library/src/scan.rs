use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use common::{content_identifier, has_supported_extension, path_to_slash_string, TrackNumber, TrackRow};
use metadata::read_tags;
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::art::ArtCache;
use crate::LibraryError;

/// A file observed by a scan, ready to be committed to the index.
#[derive(Clone, Debug)]
pub enum ScannedFile {
    /// Same size and mtime as the indexed row, art still cached.
    Unchanged { id: String, path: PathBuf },
    Fresh(IngestedFile),
}

impl ScannedFile {
    pub fn id(&self) -> &str {
        match self {
            ScannedFile::Unchanged { id, .. } => id,
            ScannedFile::Fresh(file) => &file.row.id,
        }
    }

    pub fn fresh_art_ids(&self) -> &[String] {
        match self {
            ScannedFile::Unchanged { .. } => &[],
            ScannedFile::Fresh(file) => &file.row.art_ids,
        }
    }
}

/// Extracted row plus the tag values that only feed the normalized tables.
#[derive(Clone, Debug, Default)]
pub struct IngestedFile {
    pub row: TrackRow,
    pub album_artists: Vec<String>,
    pub artist_sort: Option<String>,
    pub album_sort: Option<String>,
    pub artist_mbid: Option<String>,
    pub year: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileState {
    pub file_size: u64,
    pub modified: u64,
    pub art_ids: Vec<String>,
}

/// One running scan per distinct root set.
#[derive(Clone, Default)]
pub struct ScanLocks {
    active: Arc<Mutex<HashSet<String>>>,
}

pub struct ScanGuard {
    key: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl ScanLocks {
    pub fn try_acquire(&self, roots: &[PathBuf]) -> Option<ScanGuard> {
        let key = scan_key(roots);
        let mut active = self.active.lock();
        if !active.insert(key.clone()) {
            return None;
        }
        Some(ScanGuard {
            key,
            active: Arc::clone(&self.active),
        })
    }

    pub fn any_active(&self) -> bool {
        !self.active.lock().is_empty()
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.key);
    }
}

pub fn root_labels(roots: &[PathBuf]) -> Vec<String> {
    let mut labels: Vec<String> = roots.iter().map(|root| path_to_slash_string(root)).collect();
    labels.sort();
    labels.dedup();
    labels
}

/// Directories a scan of `roots` is authoritative for: each root as given
/// plus its canonical form when it resolves.
pub fn scan_scope(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut scope = Vec::with_capacity(roots.len() * 2);
    for root in roots {
        scope.push(root.clone());
        if let Ok(canonical) = fs::canonicalize(root) {
            if &canonical != root {
                scope.push(canonical);
            }
        }
    }
    scope
}

fn scan_key(roots: &[PathBuf]) -> String {
    root_labels(roots).join("\x1f")
}

/// Absolute, sorted, de-duplicated list of supported audio files.
pub fn collect_audio_files(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for root in roots {
        let root = match fs::canonicalize(root) {
            Ok(root) => root,
            Err(err) => {
                warn!("Skipping scan root {:?}: {}", root, err);
                continue;
            }
        };
        for entry in WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if has_supported_extension(&name).is_some() {
                files.push(entry.path().to_path_buf());
            }
        }
    }
    files.sort();
    files.dedup();
    files
}

/// Extracts every file in parallel. Files that fail are logged and left
/// out; they never abort the batch.
pub fn extract_all(
    files: &[PathBuf],
    known: &HashMap<String, FileState>,
    art: &ArtCache,
    cancel: &AtomicBool,
) -> Result<Vec<ScannedFile>, LibraryError> {
    let results: Vec<Option<ScannedFile>> = files
        .par_iter()
        .map(|path| {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            let id = content_identifier(path);
            let (file_size, modified) = match file_stamp(path) {
                Ok(stamp) => stamp,
                Err(err) => {
                    warn!("Failed to stat {:?}: {}", path, err);
                    return None;
                }
            };
            if let Some(state) = known.get(&id) {
                if state.file_size == file_size
                    && state.modified == modified
                    && art.contains_all(&state.art_ids)
                {
                    return Some(ScannedFile::Unchanged {
                        id,
                        path: path.clone(),
                    });
                }
            }
            match ingest_file(path, id, file_size, modified, art) {
                Ok(file) => Some(ScannedFile::Fresh(file)),
                Err(err) => {
                    warn!("Skipping {:?}: {}", path, err);
                    None
                }
            }
        })
        .collect();

    let scanned: Vec<ScannedFile> = results.into_iter().flatten().collect();
    if cancel.load(Ordering::Relaxed) {
        let stored: Vec<String> = scanned
            .iter()
            .flat_map(|file| file.fresh_art_ids().iter().cloned())
            .collect();
        art.remove(&stored);
        return Err(LibraryError::ScanCancelled);
    }
    Ok(scanned)
}

/// Reads one file into an index row. Embedded pictures are pushed into the
/// art cache in tag order.
pub fn ingest_file(
    path: &Path,
    id: String,
    file_size: u64,
    modified: u64,
    art: &ArtCache,
) -> Result<IngestedFile, LibraryError> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let file_type = has_supported_extension(&name)
        .ok_or_else(|| LibraryError::Unsupported(path.to_path_buf()))?;
    let content_hash = content_hash(path)?;
    let tags = read_tags(path)?;

    let art_ids = tags
        .pictures
        .into_iter()
        .map(|picture| art.store(picture.mime, picture.data).id)
        .collect::<Vec<_>>();
    debug!("Ingested {:?} ({} pictures)", path, art_ids.len());

    let row = TrackRow {
        id,
        content_hash,
        file_path: path.to_path_buf(),
        file_size,
        modified,
        title: tags.title,
        artists: tags.artists,
        album: tags.album,
        album_id: None,
        genres: tags.genres,
        duration_ms: tags.duration_ms,
        track_number: tags.track.map(|track| TrackNumber {
            no: track.no,
            total: track.total,
        }),
        disc_no: tags.disc_no,
        bitrate: tags.properties.bitrate,
        sample_rate: tags.properties.sample_rate,
        channels: tags.properties.channels,
        codec: tags.codec,
        file_type,
        art_ids,
    };

    Ok(IngestedFile {
        row,
        album_artists: tags.album_artists,
        artist_sort: tags.artist_sort,
        album_sort: tags.album_sort,
        artist_mbid: tags.artist_mbid,
        year: tags.year,
    })
}

/// blake3 over the file bytes; the durable duplicate key.
pub fn content_hash(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn file_stamp(path: &Path) -> io::Result<(u64, u64)> {
    let meta = fs::metadata(path)?;
    let modified = meta
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs())
        .unwrap_or(0);
    Ok((meta.len(), modified))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_only_supported_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("Artist").join("Album");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("b.MP3"), b"x").unwrap();
        fs::write(nested.join("a.flac"), b"x").unwrap();
        fs::write(nested.join("cover.jpg"), b"x").unwrap();
        fs::write(dir.path().join("notes"), b"x").unwrap();

        let files = collect_audio_files(&[dir.path().to_path_buf()]);
        let names: Vec<String> = files
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.flac".to_string(), "b.MP3".to_string()]);
        assert!(files.iter().all(|path| path.is_absolute()));
    }

    #[test]
    fn missing_root_yields_nothing() {
        let files = collect_audio_files(&[PathBuf::from("/definitely/not/here")]);
        assert!(files.is_empty());
    }

    #[test]
    fn unreadable_files_are_skipped_silently() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("broken.mp3");
        fs::write(&bad, b"garbage").unwrap();
        let art = ArtCache::new();
        let cancel = AtomicBool::new(false);
        let scanned = extract_all(&[bad], &HashMap::new(), &art, &cancel).unwrap();
        assert!(scanned.is_empty());
        assert!(art.is_empty());
    }

    #[test]
    fn unchanged_files_are_not_re_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.mp3");
        fs::write(&path, b"garbage that would fail to parse").unwrap();
        let (file_size, modified) = file_stamp(&path).unwrap();
        let mut known = HashMap::new();
        known.insert(
            content_identifier(&path),
            FileState {
                file_size,
                modified,
                art_ids: Vec::new(),
            },
        );
        let cancel = AtomicBool::new(false);
        let scanned = extract_all(&[path.clone()], &known, &ArtCache::new(), &cancel).unwrap();
        assert_eq!(scanned.len(), 1);
        assert!(matches!(&scanned[0], ScannedFile::Unchanged { path: p, .. } if p == &path));
    }

    #[test]
    fn cancelled_extraction_reports_cancellation() {
        let cancel = AtomicBool::new(true);
        let result = extract_all(
            &[PathBuf::from("/tmp/x.mp3")],
            &HashMap::new(),
            &ArtCache::new(),
            &cancel,
        );
        assert!(matches!(result, Err(LibraryError::ScanCancelled)));
    }

    #[test]
    fn scan_lock_is_keyed_by_root_set() {
        let locks = ScanLocks::default();
        let a = vec![PathBuf::from("/music/a"), PathBuf::from("/music/b")];
        let reversed = vec![PathBuf::from("/music/b"), PathBuf::from("/music/a")];
        let guard = locks.try_acquire(&a).unwrap();
        assert!(locks.try_acquire(&reversed).is_none());
        assert!(locks.try_acquire(&[PathBuf::from("/other")]).is_some());
        drop(guard);
        assert!(locks.try_acquire(&reversed).is_some());
    }

    #[test]
    fn content_hash_depends_on_bytes_not_path() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp3");
        let b = dir.path().join("b.mp3");
        fs::write(&a, b"same bytes").unwrap();
        fs::write(&b, b"same bytes").unwrap();
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
        assert_ne!(content_identifier(&a), content_identifier(&b));
    }
}
