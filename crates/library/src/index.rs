use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{
    stable_id, Album, AlbumArtist, Artist, ArtistRole, Genre, ScanSession, ScanStatus, TrackArtist,
    TrackRow, TrackScan,
};
use redb::{Database, ReadableTable, TableDefinition, TableError, WriteTransaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::scan::{FileState, IngestedFile, ScannedFile};
use crate::{LibraryError, LibraryStats, ScanSummary};

const INDEX_VERSION: u32 = 1;
const KEY_SEP: char = '\x1f';

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const ARTISTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("artists");
const ARTISTS_BY_NAME_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("artists_by_name");
const ALBUMS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("albums");
const ALBUMS_BY_KEY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("albums_by_key");
const GENRES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("genres");
const GENRES_BY_NAME_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("genres_by_name");
const TRACKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tracks");
const TRACKS_BY_HASH_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tracks_by_hash");
const TRACK_ARTISTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("track_artists");
const ALBUM_ARTISTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("album_artists");
const SCAN_SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("scan_sessions");
const TRACK_SCANS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("track_scans");

const ALL_TABLES: [TableDefinition<&str, &[u8]>; 13] = [
    META_TABLE,
    ARTISTS_TABLE,
    ARTISTS_BY_NAME_TABLE,
    ALBUMS_TABLE,
    ALBUMS_BY_KEY_TABLE,
    GENRES_TABLE,
    GENRES_BY_NAME_TABLE,
    TRACKS_TABLE,
    TRACKS_BY_HASH_TABLE,
    TRACK_ARTISTS_TABLE,
    ALBUM_ARTISTS_TABLE,
    SCAN_SESSIONS_TABLE,
    TRACK_SCANS_TABLE,
];

const META_VERSION_KEY: &str = "version";
const META_STATS_KEY: &str = "stats";
const META_LAST_SCAN_KEY: &str = "last_scan";

pub(crate) struct CommitOutcome {
    pub summary: ScanSummary,
    /// Art ids no longer referenced by any row.
    pub evicted_art: Vec<String>,
}

enum Upsert {
    Added,
    Updated,
    Duplicate,
}

pub(crate) fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

/// Creates every table and resets them all when the stored layout version
/// differs from this build's.
pub(crate) fn ensure_schema(db: &Database) -> Result<(), LibraryError> {
    let version = read_version(db)?;
    let write_txn = db.begin_write()?;
    if version != Some(INDEX_VERSION) {
        match version {
            Some(version) => warn!("Index version mismatch ({}); resetting index", version),
            None => info!("Creating index tables"),
        }
        for table in ALL_TABLES {
            clear_table(&write_txn, table)?;
        }
    }
    for table in ALL_TABLES {
        write_txn.open_table(table)?;
    }
    put_value(&write_txn, META_TABLE, META_VERSION_KEY, &INDEX_VERSION)?;
    write_txn.commit()?;
    Ok(())
}

fn read_version(db: &Database) -> Result<Option<u32>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let version = match table.get(META_VERSION_KEY)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(version)
}

pub(crate) fn begin_session(db: &Database, paths: Vec<String>) -> Result<ScanSession, LibraryError> {
    let session = ScanSession {
        id: Uuid::new_v4().simple().to_string(),
        started_at: now_secs(),
        finished_at: None,
        status: ScanStatus::Running,
        paths,
        found: 0,
        added: 0,
        updated: 0,
        removed: 0,
    };
    let write_txn = db.begin_write()?;
    put_value(&write_txn, SCAN_SESSIONS_TABLE, &session.id, &session)?;
    write_txn.commit()?;
    Ok(session)
}

pub(crate) fn finish_session(
    db: &Database,
    session_id: &str,
    status: ScanStatus,
) -> Result<(), LibraryError> {
    let write_txn = db.begin_write()?;
    if let Some(mut session) = get_value::<ScanSession>(&write_txn, SCAN_SESSIONS_TABLE, session_id)? {
        session.status = status;
        session.finished_at = Some(now_secs());
        put_value(&write_txn, SCAN_SESSIONS_TABLE, session_id, &session)?;
    }
    write_txn.commit()?;
    Ok(())
}

/// Applies one complete scan in a single transaction: upserts every
/// observed file, records the scan membership, deletes tracks under `scope`
/// the scan did not observe and prunes entities nothing references anymore.
pub(crate) fn commit_scan(
    db: &Database,
    session: &ScanSession,
    scope: &[PathBuf],
    files: Vec<ScannedFile>,
) -> Result<CommitOutcome, LibraryError> {
    let write_txn = db.begin_write()?;
    let mut seen: HashSet<String> = HashSet::new();
    let mut evicted: Vec<String> = Vec::new();
    let mut added = 0usize;
    let mut updated = 0usize;

    for file in files {
        match file {
            ScannedFile::Unchanged { id, path } => {
                if seen.contains(&id)
                    || get_value::<TrackRow>(&write_txn, TRACKS_TABLE, &id)?.is_none()
                {
                    continue;
                }
                record_track_scan(&write_txn, &session.id, &id, &path)?;
                seen.insert(id);
            }
            ScannedFile::Fresh(file) => {
                let id = file.row.id.clone();
                let path = file.row.file_path.clone();
                if seen.contains(&id) {
                    evicted.extend(file.row.art_ids);
                    continue;
                }
                match upsert_track(&write_txn, file, &seen, &mut evicted)? {
                    Upsert::Added => added += 1,
                    Upsert::Updated => updated += 1,
                    Upsert::Duplicate => continue,
                }
                record_track_scan(&write_txn, &session.id, &id, &path)?;
                seen.insert(id);
            }
        }
    }

    let removed = remove_orphans(&write_txn, scope, &seen, &mut evicted)?;
    prune_unreferenced(&write_txn)?;
    prune_track_scans(&write_txn, &session.id)?;

    let stats = LibraryStats {
        artists: count_rows(&write_txn, ARTISTS_TABLE)?,
        albums: count_rows(&write_txn, ALBUMS_TABLE)?,
        genres: count_rows(&write_txn, GENRES_TABLE)?,
        tracks: count_rows(&write_txn, TRACKS_TABLE)?,
    };
    put_value(&write_txn, META_TABLE, META_STATS_KEY, &stats)?;

    let mut closed = session.clone();
    closed.status = ScanStatus::Completed;
    closed.finished_at = Some(now_secs());
    closed.found = seen.len();
    closed.added = added;
    closed.updated = updated;
    closed.removed = removed;
    put_value(&write_txn, SCAN_SESSIONS_TABLE, &closed.id, &closed)?;
    put_id(&write_txn, META_TABLE, META_LAST_SCAN_KEY, &closed.id)?;

    write_txn.commit()?;
    Ok(CommitOutcome {
        summary: ScanSummary {
            session: closed,
            stats,
        },
        evicted_art: evicted,
    })
}

fn upsert_track(
    txn: &WriteTransaction,
    mut file: IngestedFile,
    seen: &HashSet<String>,
    evicted: &mut Vec<String>,
) -> Result<Upsert, LibraryError> {
    let id = file.row.id.clone();
    let hash = file.row.content_hash.clone();

    let mut replaced = false;
    if let Some(owner) = get_id(txn, TRACKS_BY_HASH_TABLE, &hash)? {
        if owner != id {
            if seen.contains(&owner) {
                debug!(
                    "Duplicate content at {:?}; keeping the earlier path",
                    file.row.file_path
                );
                evicted.extend(file.row.art_ids);
                return Ok(Upsert::Duplicate);
            }
            if let Some(old) = remove_track(txn, &owner)? {
                debug!("Content moved from {:?} to {:?}", old.file_path, file.row.file_path);
                evicted.extend(old.art_ids);
                replaced = true;
            }
        }
    }

    let previous: Option<TrackRow> = get_value(txn, TRACKS_TABLE, &id)?;
    if let Some(previous) = &previous {
        if previous.content_hash != hash
            && get_id(txn, TRACKS_BY_HASH_TABLE, &previous.content_hash)?.as_deref()
                == Some(id.as_str())
        {
            remove_key(txn, TRACKS_BY_HASH_TABLE, &previous.content_hash)?;
        }
        evicted.extend(
            previous
                .art_ids
                .iter()
                .filter(|art_id| !file.row.art_ids.contains(art_id))
                .cloned(),
        );
    }

    let performer_ids = upsert_artists(
        txn,
        &file.row.artists,
        file.artist_sort.as_deref(),
        file.artist_mbid.as_deref(),
    )?;
    file.row.album_id = upsert_album(txn, &file)?;
    upsert_genres(txn, &file.row.genres)?;

    remove_prefix(txn, TRACK_ARTISTS_TABLE, &prefix_key(&id))?;
    for (position, artist_id) in performer_ids.into_iter().enumerate() {
        let link = TrackArtist {
            track_id: id.clone(),
            artist_id,
            role: ArtistRole::Performer,
            position: position as u16,
        };
        put_value(txn, TRACK_ARTISTS_TABLE, &position_key(&id, position), &link)?;
    }

    put_value(txn, TRACKS_TABLE, &id, &file.row)?;
    put_id(txn, TRACKS_BY_HASH_TABLE, &hash, &id)?;

    if previous.is_some() || replaced {
        Ok(Upsert::Updated)
    } else {
        Ok(Upsert::Added)
    }
}

/// Returns artist ids in the given order, without repeats.
fn upsert_artists(
    txn: &WriteTransaction,
    names: &[String],
    sort_name: Option<&str>,
    external_id: Option<&str>,
) -> Result<Vec<String>, LibraryError> {
    let mut ids: Vec<String> = Vec::with_capacity(names.len());
    for (idx, name) in names.iter().enumerate() {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let (sort_name, external_id) = if idx == 0 {
            (sort_name, external_id)
        } else {
            (None, None)
        };
        let id = upsert_artist(txn, name, sort_name, external_id)?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

fn upsert_artist(
    txn: &WriteTransaction,
    name: &str,
    sort_name: Option<&str>,
    external_id: Option<&str>,
) -> Result<String, LibraryError> {
    let key = name_key(name);
    let id = get_id(txn, ARTISTS_BY_NAME_TABLE, &key)?.unwrap_or_else(|| stable_id(&key));
    let artist = match get_value::<Artist>(txn, ARTISTS_TABLE, &id)? {
        Some(mut existing) => {
            if existing.sort_name.is_none() {
                existing.sort_name = sort_name.map(str::to_string);
            }
            if existing.external_id.is_none() {
                existing.external_id = external_id.map(str::to_string);
            }
            existing
        }
        None => Artist {
            id: id.clone(),
            name: name.to_string(),
            sort_name: sort_name.map(str::to_string),
            external_id: external_id.map(str::to_string),
        },
    };
    put_value(txn, ARTISTS_TABLE, &id, &artist)?;
    put_id(txn, ARTISTS_BY_NAME_TABLE, &key, &id)?;
    Ok(id)
}

fn upsert_album(txn: &WriteTransaction, file: &IngestedFile) -> Result<Option<String>, LibraryError> {
    let Some(title) = file
        .row
        .album
        .first()
        .map(|title| title.trim())
        .filter(|title| !title.is_empty())
    else {
        return Ok(None);
    };

    let (artist_names, role) = if file.album_artists.is_empty() {
        (
            file.row.artists.iter().take(1).cloned().collect::<Vec<_>>(),
            ArtistRole::Performer,
        )
    } else {
        (file.album_artists.clone(), ArtistRole::AlbumArtist)
    };
    let primary_artist = artist_names.first().cloned();

    let key = album_key(title, primary_artist.as_deref());
    let id = get_id(txn, ALBUMS_BY_KEY_TABLE, &key)?.unwrap_or_else(|| stable_id(&key));
    let existing: Option<Album> = get_value(txn, ALBUMS_TABLE, &id)?;
    let primary_artist = existing
        .as_ref()
        .and_then(|album| album.primary_artist.clone())
        .or(primary_artist);
    let album = Album {
        id: id.clone(),
        title: existing
            .as_ref()
            .map(|album| album.title.clone())
            .unwrap_or_else(|| title.to_string()),
        sort_title: file
            .album_sort
            .clone()
            .or_else(|| existing.as_ref().and_then(|album| album.sort_title.clone())),
        year: file
            .year
            .or_else(|| existing.as_ref().and_then(|album| album.year)),
        primary_artist,
    };
    put_value(txn, ALBUMS_TABLE, &id, &album)?;
    put_id(txn, ALBUMS_BY_KEY_TABLE, &key, &id)?;

    let artist_ids = upsert_artists(txn, &artist_names, None, None)?;
    remove_prefix(txn, ALBUM_ARTISTS_TABLE, &prefix_key(&id))?;
    for (position, artist_id) in artist_ids.into_iter().enumerate() {
        let link = AlbumArtist {
            album_id: id.clone(),
            artist_id,
            role,
            position: position as u16,
        };
        put_value(txn, ALBUM_ARTISTS_TABLE, &position_key(&id, position), &link)?;
    }
    Ok(Some(id))
}

fn upsert_genres(txn: &WriteTransaction, names: &[String]) -> Result<(), LibraryError> {
    for name in names {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let key = name_key(name);
        if get_id(txn, GENRES_BY_NAME_TABLE, &key)?.is_some() {
            continue;
        }
        let genre = Genre {
            id: stable_id(&key),
            name: name.to_string(),
        };
        put_value(txn, GENRES_TABLE, &genre.id, &genre)?;
        put_id(txn, GENRES_BY_NAME_TABLE, &key, &genre.id)?;
    }
    Ok(())
}

fn remove_track(txn: &WriteTransaction, id: &str) -> Result<Option<TrackRow>, LibraryError> {
    let removed: Option<TrackRow> = {
        let mut table = txn.open_table(TRACKS_TABLE)?;
        let removed = match table.remove(id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        removed
    };
    if let Some(row) = &removed {
        if get_id(txn, TRACKS_BY_HASH_TABLE, &row.content_hash)?.as_deref() == Some(id) {
            remove_key(txn, TRACKS_BY_HASH_TABLE, &row.content_hash)?;
        }
        remove_prefix(txn, TRACK_ARTISTS_TABLE, &prefix_key(id))?;
    }
    Ok(removed)
}

/// Tracks outside `scope` belong to other root sets sharing this index and
/// are left alone.
fn remove_orphans(
    txn: &WriteTransaction,
    scope: &[PathBuf],
    seen: &HashSet<String>,
    evicted: &mut Vec<String>,
) -> Result<usize, LibraryError> {
    let orphan_ids: Vec<String> = {
        let table = txn.open_table(TRACKS_TABLE)?;
        let mut ids = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let key = entry.0.value();
            if seen.contains(key) {
                continue;
            }
            let row: TrackRow = decode_value(entry.1.value())?;
            if scope.iter().any(|root| row.file_path.starts_with(root)) {
                ids.push(key.to_string());
            }
        }
        ids
    };

    let mut removed = 0usize;
    for id in &orphan_ids {
        if let Some(row) = remove_track(txn, id)? {
            debug!("Removing orphan track {:?}", row.file_path);
            evicted.extend(row.art_ids);
            removed += 1;
        }
    }
    Ok(removed)
}

/// Deletes albums, artists and genres that no track (or surviving album)
/// points at.
fn prune_unreferenced(txn: &WriteTransaction) -> Result<(), LibraryError> {
    let mut album_ids: HashSet<String> = HashSet::new();
    let mut genre_keys: HashSet<String> = HashSet::new();
    for row in read_all_in::<TrackRow>(txn, TRACKS_TABLE)? {
        if let Some(album_id) = row.album_id {
            album_ids.insert(album_id);
        }
        for genre in &row.genres {
            genre_keys.insert(name_key(genre));
        }
    }

    for album in read_all_in::<Album>(txn, ALBUMS_TABLE)? {
        if album_ids.contains(&album.id) {
            continue;
        }
        remove_key(txn, ALBUMS_TABLE, &album.id)?;
        remove_prefix(txn, ALBUM_ARTISTS_TABLE, &prefix_key(&album.id))?;
        let key = album_key(&album.title, album.primary_artist.as_deref());
        if get_id(txn, ALBUMS_BY_KEY_TABLE, &key)?.as_deref() == Some(album.id.as_str()) {
            remove_key(txn, ALBUMS_BY_KEY_TABLE, &key)?;
        }
    }

    let mut artist_ids: HashSet<String> = HashSet::new();
    for link in read_all_in::<TrackArtist>(txn, TRACK_ARTISTS_TABLE)? {
        artist_ids.insert(link.artist_id);
    }
    for link in read_all_in::<AlbumArtist>(txn, ALBUM_ARTISTS_TABLE)? {
        artist_ids.insert(link.artist_id);
    }
    for artist in read_all_in::<Artist>(txn, ARTISTS_TABLE)? {
        if artist_ids.contains(&artist.id) {
            continue;
        }
        remove_key(txn, ARTISTS_TABLE, &artist.id)?;
        let key = name_key(&artist.name);
        if get_id(txn, ARTISTS_BY_NAME_TABLE, &key)?.as_deref() == Some(artist.id.as_str()) {
            remove_key(txn, ARTISTS_BY_NAME_TABLE, &key)?;
        }
    }

    for genre in read_all_in::<Genre>(txn, GENRES_TABLE)? {
        let key = name_key(&genre.name);
        if genre_keys.contains(&key) {
            continue;
        }
        remove_key(txn, GENRES_TABLE, &genre.id)?;
        remove_key(txn, GENRES_BY_NAME_TABLE, &key)?;
    }
    Ok(())
}

/// Only the latest completed scan's membership is needed for orphan
/// detection; older rows are dropped.
fn prune_track_scans(txn: &WriteTransaction, current_scan: &str) -> Result<(), LibraryError> {
    let prefix = prefix_key(current_scan);
    let stale: Vec<String> = {
        let table = txn.open_table(TRACK_SCANS_TABLE)?;
        let mut keys = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let key = entry.0.value();
            if !key.starts_with(prefix.as_str()) {
                keys.push(key.to_string());
            }
        }
        keys
    };
    for key in &stale {
        remove_key(txn, TRACK_SCANS_TABLE, key)?;
    }
    Ok(())
}

fn record_track_scan(
    txn: &WriteTransaction,
    scan_id: &str,
    track_id: &str,
    path: &Path,
) -> Result<(), LibraryError> {
    let scan = TrackScan {
        scan_id: scan_id.to_string(),
        track_id: track_id.to_string(),
        path: path.to_string_lossy().to_string(),
    };
    put_value(txn, TRACK_SCANS_TABLE, &join_key(scan_id, track_id), &scan)
}

fn count_rows(txn: &WriteTransaction, table: TableDefinition<&str, &[u8]>) -> Result<usize, LibraryError> {
    let table = txn.open_table(table)?;
    let mut count = 0usize;
    for entry in table.iter()? {
        entry?;
        count += 1;
    }
    Ok(count)
}

pub(crate) fn file_states(db: &Database) -> Result<HashMap<String, FileState>, LibraryError> {
    let mut states = HashMap::new();
    for row in read_all::<TrackRow>(db, TRACKS_TABLE)? {
        states.insert(
            row.id,
            FileState {
                file_size: row.file_size,
                modified: row.modified,
                art_ids: row.art_ids,
            },
        );
    }
    Ok(states)
}

pub(crate) fn read_track_rows(db: &Database) -> Result<Vec<TrackRow>, LibraryError> {
    read_all(db, TRACKS_TABLE)
}

pub(crate) fn get_track_row(db: &Database, id: &str) -> Result<Option<TrackRow>, LibraryError> {
    read_value(db, TRACKS_TABLE, id)
}

pub(crate) fn find_track_by_hash(
    db: &Database,
    content_hash: &str,
) -> Result<Option<TrackRow>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(TRACKS_BY_HASH_TABLE)?;
    let id = match table.get(content_hash)? {
        Some(value) => Some(decode_id(value.value())?),
        None => None,
    };
    match id {
        Some(id) => get_track_row(db, &id),
        None => Ok(None),
    }
}

pub(crate) fn get_artist(db: &Database, id: &str) -> Result<Option<Artist>, LibraryError> {
    read_value(db, ARTISTS_TABLE, id)
}

pub(crate) fn find_artist(db: &Database, name: &str) -> Result<Option<Artist>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(ARTISTS_BY_NAME_TABLE)?;
    let id = match table.get(name_key(name).as_str())? {
        Some(value) => Some(decode_id(value.value())?),
        None => None,
    };
    match id {
        Some(id) => get_artist(db, &id),
        None => Ok(None),
    }
}

pub(crate) fn get_album(db: &Database, id: &str) -> Result<Option<Album>, LibraryError> {
    read_value(db, ALBUMS_TABLE, id)
}

pub(crate) fn list_albums(db: &Database) -> Result<Vec<Album>, LibraryError> {
    read_all(db, ALBUMS_TABLE)
}

pub(crate) fn list_artists(db: &Database) -> Result<Vec<Artist>, LibraryError> {
    read_all(db, ARTISTS_TABLE)
}

pub(crate) fn list_genres(db: &Database) -> Result<Vec<Genre>, LibraryError> {
    read_all(db, GENRES_TABLE)
}

pub(crate) fn track_artists(db: &Database, track_id: &str) -> Result<Vec<TrackArtist>, LibraryError> {
    read_prefix(db, TRACK_ARTISTS_TABLE, &prefix_key(track_id))
}

pub(crate) fn album_artists(db: &Database, album_id: &str) -> Result<Vec<AlbumArtist>, LibraryError> {
    read_prefix(db, ALBUM_ARTISTS_TABLE, &prefix_key(album_id))
}

pub(crate) fn track_scans(db: &Database, scan_id: &str) -> Result<Vec<TrackScan>, LibraryError> {
    read_prefix(db, TRACK_SCANS_TABLE, &prefix_key(scan_id))
}

pub(crate) fn get_session(db: &Database, id: &str) -> Result<Option<ScanSession>, LibraryError> {
    read_value(db, SCAN_SESSIONS_TABLE, id)
}

pub(crate) fn list_sessions(db: &Database, limit: usize) -> Result<Vec<ScanSession>, LibraryError> {
    let mut sessions: Vec<ScanSession> = read_all(db, SCAN_SESSIONS_TABLE)?;
    sessions.sort_by(|a, b| {
        b.started_at
            .cmp(&a.started_at)
            .then_with(|| b.id.cmp(&a.id))
    });
    sessions.truncate(limit);
    Ok(sessions)
}

pub(crate) fn last_completed_session(db: &Database) -> Result<Option<ScanSession>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(META_TABLE)?;
    let id = match table.get(META_LAST_SCAN_KEY)? {
        Some(value) => Some(decode_id(value.value())?),
        None => None,
    };
    match id {
        Some(id) => get_session(db, &id),
        None => Ok(None),
    }
}

pub(crate) fn read_stats(db: &Database) -> Result<LibraryStats, LibraryError> {
    Ok(read_value(db, META_TABLE, META_STATS_KEY)?.unwrap_or_default())
}

fn read_value<T: for<'de> Deserialize<'de>>(
    db: &Database,
    table: TableDefinition<&str, &[u8]>,
    key: &str,
) -> Result<Option<T>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(table)?;
    let value = match table.get(key)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(value)
}

fn read_all<T: for<'de> Deserialize<'de>>(
    db: &Database,
    table: TableDefinition<&str, &[u8]>,
) -> Result<Vec<T>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(table)?;
    let mut items = Vec::new();
    for entry in table.iter()? {
        let entry = entry?;
        items.push(decode_value(entry.1.value())?);
    }
    Ok(items)
}

fn read_prefix<T: for<'de> Deserialize<'de>>(
    db: &Database,
    table: TableDefinition<&str, &[u8]>,
    prefix: &str,
) -> Result<Vec<T>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(table)?;
    let mut end = prefix.to_string();
    end.push('\u{10ffff}');
    let mut items = Vec::new();
    for entry in table.range(prefix..end.as_str())? {
        let entry = entry?;
        items.push(decode_value(entry.1.value())?);
    }
    Ok(items)
}

fn read_all_in<T: for<'de> Deserialize<'de>>(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
) -> Result<Vec<T>, LibraryError> {
    let table = txn.open_table(table)?;
    let mut items = Vec::new();
    for entry in table.iter()? {
        let entry = entry?;
        items.push(decode_value(entry.1.value())?);
    }
    Ok(items)
}

fn get_value<T: for<'de> Deserialize<'de>>(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
    key: &str,
) -> Result<Option<T>, LibraryError> {
    let table = txn.open_table(table)?;
    let value = match table.get(key)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(value)
}

fn put_value<T: Serialize>(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
    key: &str,
    value: &T,
) -> Result<(), LibraryError> {
    let bytes = encode_value(value)?;
    let mut table = txn.open_table(table)?;
    table.insert(key, bytes.as_slice())?;
    Ok(())
}

fn get_id(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
    key: &str,
) -> Result<Option<String>, LibraryError> {
    let table = txn.open_table(table)?;
    let id = match table.get(key)? {
        Some(value) => Some(decode_id(value.value())?),
        None => None,
    };
    Ok(id)
}

fn put_id(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
    key: &str,
    id: &str,
) -> Result<(), LibraryError> {
    let mut table = txn.open_table(table)?;
    table.insert(key, id.as_bytes())?;
    Ok(())
}

fn remove_key(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
    key: &str,
) -> Result<(), LibraryError> {
    let mut table = txn.open_table(table)?;
    table.remove(key)?;
    Ok(())
}

fn remove_prefix(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
    prefix: &str,
) -> Result<(), LibraryError> {
    let mut table = txn.open_table(table)?;
    let mut end = prefix.to_string();
    end.push('\u{10ffff}');
    let mut keys = Vec::new();
    for entry in table.range(prefix..end.as_str())? {
        let entry = entry?;
        keys.push(entry.0.value().to_string());
    }
    for key in &keys {
        table.remove(key.as_str())?;
    }
    Ok(())
}

fn clear_table(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
) -> Result<(), LibraryError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}

fn decode_id(bytes: &[u8]) -> Result<String, LibraryError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| LibraryError::KeyParse(String::from_utf8_lossy(bytes).to_string()))
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

fn album_key(title: &str, primary_artist: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str(&name_key(title));
    out.push(KEY_SEP);
    out.push_str(&name_key(primary_artist.unwrap_or("")));
    out
}

fn prefix_key(prefix: &str) -> String {
    let mut out = String::new();
    out.push_str(prefix);
    out.push(KEY_SEP);
    out
}

fn join_key(first: &str, second: &str) -> String {
    let mut out = prefix_key(first);
    out.push_str(second);
    out
}

fn position_key(owner: &str, position: usize) -> String {
    join_key(owner, &format!("{:04}", position))
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}
