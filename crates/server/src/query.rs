//! Track list evaluation for `GET /songs`.
//!
//! Steps run in a fixed order: pagination over the unfiltered collection,
//! free-text filter with grouped output, subkey filter, then sort. `total`
//! in the returned meta is always the unfiltered size.

use std::cmp::Ordering;

use common::Track;
use serde::Serialize;

use crate::state::SongsQuery;
use crate::utils::url_escape;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Name,
    Artist,
    Album,
}

impl Field {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "name" => Some(Field::Name),
            "artist" => Some(Field::Artist),
            "album" => Some(Field::Album),
            _ => None,
        }
    }

    fn values<'a>(&self, track: &'a Track) -> Vec<&'a str> {
        match self {
            Field::Name => vec![track.title.as_str()],
            Field::Artist => track.artists.iter().map(String::as_str).collect(),
            Field::Album => track.album.iter().map(String::as_str).collect(),
        }
    }

    fn primary<'a>(&self, track: &'a Track) -> Option<&'a str> {
        match self {
            Field::Name => Some(track.title.as_str()),
            Field::Artist => track.artists.first().map(String::as_str),
            Field::Album => track.album.first().map(String::as_str),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortSpec {
    pub field: Field,
    pub descending: bool,
}

impl SortSpec {
    pub fn parse(value: &str) -> Result<Self, QueryError> {
        let value = value.trim();
        let (descending, name) = match value.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, value),
        };
        let field =
            Field::parse(name).ok_or_else(|| QueryError::UnknownSortField(name.to_string()))?;
        Ok(Self { field, descending })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubkeyFilter {
    pub field: Field,
    pub value: String,
}

impl SubkeyFilter {
    /// `field-value`; the value keeps any further dashes.
    pub fn parse(value: &str) -> Result<Self, QueryError> {
        let mut segments = value.split('-');
        let name = segments.next().unwrap_or("");
        let rest: Vec<&str> = segments.collect();
        if rest.is_empty() {
            return Err(QueryError::MalformedSubkey(value.to_string()));
        }
        let field =
            Field::parse(name).ok_or_else(|| QueryError::UnknownSubkeyField(name.to_string()))?;
        Ok(Self {
            field,
            value: rest.join("-"),
        })
    }

    fn matches(&self, track: &Track) -> bool {
        let wanted = self.value.to_lowercase();
        self.field
            .values(track)
            .iter()
            .any(|value| value.to_lowercase() == wanted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    UnknownSortField(String),
    UnknownSubkeyField(String),
    MalformedSubkey(String),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::UnknownSortField(field) => write!(f, "unknown sort field: {}", field),
            QueryError::UnknownSubkeyField(field) => {
                write!(f, "unknown subkeyfilter field: {}", field)
            }
            QueryError::MalformedSubkey(value) => {
                write!(f, "subkeyfilter must look like field-value: {}", value)
            }
        }
    }
}

impl std::error::Error for QueryError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    pub limit: usize,
    pub offset: usize,
    pub total: usize,
    pub next: Option<String>,
    pub previous: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Page {
    pub tracks: Vec<Track>,
    pub meta: PageMeta,
}

/// Evaluates a query over `tracks`, which must already be in collection
/// order.
pub fn run_query(tracks: Vec<Track>, params: &SongsQuery) -> Result<Page, QueryError> {
    let sort = params.sort.as_deref().map(SortSpec::parse).transpose()?;
    let subkey = params
        .subkeyfilter
        .as_deref()
        .map(SubkeyFilter::parse)
        .transpose()?;

    let total = tracks.len();
    let offset = params.offset.unwrap_or(0);
    let limit = params.limit.unwrap_or(total);
    let mut page: Vec<Track> = tracks.into_iter().skip(offset).take(limit).collect();

    if let Some(filter) = params.filter.as_deref() {
        page = filter_grouped(page, filter);
    }
    if let Some(subkey) = &subkey {
        page.retain(|track| subkey.matches(track));
    }
    let reverse_ties = matches!(
        (&sort, &subkey),
        (
            Some(SortSpec {
                field: Field::Album,
                descending: true
            }),
            Some(SubkeyFilter {
                field: Field::Album,
                ..
            })
        )
    );
    match &sort {
        Some(spec) => sort_by_field(&mut page, spec, reverse_ties),
        None => sort_default(&mut page),
    }

    Ok(Page {
        tracks: page,
        meta: page_meta(params, limit, offset, total),
    })
}

/// Keeps tracks matching `needle` in name, an artist or an album. Output
/// is artist matches, then name matches, then album matches; the first
/// field that hits (name, artists, albums) decides the group.
pub fn filter_grouped(tracks: Vec<Track>, needle: &str) -> Vec<Track> {
    let needle = needle.to_lowercase();
    let hit = |value: &str| value.to_lowercase().contains(&needle);

    let mut by_artist = Vec::new();
    let mut by_name = Vec::new();
    let mut by_album = Vec::new();
    for track in tracks {
        if hit(&track.title) {
            by_name.push(track);
        } else if track.artists.iter().any(|artist| hit(artist)) {
            by_artist.push(track);
        } else if track.album.iter().any(|album| hit(album)) {
            by_album.push(track);
        }
    }

    by_artist.extend(by_name);
    by_artist.extend(by_album);
    by_artist
}

fn track_no(track: &Track) -> u64 {
    track
        .track_number
        .map(|number| number.no as u64)
        .unwrap_or(u64::MAX)
}

/// Ascending first album, missing last, then track number.
pub fn sort_default(tracks: &mut [Track]) {
    tracks.sort_by(|a, b| {
        compare_ascending(folded(Field::Album, a), folded(Field::Album, b))
            .then_with(|| track_no(a).cmp(&track_no(b)))
    });
}

pub fn sort_by_field(tracks: &mut [Track], spec: &SortSpec, reverse_ties: bool) {
    tracks.sort_by(|a, b| {
        let primary = if spec.descending {
            compare_descending(folded(spec.field, a), folded(spec.field, b))
        } else {
            compare_ascending(folded(spec.field, a), folded(spec.field, b))
        };
        primary.then_with(|| {
            if reverse_ties {
                track_no(b).cmp(&track_no(a))
            } else {
                track_no(a).cmp(&track_no(b))
            }
        })
    });
}

fn folded(field: Field, track: &Track) -> Option<String> {
    field.primary(track).map(str::to_lowercase)
}

// A missing value is the maximal string.
fn compare_ascending(a: Option<String>, b: Option<String>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

// A missing value is the empty string.
fn compare_descending(a: Option<String>, b: Option<String>) -> Ordering {
    let a = a.unwrap_or_default();
    let b = b.unwrap_or_default();
    b.cmp(&a)
}

/// A zero limit gets no links: both would point back at the same page.
fn page_meta(params: &SongsQuery, limit: usize, offset: usize, total: usize) -> PageMeta {
    let next_offset = offset.saturating_add(limit);
    let next = if limit > 0 && next_offset < total {
        Some(page_link(params, limit, next_offset))
    } else {
        None
    };
    let previous = if offset == 0 || limit == 0 {
        None
    } else {
        Some(page_link(params, limit, offset.saturating_sub(limit)))
    };
    PageMeta {
        limit,
        offset,
        total,
        next,
        previous,
    }
}

fn page_link(params: &SongsQuery, limit: usize, offset: usize) -> String {
    let mut link = format!("/songs?limit={}&offset={}", limit, offset);
    for (key, value) in [
        ("filter", &params.filter),
        ("sort", &params.sort),
        ("subkeyfilter", &params.subkeyfilter),
    ] {
        if let Some(value) = value {
            link.push('&');
            link.push_str(key);
            link.push('=');
            link.push_str(&url_escape(value));
        }
    }
    link
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::TrackNumber;
    use std::path::PathBuf;

    fn track(id: &str, title: &str, artists: &[&str], album: &[&str], no: Option<u32>) -> Track {
        Track {
            id: id.to_string(),
            title: title.to_string(),
            artists: artists.iter().map(|s| s.to_string()).collect(),
            album: album.iter().map(|s| s.to_string()).collect(),
            duration_secs: None,
            track_number: no.map(|no| TrackNumber { no, total: None }),
            file_type: "mp3".to_string(),
            file_path: PathBuf::from(format!("/music/{}.mp3", id)),
            art_ids: Vec::new(),
            link: format!("/songs/{}", id),
        }
    }

    fn ids(tracks: &[Track]) -> Vec<&str> {
        tracks.iter().map(|track| track.id.as_str()).collect()
    }

    fn query() -> SongsQuery {
        SongsQuery::default()
    }

    #[test]
    fn default_sort_orders_by_album_then_track_number() {
        let tracks = vec![
            track("b2", "x", &[], &["B"], Some(2)),
            track("a1", "y", &[], &["A"], Some(1)),
            track("a2", "z", &[], &["A"], Some(2)),
        ];
        let page = run_query(tracks, &query()).unwrap();
        assert_eq!(ids(&page.tracks), vec!["a1", "a2", "b2"]);
    }

    #[test]
    fn default_sort_puts_missing_album_and_track_last() {
        let tracks = vec![
            track("none", "x", &[], &[], Some(1)),
            track("a-none", "y", &[], &["a"], None),
            track("a1", "z", &[], &["A"], Some(1)),
        ];
        let page = run_query(tracks, &query()).unwrap();
        assert_eq!(ids(&page.tracks), vec!["a1", "a-none", "none"]);
    }

    #[test]
    fn descending_album_with_album_subkey_reverses_ties() {
        let tracks = vec![
            track("1", "a", &[], &["X"], Some(1)),
            track("3", "b", &[], &["X"], Some(3)),
            track("2", "c", &[], &["X"], Some(2)),
        ];
        let params = SongsQuery {
            sort: Some("-album".to_string()),
            subkeyfilter: Some("album-X".to_string()),
            ..SongsQuery::default()
        };
        let page = run_query(tracks, &params).unwrap();
        assert_eq!(ids(&page.tracks), vec!["3", "2", "1"]);
    }

    #[test]
    fn descending_album_without_subkey_keeps_ascending_ties() {
        let tracks = vec![
            track("1", "a", &[], &["X"], Some(1)),
            track("3", "b", &[], &["X"], Some(3)),
            track("2", "c", &[], &["X"], Some(2)),
            track("y", "d", &[], &["Y"], Some(9)),
        ];
        let params = SongsQuery {
            sort: Some("-album".to_string()),
            ..SongsQuery::default()
        };
        let page = run_query(tracks, &params).unwrap();
        assert_eq!(ids(&page.tracks), vec!["y", "1", "2", "3"]);
    }

    #[test]
    fn missing_values_move_to_the_other_end_when_descending() {
        let tracks = vec![
            track("none", "x", &[], &[], None),
            track("b", "y", &["Bea"], &[], None),
            track("a", "z", &["amy"], &[], None),
        ];
        let ascending = SongsQuery {
            sort: Some("artist".to_string()),
            ..SongsQuery::default()
        };
        let page = run_query(tracks.clone(), &ascending).unwrap();
        assert_eq!(ids(&page.tracks), vec!["a", "b", "none"]);

        let descending = SongsQuery {
            sort: Some("-artist".to_string()),
            ..SongsQuery::default()
        };
        let page = run_query(tracks, &descending).unwrap();
        assert_eq!(ids(&page.tracks), vec!["b", "a", "none"]);
    }

    #[test]
    fn name_sort_is_case_folded() {
        let tracks = vec![
            track("2", "beta", &[], &[], None),
            track("1", "Alpha", &[], &[], None),
            track("3", "Gamma", &[], &[], None),
        ];
        let params = SongsQuery {
            sort: Some("name".to_string()),
            ..SongsQuery::default()
        };
        let page = run_query(tracks, &params).unwrap();
        assert_eq!(ids(&page.tracks), vec!["1", "2", "3"]);
    }

    #[test]
    fn filter_groups_artist_then_name_then_album() {
        let tracks = vec![
            track("album-hit", "Other", &["Nobody"], &["Blue Record"], None),
            track("name-hit", "Blue Moon", &["Someone"], &[], None),
            track("artist-hit", "Song", &["Blue Band"], &[], None),
            track("miss", "Red", &["Nobody"], &["Red"], None),
        ];
        let grouped = filter_grouped(tracks, "BLUE");
        assert_eq!(ids(&grouped), vec!["artist-hit", "name-hit", "album-hit"]);
    }

    #[test]
    fn filter_never_duplicates_multi_field_matches() {
        let tracks = vec![track("all", "Blue", &["Blue"], &["Blue"], None)];
        let grouped = filter_grouped(tracks, "blue");
        assert_eq!(ids(&grouped), vec!["all"]);
    }

    #[test]
    fn subkey_value_may_contain_dashes() {
        let subkey = SubkeyFilter::parse("album-Left-Right").unwrap();
        assert_eq!(subkey.field, Field::Album);
        assert_eq!(subkey.value, "Left-Right");

        let tracks = vec![
            track("hit", "a", &[], &["left-right"], None),
            track("miss", "b", &[], &["Left"], None),
        ];
        let params = SongsQuery {
            subkeyfilter: Some("album-Left-Right".to_string()),
            ..SongsQuery::default()
        };
        let page = run_query(tracks, &params).unwrap();
        assert_eq!(ids(&page.tracks), vec!["hit"]);
    }

    #[test]
    fn subkey_artist_matches_any_listed_artist() {
        let tracks = vec![
            track("duet", "a", &["Ann", "Bob"], &[], None),
            track("solo", "b", &["Ann"], &[], None),
        ];
        let params = SongsQuery {
            subkeyfilter: Some("artist-bob".to_string()),
            ..SongsQuery::default()
        };
        let page = run_query(tracks, &params).unwrap();
        assert_eq!(ids(&page.tracks), vec!["duet"]);
    }

    #[test]
    fn rejects_unknown_fields_and_malformed_subkeys() {
        let bad_sort = SongsQuery {
            sort: Some("-year".to_string()),
            ..SongsQuery::default()
        };
        assert_eq!(
            run_query(Vec::new(), &bad_sort).unwrap_err(),
            QueryError::UnknownSortField("year".to_string())
        );
        assert!(matches!(
            SubkeyFilter::parse("genre-rock"),
            Err(QueryError::UnknownSubkeyField(_))
        ));
        assert!(matches!(
            SubkeyFilter::parse("album"),
            Err(QueryError::MalformedSubkey(_))
        ));
    }

    #[test]
    fn pagination_links_follow_offset_and_limit() {
        let tracks: Vec<Track> = (0..25)
            .map(|i| track(&format!("t{:02}", i), "x", &[], &[], None))
            .collect();
        let at = |offset: usize| SongsQuery {
            limit: Some(10),
            offset: Some(offset),
            ..SongsQuery::default()
        };

        let meta = run_query(tracks.clone(), &at(10)).unwrap().meta;
        assert_eq!(meta.total, 25);
        assert_eq!(meta.next.as_deref(), Some("/songs?limit=10&offset=20"));
        assert_eq!(meta.previous.as_deref(), Some("/songs?limit=10&offset=0"));

        let page = run_query(tracks.clone(), &at(20)).unwrap();
        assert_eq!(page.tracks.len(), 5);
        assert!(page.meta.next.is_none());

        let meta = run_query(tracks, &at(0)).unwrap().meta;
        assert!(meta.previous.is_none());
    }

    #[test]
    fn previous_clamps_at_zero() {
        let tracks: Vec<Track> = (0..25)
            .map(|i| track(&format!("t{:02}", i), "x", &[], &[], None))
            .collect();
        let params = SongsQuery {
            limit: Some(10),
            offset: Some(4),
            ..SongsQuery::default()
        };
        let meta = run_query(tracks, &params).unwrap().meta;
        assert_eq!(meta.previous.as_deref(), Some("/songs?limit=10&offset=0"));
    }

    #[test]
    fn zero_limit_has_no_page_links() {
        let tracks: Vec<Track> = (0..5)
            .map(|i| track(&format!("t{}", i), "x", &[], &[], None))
            .collect();
        let params = SongsQuery {
            limit: Some(0),
            offset: Some(2),
            ..SongsQuery::default()
        };
        let page = run_query(tracks, &params).unwrap();
        assert!(page.tracks.is_empty());
        assert_eq!(page.meta.total, 5);
        assert!(page.meta.next.is_none());
        assert!(page.meta.previous.is_none());
    }

    #[test]
    fn total_ignores_the_filter() {
        let tracks = vec![
            track("a", "Blue", &[], &[], None),
            track("b", "Red", &[], &[], None),
            track("c", "Green", &[], &[], None),
        ];
        let params = SongsQuery {
            filter: Some("blue".to_string()),
            ..SongsQuery::default()
        };
        let page = run_query(tracks, &params).unwrap();
        assert_eq!(ids(&page.tracks), vec!["a"]);
        assert_eq!(page.meta.total, 3);
        assert_eq!(page.meta.limit, 3);
    }

    #[test]
    fn filter_applies_only_within_the_page() {
        let tracks = vec![
            track("a", "Blue", &[], &[], None),
            track("b", "Red", &[], &[], None),
            track("c", "Blue Two", &[], &[], None),
        ];
        let params = SongsQuery {
            limit: Some(2),
            filter: Some("blue".to_string()),
            ..SongsQuery::default()
        };
        let page = run_query(tracks, &params).unwrap();
        assert_eq!(ids(&page.tracks), vec!["a"]);
    }

    #[test]
    fn links_carry_other_parameters() {
        let tracks: Vec<Track> = (0..5)
            .map(|i| track(&format!("t{}", i), "x", &[], &[], None))
            .collect();
        let params = SongsQuery {
            limit: Some(2),
            offset: Some(0),
            filter: Some("a b".to_string()),
            sort: Some("-name".to_string()),
            subkeyfilter: None,
        };
        let meta = run_query(tracks, &params).unwrap().meta;
        assert_eq!(
            meta.next.as_deref(),
            Some("/songs?limit=2&offset=2&filter=a%20b&sort=-name")
        );
    }
}
