use std::fmt;
use std::path::Path;

use lofty::error::LoftyError;
use lofty::file::FileType;
use lofty::picture::Picture;
use lofty::prelude::{AudioFile, ItemKey, TagExt, TaggedFileExt};
use lofty::tag::Tag;

/// Everything the library needs from one file's embedded tags.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TagSet {
    pub title: String,
    pub artists: Vec<String>,
    pub album: Vec<String>,
    pub album_artists: Vec<String>,
    pub artist_sort: Option<String>,
    pub album_sort: Option<String>,
    pub artist_mbid: Option<String>,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    pub duration_ms: Option<u64>,
    pub track: Option<TrackPosition>,
    pub disc_no: Option<u32>,
    pub pictures: Vec<EmbeddedPicture>,
    pub properties: AudioProperties,
    pub codec: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackPosition {
    pub no: u32,
    pub total: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedPicture {
    pub mime: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AudioProperties {
    pub duration_ms: Option<u64>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub bitrate: Option<u32>,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
    NoTags,
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
            MetadataError::NoTags => write!(f, "no tag data"),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

/// Where a field value may come from. Sources are tried in order and the
/// first one that yields a usable value wins. `Raw` ids name frames lofty
/// has no `ItemKey` for, so they only ever surface as `ItemKey::Unknown`.
#[derive(Debug, Clone)]
enum Source {
    Item(ItemKey),
    Raw(&'static str),
}

impl Source {
    fn key(&self) -> ItemKey {
        match self {
            Source::Item(key) => key.clone(),
            Source::Raw(id) => ItemKey::Unknown((*id).to_string()),
        }
    }
}

pub fn read_tags(path: &Path) -> Result<TagSet, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let tag = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag())
        .ok_or(MetadataError::NoTags)?;
    if tag.is_empty() {
        return Err(MetadataError::NoTags);
    }

    let file_props = tagged_file.properties();
    let duration_ms = file_props.duration().as_millis();
    let properties = AudioProperties {
        duration_ms: if duration_ms > 0 {
            Some(duration_ms.min(u128::from(u64::MAX)) as u64)
        } else {
            None
        },
        sample_rate: file_props.sample_rate(),
        channels: file_props.channels(),
        bitrate: file_props.audio_bitrate().or(file_props.overall_bitrate()),
    };

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown Track".to_string());

    Ok(tags_from(
        tag,
        &stem,
        properties,
        codec_label(tagged_file.file_type()),
    ))
}

/// Builds a [`TagSet`] from an already parsed tag. Pure; never touches the
/// filesystem.
pub fn tags_from(
    tag: &Tag,
    fallback_title: &str,
    properties: AudioProperties,
    codec: Option<String>,
) -> TagSet {
    let title = first_match(
        tag,
        &[
            Source::Item(ItemKey::TrackTitle),
        ],
        non_empty,
    )
    .unwrap_or_else(|| fallback_title.to_string());

    let artists = all_values(
        tag,
        &[Source::Item(ItemKey::TrackArtist)],
    );
    let album = all_values(
        tag,
        &[Source::Item(ItemKey::AlbumTitle)],
    );
    let album_artists = all_values(
        tag,
        &[Source::Item(ItemKey::AlbumArtist)],
    );

    let genres = tag
        .get_strings(&ItemKey::Genre)
        .flat_map(parse_genres)
        .fold(Vec::new(), |mut acc, genre| {
            if !acc
                .iter()
                .any(|existing: &String| existing.eq_ignore_ascii_case(&genre))
            {
                acc.push(genre);
            }
            acc
        });

    TagSet {
        title,
        artists,
        album,
        album_artists,
        artist_sort: first_match(
            tag,
            &[Source::Item(ItemKey::TrackArtistSortOrder)],
            non_empty,
        ),
        album_sort: first_match(
            tag,
            &[Source::Item(ItemKey::AlbumTitleSortOrder)],
            non_empty,
        ),
        artist_mbid: first_match(
            tag,
            &[Source::Item(ItemKey::MusicBrainzArtistId)],
            non_empty,
        ),
        year: first_match(
            tag,
            &[
                Source::Item(ItemKey::Year),
                Source::Item(ItemKey::RecordingDate),
                Source::Raw("TYER"),
            ],
            parse_year,
        ),
        genres,
        duration_ms: duration_ms(tag, &properties),
        track: track_position(tag),
        disc_no: first_match(
            tag,
            &[Source::Item(ItemKey::DiscNumber)],
            parse_leading_number,
        ),
        pictures: tag.pictures().iter().filter_map(embedded_picture).collect(),
        properties,
        codec,
    }
}

/// Length item (ID3v2 `TLEN`, or a Vorbis `LENGTH` comment) in
/// milliseconds. A value that is present but not all digits yields no
/// duration; only a missing item defers to the stream properties.
fn duration_ms(tag: &Tag, properties: &AudioProperties) -> Option<u64> {
    let raw = first_match(
        tag,
        &[Source::Item(ItemKey::Length), Source::Raw("LENGTH")],
        |value| Some(value.to_string()),
    );
    match raw {
        Some(text) => parse_length_ms(&text),
        None => properties.duration_ms,
    }
}

fn track_position(tag: &Tag) -> Option<TrackPosition> {
    let mut position = first_match(
        tag,
        &[Source::Item(ItemKey::TrackNumber)],
        parse_track_position,
    )?;
    if position.total.is_none() {
        position.total = first_match(
            tag,
            &[Source::Item(ItemKey::TrackTotal)],
            |value| value.trim().parse::<u32>().ok(),
        );
    }
    Some(position)
}

fn first_match<T>(tag: &Tag, sources: &[Source], parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    for source in sources {
        let key = source.key();
        for value in tag.get_strings(&key) {
            if let Some(parsed) = parse(value) {
                return Some(parsed);
            }
        }
    }
    None
}

/// Every value of the first source that has any. Scalars become a single
/// element list; null separated multi-values are split.
fn all_values(tag: &Tag, sources: &[Source]) -> Vec<String> {
    for source in sources {
        let key = source.key();
        let values: Vec<String> = tag
            .get_strings(&key)
            .flat_map(|value| value.split('\0'))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect();
        if !values.is_empty() {
            return values;
        }
    }
    Vec::new()
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn parse_length_ms(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// `"N"` or `"N/M"`. An unparsable total is dropped without invalidating
/// the track number.
pub fn parse_track_position(text: &str) -> Option<TrackPosition> {
    let mut parts = text.split('/');
    let no = parts.next()?.trim().parse::<u32>().ok()?;
    let total = parts.next().and_then(|part| part.trim().parse::<u32>().ok());
    Some(TrackPosition { no, total })
}

fn parse_leading_number(text: &str) -> Option<u32> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

fn parse_year(text: &str) -> Option<i32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

fn parse_genres(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for part in text.split(&[';', ',', '/', '|', '\0'][..]) {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        out.push(trimmed.to_string());
    }
    out
}

fn embedded_picture(picture: &Picture) -> Option<EmbeddedPicture> {
    let data = picture.data();
    if data.is_empty() {
        return None;
    }
    let mime = picture
        .mime_type()
        .map(|mime| mime.as_str().trim().to_string())
        .filter(|mime| !mime.is_empty())
        .or_else(|| guess_mime(data))?;
    Some(EmbeddedPicture {
        mime,
        data: data.to_vec(),
    })
}

fn guess_mime(bytes: &[u8]) -> Option<String> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg".to_string())
    } else if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Some("image/png".to_string())
    } else {
        None
    }
}

fn codec_label(file_type: FileType) -> Option<String> {
    let label = match file_type {
        FileType::Mpeg => "mp3",
        FileType::Flac => "flac",
        FileType::Vorbis => "vorbis",
        FileType::Opus => "opus",
        FileType::Mp4 => "aac",
        FileType::Wav => "pcm",
        FileType::Aiff => "aiff",
        _ => return None,
    };
    Some(label.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    use lofty::id3::v2::{Frame, FrameId, Id3v2Tag, TextInformationFrame};
    use lofty::picture::{MimeType, PictureType};
    use lofty::tag::{ItemValue, TagItem, TagType};
    use lofty::TextEncoding;

    /// Builds a generic tag the way lofty does when it reads an ID3v2 tag
    /// from disk.
    fn id3(frames: &[(&'static str, &str)]) -> Tag {
        let mut id3 = Id3v2Tag::new();
        for (id, value) in frames {
            id3.insert(Frame::Text(TextInformationFrame::new(
                FrameId::Valid(Cow::Borrowed(*id)),
                TextEncoding::UTF8,
                value.to_string(),
            )));
        }
        id3.into()
    }

    fn text(tag: &mut Tag, key: ItemKey, value: &str) {
        tag.push_unchecked(TagItem::new(key, ItemValue::Text(value.to_string())));
    }

    fn with_stream_duration(ms: u64) -> AudioProperties {
        AudioProperties {
            duration_ms: Some(ms),
            ..AudioProperties::default()
        }
    }

    #[test]
    fn title_falls_back_to_file_stem() {
        let tag = Tag::new(TagType::Id3v2);
        let tags = tags_from(&tag, "01 Intro", AudioProperties::default(), None);
        assert_eq!(tags.title, "01 Intro");
        assert!(tags.artists.is_empty());
        assert!(tags.album.is_empty());
    }

    #[test]
    fn id3_text_frames_fill_core_fields() {
        let tag = id3(&[
            ("TIT2", "Song"),
            ("TPE1", "Artist"),
            ("TALB", "Record"),
            ("TPE2", "Album Artist"),
            ("TSOP", "Artist, The"),
        ]);
        let tags = tags_from(&tag, "stem", AudioProperties::default(), None);
        assert_eq!(tags.title, "Song");
        assert_eq!(tags.artists, vec!["Artist".to_string()]);
        assert_eq!(tags.album, vec!["Record".to_string()]);
        assert_eq!(tags.album_artists, vec!["Album Artist".to_string()]);
        assert_eq!(tags.artist_sort.as_deref(), Some("Artist, The"));
    }

    #[test]
    fn multi_value_artists_pass_through_in_order() {
        let tag = id3(&[("TPE1", "First\0Second\0Third")]);
        let tags = tags_from(&tag, "stem", AudioProperties::default(), None);
        assert_eq!(
            tags.artists,
            vec!["First".to_string(), "Second".to_string(), "Third".to_string()]
        );
    }

    #[test]
    fn length_frame_is_milliseconds() {
        let tag = id3(&[("TLEN", "215000")]);
        let tags = tags_from(&tag, "stem", with_stream_duration(1), None);
        assert_eq!(tags.duration_ms, Some(215_000));
    }

    #[test]
    fn non_numeric_length_frame_omits_duration() {
        let tag = id3(&[("TLEN", "3:35")]);
        let tags = tags_from(&tag, "stem", with_stream_duration(215_000), None);
        assert_eq!(tags.duration_ms, None);
    }

    #[test]
    fn missing_length_frame_uses_stream_duration() {
        let tag = id3(&[("TIT2", "Song")]);
        let tags = tags_from(&tag, "stem", with_stream_duration(1234), None);
        assert_eq!(tags.duration_ms, Some(1234));
    }

    #[test]
    fn vorbis_length_comment_is_a_fallback() {
        let mut tag = Tag::new(TagType::VorbisComments);
        text(&mut tag, ItemKey::Unknown("LENGTH".to_string()), "1000");
        let tags = tags_from(&tag, "stem", with_stream_duration(5), None);
        assert_eq!(tags.duration_ms, Some(1000));
    }

    #[test]
    fn track_position_parsing() {
        assert_eq!(
            parse_track_position("3/12"),
            Some(TrackPosition { no: 3, total: Some(12) })
        );
        assert_eq!(parse_track_position("7"), Some(TrackPosition { no: 7, total: None }));
        assert_eq!(
            parse_track_position("4/x"),
            Some(TrackPosition { no: 4, total: None })
        );
        assert_eq!(parse_track_position("x/12"), None);
        assert_eq!(parse_track_position(""), None);
    }

    #[test]
    fn track_frame_with_total() {
        let tag = id3(&[("TRCK", "2/9"), ("TPOS", "1/2")]);
        let tags = tags_from(&tag, "stem", AudioProperties::default(), None);
        assert_eq!(tags.track, Some(TrackPosition { no: 2, total: Some(9) }));
        assert_eq!(tags.disc_no, Some(1));
    }

    #[test]
    fn track_frame_drops_bad_total_only() {
        let tag = id3(&[("TRCK", "4/x")]);
        let tags = tags_from(&tag, "stem", AudioProperties::default(), None);
        assert_eq!(tags.track, Some(TrackPosition { no: 4, total: None }));

        let tag = id3(&[("TRCK", "x/12")]);
        let tags = tags_from(&tag, "stem", AudioProperties::default(), None);
        assert_eq!(tags.track, None);
    }

    #[test]
    fn length_parsing_requires_digits() {
        assert_eq!(parse_length_ms("1000"), Some(1000));
        assert_eq!(parse_length_ms(" 42 "), Some(42));
        assert_eq!(parse_length_ms("-5"), None);
        assert_eq!(parse_length_ms(""), None);
    }

    #[test]
    fn pictures_keep_order_and_skip_invalid() {
        let mut tag = Tag::new(TagType::Id3v2);
        tag.push_picture(Picture::new_unchecked(
            PictureType::CoverFront,
            Some(MimeType::Png),
            None,
            vec![1, 2, 3],
        ));
        tag.push_picture(Picture::new_unchecked(
            PictureType::CoverBack,
            None,
            None,
            vec![0xFF, 0xD8, 0xFF, 0x00],
        ));
        tag.push_picture(Picture::new_unchecked(
            PictureType::Other,
            None,
            None,
            vec![0, 0, 0],
        ));
        let tags = tags_from(&tag, "stem", AudioProperties::default(), None);
        assert_eq!(tags.pictures.len(), 2);
        assert_eq!(tags.pictures[0].mime, "image/png");
        assert_eq!(tags.pictures[0].data, vec![1, 2, 3]);
        assert_eq!(tags.pictures[1].mime, "image/jpeg");
    }

    #[test]
    fn genres_are_split_and_deduplicated() {
        let mut tag = Tag::new(TagType::Id3v2);
        text(&mut tag, ItemKey::Genre, "Rock; Jazz");
        text(&mut tag, ItemKey::Genre, "rock");
        let tags = tags_from(&tag, "stem", AudioProperties::default(), None);
        assert_eq!(tags.genres, vec!["Rock".to_string(), "Jazz".to_string()]);
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let dir = std::env::temp_dir().join(format!("metadata-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broken.mp3");
        std::fs::write(&path, b"not audio at all").unwrap();
        assert!(read_tags(&path).is_err());
        assert!(read_tags(&dir.join("missing.mp3")).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
