use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use common::{content_fingerprint, relpath_from, Document, DOC_RELATIVE_PATH, DOC_TRACK_ID};
use lofty::error::LoftyError;
use lofty::picture::{Picture, PictureType};
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};

#[derive(Debug, Default, Clone)]
pub struct TagInfo {
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub track_no: Option<u16>,
    pub disc_no: Option<u16>,
    pub year: Option<i32>,
    pub duration_ms: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub bitrate: Option<u32>,
    pub has_embedded_cover: bool,
    pub genres: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CoverArt {
    pub data: Vec<u8>,
    pub mime: Option<String>,
}

/// Probe output for one audio file: the ordered sidecar document plus the
/// embedded cover, if any.
#[derive(Debug, Clone)]
pub struct Sidecar {
    pub document: Document,
    pub artwork: Option<CoverArt>,
}

#[derive(Debug)]
pub enum ProbeError {
    Io(std::io::Error),
    Lofty(LoftyError),
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::Io(err) => write!(f, "io error: {}", err),
            ProbeError::Lofty(err) => write!(f, "tag error: {}", err),
        }
    }
}

impl std::error::Error for ProbeError {}

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        ProbeError::Io(err)
    }
}

impl From<LoftyError> for ProbeError {
    fn from(err: LoftyError) -> Self {
        ProbeError::Lofty(err)
    }
}

pub fn read_tags(path: &Path) -> Result<TagInfo, ProbeError> {
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let mut info = TagInfo::default();

    let duration_ms = properties.duration().as_millis();
    if duration_ms > 0 {
        info.duration_ms = Some(duration_ms.min(u128::from(u32::MAX)) as u32);
    }

    info.sample_rate = properties.sample_rate();
    info.channels = properties.channels();
    info.bitrate = properties.audio_bitrate().or(properties.overall_bitrate());

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        info.title = tag.get_string(&ItemKey::TrackTitle).map(|v| v.to_string());
        info.album = tag.get_string(&ItemKey::AlbumTitle).map(|v| v.to_string());
        let album_artist = tag.get_string(&ItemKey::AlbumArtist).map(|v| v.to_string());
        let track_artist = tag.get_string(&ItemKey::TrackArtist).map(|v| v.to_string());
        info.artist = track_artist.or_else(|| album_artist.clone());
        info.album_artist = album_artist;
        info.track_no = tag.get_string(&ItemKey::TrackNumber).and_then(parse_u16);
        info.disc_no = tag.get_string(&ItemKey::DiscNumber).and_then(parse_u16);
        info.year = tag.get_string(&ItemKey::Year).and_then(parse_year);
        if let Some(value) = tag.get_string(&ItemKey::Genre) {
            info.genres = parse_genres(value);
        }
        info.has_embedded_cover = !tag.pictures().is_empty();
    }

    Ok(info)
}

pub fn read_cover(path: &Path) -> Result<Option<CoverArt>, ProbeError> {
    let tagged_file = lofty::read_from_path(path)?;
    let tag = match tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        Some(tag) => tag,
        None => return Ok(None),
    };

    let picture = match pick_picture(tag.pictures()) {
        Some(picture) => picture,
        None => return Ok(None),
    };

    let data = picture.data().to_vec();
    let mime = guess_mime(&data).map(|m| m.to_string());
    Ok(Some(CoverArt { data, mime }))
}

/// Probes one audio file under `root` and builds its sidecar document.
pub fn probe_track(root: &Path, path: &Path) -> Result<Sidecar, ProbeError> {
    let relative_path = relpath_from(root, path).ok_or_else(|| {
        ProbeError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{:?} is outside the library root", path),
        ))
    })?;

    let tag = read_tags(path)?;
    let artwork = if tag.has_embedded_cover {
        read_cover(path)?
    } else {
        None
    };

    let track_id = content_fingerprint(path)?;
    let meta = fs::metadata(path)?;
    let modified_ms = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let document = build_document(
        &relative_path,
        &file_name,
        &track_id,
        &tag,
        meta.len(),
        modified_ms,
        artwork.is_some(),
    );

    Ok(Sidecar { document, artwork })
}

fn build_document(
    relative_path: &str,
    file_name: &str,
    track_id: &str,
    tag: &TagInfo,
    file_size: u64,
    modified_ms: u64,
    has_cover: bool,
) -> Document {
    let stem = file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name);

    let mut doc = Document::new();
    doc.insert(DOC_TRACK_ID.into(), track_id.into());
    doc.insert(DOC_RELATIVE_PATH.into(), relative_path.into());
    doc.insert("source_file".into(), file_name.into());
    doc.insert(
        "title".into(),
        tag.title.clone().unwrap_or_else(|| stem.to_string()).into(),
    );
    doc.insert(
        "artist".into(),
        tag.artist
            .clone()
            .or_else(|| tag.album_artist.clone())
            .unwrap_or_else(|| "Unknown Artist".to_string())
            .into(),
    );
    doc.insert(
        "album".into(),
        tag.album
            .clone()
            .unwrap_or_else(|| "Unknown Album".to_string())
            .into(),
    );
    if let Some(album_artist) = &tag.album_artist {
        doc.insert("album_artist".into(), album_artist.clone().into());
    }
    if !tag.genres.is_empty() {
        doc.insert("genres".into(), tag.genres.clone().into());
    }
    if let Some(year) = tag.year {
        doc.insert("year".into(), year.into());
    }
    if let Some(track_no) = tag.track_no {
        doc.insert("track_number".into(), track_no.into());
    }
    if let Some(disc_no) = tag.disc_no {
        doc.insert("disc_number".into(), disc_no.into());
    }
    if let Some(duration_ms) = tag.duration_ms {
        doc.insert("duration_ms".into(), duration_ms.into());
    }
    if let Some(bitrate) = tag.bitrate {
        doc.insert("bit_rate".into(), bitrate.into());
    }
    if let Some(sample_rate) = tag.sample_rate {
        doc.insert("sample_rate".into(), sample_rate.into());
    }
    if let Some(channels) = tag.channels {
        doc.insert("channels".into(), channels.into());
    }
    doc.insert("file_size".into(), file_size.into());
    doc.insert("modified_ms".into(), modified_ms.into());
    doc.insert("has_cover".into(), has_cover.into());
    doc
}

fn parse_u16(text: &str) -> Option<u16> {
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
    if out.is_empty() {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            out.push(trimmed.to_string());
        }
    }
    out
}

fn pick_picture(pictures: &[Picture]) -> Option<&Picture> {
    for picture in pictures {
        if picture.pic_type() == PictureType::CoverFront {
            return Some(picture);
        }
    }
    pictures.first()
}

pub fn guess_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Some("image/png")
    } else {
        None
    }
}
