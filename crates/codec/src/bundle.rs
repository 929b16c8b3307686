use bytes::BufMut;
use common::{Document, PlayStats, TrackRecord, DOC_RELATIVE_PATH, MAX_TRACK_ID_LEN};
use tracing::warn;

use crate::{Cursor, FormatError};

pub const BUNDLE_MAGIC: [u8; 4] = *b"MMDB";
pub const BUNDLE_VERSION: u16 = 1;

#[derive(Clone, Debug)]
pub struct BundleHeader {
    pub version: u16,
    pub flags: u16,
    pub built_at_ms: u64,
    pub entry_count: u32,
}

/// Serializes a bundle. The caller supplies the build timestamp so that
/// identical content encodes byte-identically apart from that one field.
/// Entries are written in the order given; the persister hands them over
/// already sorted by track id.
pub fn encode_bundle(entries: &[TrackRecord], built_at_ms: u64) -> Result<Vec<u8>, FormatError> {
    let mut out = Vec::with_capacity(64 + entries.len() * 256);
    out.put_slice(&BUNDLE_MAGIC);
    out.put_u16_le(BUNDLE_VERSION);
    out.put_u16_le(0); // flags, reserved
    out.put_u64_le(built_at_ms);
    out.put_u32_le(entries.len() as u32);

    for entry in entries {
        let track_id = entry.track_id.as_bytes();
        if track_id.len() > MAX_TRACK_ID_LEN {
            return Err(FormatError::TrackIdTooLong(track_id.len()));
        }
        let metadata = serde_json::to_vec(&entry.metadata)?;
        let key = entry.relative_path.as_bytes();

        out.put_u16_le(key.len() as u16);
        out.put_slice(key);
        out.put_u8(track_id.len() as u8);
        out.put_slice(track_id);
        out.put_u32_le(metadata.len() as u32);
        out.put_slice(&metadata);
        out.put_u32_le(entry.artwork.len() as u32);
        out.put_slice(&entry.artwork);
        out.put_u32_le(entry.stats.play_count);
        out.put_u64_le(entry.stats.last_play_ms);
    }

    Ok(out)
}

pub fn decode_bundle(data: &[u8]) -> Result<(BundleHeader, Vec<TrackRecord>), FormatError> {
    let mut cursor = Cursor::new(data);

    let magic = cursor.take(4)?;
    if magic != BUNDLE_MAGIC {
        return Err(FormatError::BadMagic([magic[0], magic[1], magic[2], magic[3]]));
    }
    let version = cursor.read_u16()?;
    if version != BUNDLE_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }
    let header = BundleHeader {
        version,
        flags: cursor.read_u16()?,
        built_at_ms: cursor.read_u64()?,
        entry_count: cursor.read_u32()?,
    };

    // The count field is untrusted; cap the reservation so a corrupt header
    // cannot demand gigabytes before the first entry read fails.
    let mut entries = Vec::with_capacity(header.entry_count.min(1024) as usize);
    for _ in 0..header.entry_count {
        let key_len = cursor.read_u16()? as usize;
        let key = cursor.read_str(key_len)?.to_string();

        let id_len = cursor.read_u8()? as usize;
        let track_id = cursor.read_str(id_len)?.to_string();

        let metadata_len = cursor.read_u32()? as usize;
        let metadata: Document = serde_json::from_slice(cursor.take(metadata_len)?)?;

        let artwork_len = cursor.read_u32()? as usize;
        let artwork = cursor.take(artwork_len)?.to_vec();

        let stats = PlayStats {
            play_count: cursor.read_u32()?,
            last_play_ms: cursor.read_u64()?,
        };

        let relative_path = metadata
            .get(DOC_RELATIVE_PATH)
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .unwrap_or(key);

        entries.push(TrackRecord {
            track_id,
            relative_path,
            metadata,
            artwork,
            stats,
        });
    }

    if cursor.remaining() > 0 {
        // Tolerated so a future version can append sections.
        warn!(
            "{} trailing bytes after {} bundle entries",
            cursor.remaining(),
            header.entry_count
        );
    }

    Ok((header, entries))
}
