use bytes::BufMut;
use common::MAX_TRACK_ID_LEN;

use crate::{Cursor, FormatError};

pub const PLAYLOG_MAGIC: [u8; 4] = *b"MMLG";
pub const PLAYLOG_VERSION: u16 = 1;

/// One playback event as reported by a remote client. Duplicate timestamps
/// are meaningful: every entry counts as one play.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayLogEntry {
    pub timestamp_ms: u64,
    pub track_id: String,
}

pub fn encode_playlog(entries: &[PlayLogEntry]) -> Result<Vec<u8>, FormatError> {
    let mut out = Vec::with_capacity(16 + entries.len() * 48);
    out.put_slice(&PLAYLOG_MAGIC);
    out.put_u16_le(PLAYLOG_VERSION);
    out.put_u32_le(entries.len() as u32);

    for entry in entries {
        let track_id = entry.track_id.as_bytes();
        if track_id.len() > MAX_TRACK_ID_LEN {
            return Err(FormatError::TrackIdTooLong(track_id.len()));
        }
        out.put_u64_le(entry.timestamp_ms);
        out.put_u8(track_id.len() as u8);
        out.put_slice(track_id);
    }

    Ok(out)
}

pub fn decode_playlog(data: &[u8]) -> Result<Vec<PlayLogEntry>, FormatError> {
    let mut cursor = Cursor::new(data);

    let magic = cursor.take(4)?;
    if magic != PLAYLOG_MAGIC {
        return Err(FormatError::BadMagic([magic[0], magic[1], magic[2], magic[3]]));
    }
    let version = cursor.read_u16()?;
    if version != PLAYLOG_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }
    let count = cursor.read_u32()?;

    let mut entries = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let timestamp_ms = cursor.read_u64()?;
        let id_len = cursor.read_u8()? as usize;
        let track_id = cursor.read_str(id_len)?.to_string();
        entries.push(PlayLogEntry {
            timestamp_ms,
            track_id,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<PlayLogEntry> {
        vec![
            PlayLogEntry {
                timestamp_ms: 500,
                track_id: "abc123".into(),
            },
            PlayLogEntry {
                timestamp_ms: 2000,
                track_id: "abc123".into(),
            },
            PlayLogEntry {
                timestamp_ms: 1000,
                track_id: "def456".into(),
            },
        ]
    }

    #[test]
    fn round_trips_entries() {
        let entries = sample();
        let bytes = encode_playlog(&entries).unwrap();
        assert_eq!(decode_playlog(&bytes).unwrap(), entries);
    }

    #[test]
    fn round_trips_empty_log() {
        let bytes = encode_playlog(&[]).unwrap();
        assert!(decode_playlog(&bytes).unwrap().is_empty());
    }

    #[test]
    fn rejects_bundle_magic() {
        let mut bytes = encode_playlog(&sample()).unwrap();
        bytes[..4].copy_from_slice(b"MMDB");
        assert!(matches!(
            decode_playlog(&bytes),
            Err(FormatError::BadMagic(_))
        ));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = encode_playlog(&sample()).unwrap();
        bytes[4] = 2;
        assert!(matches!(
            decode_playlog(&bytes),
            Err(FormatError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn truncation_anywhere_is_detected() {
        let bytes = encode_playlog(&sample()).unwrap();
        for len in 0..bytes.len() {
            assert!(matches!(
                decode_playlog(&bytes[..len]),
                Err(FormatError::Truncated)
            ));
        }
    }

    #[test]
    fn count_larger_than_payload_is_truncation() {
        let mut bytes = encode_playlog(&sample()).unwrap();
        bytes[6] = 200; // claim 200 entries
        assert!(matches!(
            decode_playlog(&bytes),
            Err(FormatError::Truncated)
        ));
    }
}
