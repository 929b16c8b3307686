mod bundle;
mod playlog;

pub use bundle::{decode_bundle, encode_bundle, BundleHeader, BUNDLE_MAGIC, BUNDLE_VERSION};
pub use playlog::{decode_playlog, encode_playlog, PlayLogEntry, PLAYLOG_MAGIC, PLAYLOG_VERSION};

#[derive(Debug)]
pub enum FormatError {
    BadMagic([u8; 4]),
    UnsupportedVersion(u16),
    Truncated,
    InvalidUtf8,
    TrackIdTooLong(usize),
    Json(serde_json::Error),
}

impl std::fmt::Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatError::BadMagic(magic) => write!(f, "bad magic: {:?}", magic),
            FormatError::UnsupportedVersion(version) => {
                write!(f, "unsupported format version: {}", version)
            }
            FormatError::Truncated => write!(f, "truncated buffer"),
            FormatError::InvalidUtf8 => write!(f, "invalid utf-8 in string field"),
            FormatError::TrackIdTooLong(len) => {
                write!(f, "track id of {} bytes exceeds one-byte length prefix", len)
            }
            FormatError::Json(err) => write!(f, "metadata document error: {}", err),
        }
    }
}

impl std::error::Error for FormatError {}

impl From<serde_json::Error> for FormatError {
    fn from(err: serde_json::Error) -> Self {
        FormatError::Json(err)
    }
}

/// Bounds-checked read cursor. Every read goes through `take`, so a
/// malformed length field can never run past the buffer.
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        let end = self.pos.checked_add(len).ok_or(FormatError::Truncated)?;
        if end > self.buf.len() {
            return Err(FormatError::Truncated);
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, FormatError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, FormatError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, FormatError> {
        let bytes = self.take(8)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(out))
    }

    pub(crate) fn read_str(&mut self, len: usize) -> Result<&'a str, FormatError> {
        std::str::from_utf8(self.take(len)?).map_err(|_| FormatError::InvalidUtf8)
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_refuses_overrun() {
        let mut cursor = Cursor::new(&[1, 2, 3]);
        assert_eq!(cursor.take(2).unwrap(), &[1, 2]);
        assert!(matches!(cursor.take(2), Err(FormatError::Truncated)));
        // A failed take must not advance.
        assert_eq!(cursor.take(1).unwrap(), &[3]);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn cursor_reads_little_endian() {
        let mut cursor = Cursor::new(&[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(cursor.read_u32().unwrap(), 0x0403_0201);
    }
}
