use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque sidecar document. Key order is preserved verbatim across
/// reconciliation; the store only ever reads `track_id` and `relative_path`.
pub type Document = serde_json::Map<String, serde_json::Value>;

pub const DOC_TRACK_ID: &str = "track_id";
pub const DOC_RELATIVE_PATH: &str = "relative_path";

pub const METADATA_DIRNAME: &str = ".service-metadata";
pub const BUNDLE_FILENAME: &str = "library.bundle";
pub const PLAYLOG_DIRNAME: &str = "playlogs";
pub const PLAYLOG_PREFIX: &str = "playlog_";
pub const PLAYLOG_SUFFIX: &str = ".bin";

/// The track-id length field in both wire formats is a single byte.
pub const MAX_TRACK_ID_LEN: usize = 255;

/// Fingerprints cover only the head of the file so rescans stay cheap on
/// slow mounts.
pub const FINGERPRINT_CHUNK: usize = 10 * 1024;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlayStats {
    pub play_count: u32,
    pub last_play_ms: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrackRecord {
    pub track_id: String,
    pub relative_path: String,
    pub metadata: Document,
    /// Raw artwork bytes; empty means absent.
    pub artwork: Vec<u8>,
    pub stats: PlayStats,
}

pub fn metadata_dir(root: &Path) -> PathBuf {
    root.join(METADATA_DIRNAME)
}

pub fn bundle_path(root: &Path) -> PathBuf {
    metadata_dir(root).join(BUNDLE_FILENAME)
}

pub fn playlog_dir(root: &Path) -> PathBuf {
    metadata_dir(root).join(PLAYLOG_DIRNAME)
}

/// Content fingerprint over the first [`FINGERPRINT_CHUNK`] bytes, hex-encoded.
pub fn content_fingerprint(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; FINGERPRINT_CHUNK];
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(blake3::hash(&buf[..filled]).to_hex().to_string())
}

pub fn relpath_from(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(path_to_slash_string(rel))
}

pub fn join_relpath(root: &Path, relpath: &str) -> PathBuf {
    let mut out = PathBuf::from(root);
    for part in relpath.split('/') {
        if part.is_empty() {
            continue;
        }
        out.push(part);
    }
    out
}

fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
