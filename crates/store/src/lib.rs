mod persist;
mod playlog;

pub use persist::{load_or_empty, persist, PersistError};
pub use playlog::{apply_entries, consume_playlog_dir, Applied};

use std::collections::BTreeMap;

use common::{
    Document, PlayStats, TrackRecord, DOC_RELATIVE_PATH, DOC_TRACK_ID, MAX_TRACK_ID_LEN,
};

/// The authoritative fingerprint -> record mapping. Keyed with a `BTreeMap`
/// so iteration (and therefore the persisted bundle) is always in ascending
/// track-id order.
#[derive(Debug, Default)]
pub struct TrackStore {
    tracks: BTreeMap<String, TrackRecord>,
}

impl TrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<TrackRecord>) -> Self {
        let mut store = Self::new();
        for record in records {
            store.tracks.insert(record.track_id.clone(), record);
        }
        store
    }

    /// Merges a freshly scanned sidecar document into the store.
    ///
    /// An existing record gets its metadata, path, and artwork replaced while
    /// its stats are left untouched; a rescan can never reset accumulated
    /// play counts. Returns whether the store actually changed, so callers
    /// can batch persistence.
    pub fn ingest_sidecar(
        &mut self,
        document: Document,
        artwork: Vec<u8>,
    ) -> Result<bool, StoreError> {
        let track_id = required_field(&document, DOC_TRACK_ID)?;
        let relative_path = required_field(&document, DOC_RELATIVE_PATH)?;
        if track_id.len() > MAX_TRACK_ID_LEN {
            return Err(StoreError::TrackIdTooLong(track_id.len()));
        }

        match self.tracks.get_mut(&track_id) {
            Some(existing) => {
                if existing.metadata == document
                    && existing.artwork == artwork
                    && existing.relative_path == relative_path
                {
                    return Ok(false);
                }
                existing.relative_path = relative_path;
                existing.metadata = document;
                existing.artwork = artwork;
                Ok(true)
            }
            None => {
                self.tracks.insert(
                    track_id.clone(),
                    TrackRecord {
                        track_id,
                        relative_path,
                        metadata: document,
                        artwork,
                        stats: PlayStats::default(),
                    },
                );
                Ok(true)
            }
        }
    }

    pub fn get(&self, track_id: &str) -> Option<&TrackRecord> {
        self.tracks.get(track_id)
    }

    pub(crate) fn get_mut(&mut self, track_id: &str) -> Option<&mut TrackRecord> {
        self.tracks.get_mut(track_id)
    }

    /// Records in ascending track-id order.
    pub fn records(&self) -> impl Iterator<Item = &TrackRecord> {
        self.tracks.values()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

fn required_field(document: &Document, name: &'static str) -> Result<String, StoreError> {
    document
        .get(name)
        .and_then(|v| v.as_str())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .ok_or(StoreError::MissingField(name))
}

#[derive(Debug)]
pub enum StoreError {
    MissingField(&'static str),
    TrackIdTooLong(usize),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::MissingField(name) => write!(f, "sidecar document missing {}", name),
            StoreError::TrackIdTooLong(len) => {
                write!(f, "track id of {} bytes exceeds format limit", len)
            }
        }
    }
}

impl std::error::Error for StoreError {}
