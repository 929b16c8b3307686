use std::fs;
use std::io;
use std::path::Path;

use codec::{decode_bundle, encode_bundle, FormatError};
use common::now_ms;
use tracing::{info, warn};

use crate::TrackStore;

#[derive(Debug)]
pub enum PersistError {
    Io(io::Error),
    Format(FormatError),
}

impl std::fmt::Display for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistError::Io(err) => write!(f, "io error: {}", err),
            PersistError::Format(err) => write!(f, "format error: {}", err),
        }
    }
}

impl std::error::Error for PersistError {}

impl From<io::Error> for PersistError {
    fn from(err: io::Error) -> Self {
        PersistError::Io(err)
    }
}

impl From<FormatError> for PersistError {
    fn from(err: FormatError) -> Self {
        PersistError::Format(err)
    }
}

/// Loads the bundle at `path`, falling back to an empty store on any
/// failure. A corrupt bundle must never prevent the service from running;
/// the next persist simply rewrites it.
pub fn load_or_empty(path: &Path) -> TrackStore {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            info!("bundle not found at {:?}, starting with empty store", path);
            return TrackStore::new();
        }
        Err(err) => {
            warn!("failed to read bundle {:?}: {}, starting empty", path, err);
            return TrackStore::new();
        }
    };

    match decode_bundle(&data) {
        Ok((header, entries)) => {
            info!(
                "loaded {} entries from bundle built at {} ms",
                entries.len(),
                header.built_at_ms
            );
            TrackStore::from_records(entries)
        }
        Err(err) => {
            warn!("failed to decode bundle {:?}: {}, starting empty", path, err);
            TrackStore::new()
        }
    }
}

/// Writes the store to `path` through a sibling temporary file and an atomic
/// rename. Readers only ever observe a complete bundle, old or new.
pub fn persist(store: &TrackStore, path: &Path) -> Result<(), PersistError> {
    let entries: Vec<_> = store.records().cloned().collect();
    let bytes = encode_bundle(&entries, now_ms())?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, &bytes)?;
    fs::rename(&tmp_path, path)?;
    info!("bundle updated: {:?} ({} entries)", path, entries.len());
    Ok(())
}
