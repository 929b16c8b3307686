use std::fs;
use std::io;
use std::path::Path;

use codec::{decode_playlog, PlayLogEntry};
use common::{PLAYLOG_PREFIX, PLAYLOG_SUFFIX};
use tracing::{debug, info, warn};

use crate::TrackStore;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Applied {
    pub applied: usize,
    pub unknown: usize,
}

/// Merges decoded play-log entries into the store. Each entry is one play;
/// duplicates are deliberately not deduplicated. An entry naming an unknown
/// track is dropped with a diagnostic and never aborts the batch.
pub fn apply_entries(store: &mut TrackStore, entries: &[PlayLogEntry]) -> Applied {
    let mut outcome = Applied::default();
    for entry in entries {
        match store.get_mut(&entry.track_id) {
            Some(record) => {
                record.stats.play_count = record.stats.play_count.saturating_add(1);
                if entry.timestamp_ms > record.stats.last_play_ms {
                    record.stats.last_play_ms = entry.timestamp_ms;
                }
                outcome.applied += 1;
            }
            None => {
                warn!("play-log entry for unknown track {}, skipping", entry.track_id);
                outcome.unknown += 1;
            }
        }
    }
    outcome
}

/// Consumes every `playlog_*.bin` artifact in `dir`, lexicographically.
///
/// Artifacts are consumed-or-discarded: entries are applied to the store
/// first and the file is then deleted unconditionally, decode failure
/// included — a re-read of the same bytes cannot succeed, so a poisoned log
/// is never retried. Returns whether any stats changed.
pub fn consume_playlog_dir(store: &mut TrackStore, dir: &Path) -> io::Result<bool> {
    let mut log_files = Vec::new();
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    for entry in read_dir {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(PLAYLOG_PREFIX) && name.ends_with(PLAYLOG_SUFFIX) {
            log_files.push(entry.path());
        }
    }
    log_files.sort();

    let mut changed = false;
    for log_path in log_files {
        let data = match fs::read(&log_path) {
            Ok(data) => data,
            Err(err) => {
                warn!("failed to read play log {:?}: {}", log_path, err);
                continue;
            }
        };

        match decode_playlog(&data) {
            Ok(entries) => {
                let outcome = apply_entries(store, &entries);
                if outcome.applied > 0 {
                    changed = true;
                }
                info!(
                    "processed play log {:?} ({} entries, {} unknown)",
                    log_path.file_name().unwrap_or_default(),
                    entries.len(),
                    outcome.unknown
                );
            }
            Err(err) => {
                warn!("failed to decode play log {:?}: {}, discarding", log_path, err);
            }
        }

        match fs::remove_file(&log_path) {
            Ok(()) => debug!("deleted play log {:?}", log_path),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!("failed to delete play log {:?}: {}", log_path, err),
        }
    }

    Ok(changed)
}
