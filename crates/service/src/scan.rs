use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use common::{join_relpath, metadata_dir, relpath_from, Document, DOC_TRACK_ID};
use probe::probe_track;
use store::TrackStore;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "m4a", "aac", "wav", "ogg", "opus", "wma", "aiff", "alac", "dsf", "ape", "wv",
    "mka",
];

const DOC_COVER_FILE: &str = "cover_file";
const DOC_HAS_COVER: &str = "has_cover";

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            AUDIO_EXTENSIONS.iter().any(|known| *known == ext)
        })
        .unwrap_or(false)
}

fn audio_files(root: &Path) -> Vec<PathBuf> {
    let meta_dir = metadata_dir(root);
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| entry.path() != meta_dir)
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("walk error under {:?}: {}", root, err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_audio_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

fn sidecar_path(audio: &Path) -> PathBuf {
    audio.with_extension("json")
}

fn cover_path(audio: &Path) -> PathBuf {
    audio.with_extension("cover")
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn needs_probe(audio: &Path, sidecar: &Path) -> bool {
    let sidecar_mtime = match mtime(sidecar) {
        Some(t) => t,
        None => return true,
    };
    if let Some(audio_mtime) = mtime(audio) {
        if sidecar_mtime < audio_mtime {
            return true;
        }
    }

    // Regenerate when the artwork file went missing for a track that has an
    // embedded cover.
    if let Ok(text) = fs::read_to_string(sidecar) {
        if let Ok(doc) = serde_json::from_str::<Document>(&text) {
            let has_cover = doc
                .get(DOC_HAS_COVER)
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if has_cover && !cover_path(audio).exists() {
                return true;
            }
        }
    }
    false
}

/// Probes every audio file whose sidecar is missing or stale, writing the
/// sidecar JSON and raw artwork next to the audio file. Returns whether
/// anything was (re)generated. A probe failure skips the file for this
/// sweep; the missing sidecar means it is picked up again on the next one.
pub fn ensure_sidecars(root: &Path) -> bool {
    let mut changed = false;
    for audio in audio_files(root) {
        let sidecar = sidecar_path(&audio);
        if !needs_probe(&audio, &sidecar) {
            continue;
        }

        let action = if sidecar.exists() { "refreshing" } else { "generating" };
        debug!("{} sidecar for {:?}", action, audio);

        let mut probed = match probe_track(root, &audio) {
            Ok(probed) => probed,
            Err(err) => {
                warn!("probe failed for {:?}: {}, skipping", audio, err);
                continue;
            }
        };

        if let Some(artwork) = &probed.artwork {
            let cover = cover_path(&audio);
            if let Err(err) = fs::write(&cover, &artwork.data) {
                warn!("failed to write artwork {:?}: {}", cover, err);
            } else if let Some(rel) = relpath_from(root, &cover) {
                probed.document.insert(DOC_COVER_FILE.into(), rel.into());
                if let Some(mime) = &artwork.mime {
                    probed.document.insert("cover_mime".into(), mime.clone().into());
                }
            }
        }

        let text = match serde_json::to_string_pretty(&probed.document) {
            Ok(text) => text,
            Err(err) => {
                warn!("failed to serialize sidecar for {:?}: {}", audio, err);
                continue;
            }
        };
        if let Err(err) = fs::write(&sidecar, text) {
            warn!("failed to write sidecar {:?}: {}", sidecar, err);
            continue;
        }

        info!("sidecar updated for {:?}", audio);
        changed = true;
    }
    changed
}

/// Walks every sidecar JSON under the root and merges it into the store.
/// Documents without a `track_id` are skipped; stats on existing records are
/// left untouched by the merge.
pub fn reconcile_sidecars(root: &Path, store: &mut TrackStore) -> bool {
    let meta_dir = metadata_dir(root);
    let mut sidecars: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| entry.path() != meta_dir)
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.path().extension().and_then(|e| e.to_str()) == Some("json")
        })
        .map(|entry| entry.into_path())
        .collect();
    sidecars.sort();

    let mut changed = false;
    for path in sidecars {
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                warn!("failed to read sidecar {:?}: {}", path, err);
                continue;
            }
        };
        let document: Document = match serde_json::from_str(&text) {
            Ok(document) => document,
            Err(err) => {
                warn!("invalid sidecar {:?}: {}", path, err);
                continue;
            }
        };
        if document.get(DOC_TRACK_ID).and_then(|v| v.as_str()).is_none() {
            warn!("sidecar {:?} has no track id, skipping", path);
            continue;
        }

        let artwork = document
            .get(DOC_COVER_FILE)
            .and_then(|v| v.as_str())
            .map(|rel| join_relpath(root, rel))
            .and_then(|cover| match fs::read(&cover) {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    debug!("artwork {:?} unreadable: {}", cover, err);
                    None
                }
            })
            .unwrap_or_default();

        match store.ingest_sidecar(document, artwork) {
            Ok(true) => changed = true,
            Ok(false) => {}
            Err(err) => warn!("failed to reconcile sidecar {:?}: {}", path, err),
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sidecar_json(track_id: &str, relpath: &str) -> String {
        format!(
            r#"{{"track_id": "{}", "relative_path": "{}", "title": "Song"}}"#,
            track_id, relpath
        )
    }

    #[test]
    fn recognizes_audio_extensions_case_insensitively() {
        assert!(is_audio_file(Path::new("a.mp3")));
        assert!(is_audio_file(Path::new("b.FLAC")));
        assert!(!is_audio_file(Path::new("c.txt")));
        assert!(!is_audio_file(Path::new("noext")));
    }

    #[test]
    fn scan_skips_the_metadata_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join(".service-metadata/playlogs")).unwrap();
        std::fs::write(root.join("song.mp3"), b"x").unwrap();
        std::fs::write(root.join(".service-metadata/cached.mp3"), b"x").unwrap();

        let files = audio_files(root);
        assert_eq!(files, vec![root.join("song.mp3")]);
    }

    #[test]
    fn unreadable_audio_is_skipped_without_a_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("broken.mp3"), b"not actually audio").unwrap();

        assert!(!ensure_sidecars(root));
        assert!(!root.join("broken.json").exists());
    }

    #[test]
    fn reconcile_populates_store_from_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("a.json"), sidecar_json("id-a", "a.mp3")).unwrap();
        std::fs::write(root.join("b.json"), sidecar_json("id-b", "b.mp3")).unwrap();

        let mut store = TrackStore::new();
        assert!(reconcile_sidecars(root, &mut store));
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("id-a").unwrap().relative_path, "a.mp3");

        // Unchanged sidecars are a no-op on the second pass.
        assert!(!reconcile_sidecars(root, &mut store));
    }

    #[test]
    fn reconcile_loads_artwork_referenced_by_the_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("a.cover"), [0xFF, 0xD8, 0xFF]).unwrap();
        let doc = r#"{"track_id": "id-a", "relative_path": "a.mp3", "cover_file": "a.cover"}"#;
        std::fs::write(root.join("a.json"), doc).unwrap();

        let mut store = TrackStore::new();
        reconcile_sidecars(root, &mut store);
        assert_eq!(store.get("id-a").unwrap().artwork, vec![0xFF, 0xD8, 0xFF]);
    }

    #[test]
    fn reconcile_ignores_foreign_json() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("album.json"), r#"{"summary": "liner notes"}"#).unwrap();
        std::fs::write(root.join("broken.json"), "{not json").unwrap();

        let mut store = TrackStore::new();
        assert!(!reconcile_sidecars(root, &mut store));
        assert!(store.is_empty());
    }

    #[test]
    fn reconcile_preserves_stats_across_passes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("a.json"), sidecar_json("id-a", "a.mp3")).unwrap();

        let mut store = TrackStore::new();
        reconcile_sidecars(root, &mut store);
        store::apply_entries(
            &mut store,
            &[codec::PlayLogEntry {
                timestamp_ms: 777,
                track_id: "id-a".into(),
            }],
        );

        // A changed sidecar replaces metadata but not stats.
        std::fs::write(
            root.join("a.json"),
            r#"{"track_id": "id-a", "relative_path": "a.mp3", "title": "Renamed"}"#,
        )
        .unwrap();
        assert!(reconcile_sidecars(root, &mut store));
        let record = store.get("id-a").unwrap();
        assert_eq!(record.metadata["title"], "Renamed");
        assert_eq!(record.stats.play_count, 1);
        assert_eq!(record.stats.last_play_ms, 777);
    }
}
