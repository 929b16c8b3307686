mod scan;
mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use common::{bundle_path, metadata_dir, playlog_dir};
use parking_lot::Mutex;
use store::{consume_playlog_dir, load_or_empty, persist, TrackStore};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "media-bundle-service")]
#[command(about = "Maintains a library bundle from sidecar metadata and play logs")]
struct Cli {
    /// Audio library root directory
    root: PathBuf,

    /// Polling interval in seconds
    #[arg(long, default_value_t = 60)]
    interval: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    if !cli.root.is_dir() {
        return Err(format!("root directory does not exist: {:?}", cli.root).into());
    }
    let root = cli.root.canonicalize()?;
    std::fs::create_dir_all(metadata_dir(&root))?;
    std::fs::create_dir_all(playlog_dir(&root))?;

    let bundle = bundle_path(&root);
    let store = Arc::new(Mutex::new(load_or_empty(&bundle)));

    // The sender stays alive here so the trigger arm of the select below
    // never sees a closed channel, watcher or no watcher.
    let (trigger_tx, mut trigger_rx) = tokio::sync::mpsc::unbounded_channel();
    let _watcher = match watch::watch_playlogs(&playlog_dir(&root), trigger_tx.clone()) {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            warn!("failed to watch play-log directory: {}", err);
            None
        }
    };

    let interval = Duration::from_secs(cli.interval.max(5));
    info!("service started, root {:?}, interval {:?}", root, interval);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut pending = false;
    loop {
        let cycle_root = root.clone();
        let cycle_store = Arc::clone(&store);
        let cycle_bundle = bundle.clone();
        let had_pending = pending;
        pending = match tokio::task::spawn_blocking(move || {
            run_cycle(&cycle_root, &cycle_store, &cycle_bundle, had_pending)
        })
        .await
        {
            Ok(pending) => pending,
            Err(err) => {
                warn!("cycle aborted: {}", err);
                had_pending
            }
        };

        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(interval) => {}
            trigger = trigger_rx.recv() => {
                if trigger.is_some() {
                    info!("play-log activity detected, running early cycle");
                }
            }
        }
    }

    if pending {
        info!("flushing unsaved changes before exit");
        if let Err(err) = persist(&store.lock(), &bundle) {
            warn!("final flush failed: {}", err);
        }
    }

    Ok(())
}

/// One service cycle: refresh sidecars, reconcile them into the store, merge
/// pending play logs, and persist if anything changed. Returns whether
/// changes are still waiting to be persisted (a failed write is retried on
/// the next cycle). No failure here escapes the polling loop.
fn run_cycle(root: &Path, store: &Mutex<TrackStore>, bundle: &Path, pending: bool) -> bool {
    let mut changed = pending;

    changed |= scan::ensure_sidecars(root);

    let mut store = store.lock();
    changed |= scan::reconcile_sidecars(root, &mut store);

    match consume_playlog_dir(&mut store, &playlog_dir(root)) {
        Ok(stats_changed) => changed |= stats_changed,
        Err(err) => warn!("failed to process play logs: {}", err),
    }

    if !changed {
        return false;
    }
    match persist(&store, bundle) {
        Ok(()) => false,
        Err(err) => {
            warn!("failed to persist bundle: {}", err);
            true
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {}", err);
        }
    }

    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::{decode_bundle, encode_playlog, PlayLogEntry};

    fn write_sidecar(root: &Path, name: &str, track_id: &str) {
        let doc = format!(
            r#"{{"track_id": "{}", "relative_path": "{}.mp3", "title": "Song"}}"#,
            track_id, name
        );
        std::fs::write(root.join(format!("{}.json", name)), doc).unwrap();
    }

    #[test]
    fn cycle_reconciles_merges_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(playlog_dir(root)).unwrap();
        write_sidecar(root, "a", "id-a");

        let log = encode_playlog(&[
            PlayLogEntry { timestamp_ms: 500, track_id: "id-a".into() },
            PlayLogEntry { timestamp_ms: 2000, track_id: "id-a".into() },
            PlayLogEntry { timestamp_ms: 100, track_id: "ghost".into() },
        ])
        .unwrap();
        let log_path = playlog_dir(root).join("playlog_0001.bin");
        std::fs::write(&log_path, log).unwrap();

        let bundle = bundle_path(root);
        let store = Mutex::new(TrackStore::new());
        let pending = run_cycle(root, &store, &bundle, false);
        assert!(!pending);
        assert!(!log_path.exists());

        let (_, entries) = decode_bundle(&std::fs::read(&bundle).unwrap()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].track_id, "id-a");
        assert_eq!(entries[0].stats.play_count, 2);
        assert_eq!(entries[0].stats.last_play_ms, 2000);
    }

    #[test]
    fn quiet_cycle_does_not_rewrite_the_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(playlog_dir(root)).unwrap();
        write_sidecar(root, "a", "id-a");

        let bundle = bundle_path(root);
        let store = Mutex::new(TrackStore::new());
        run_cycle(root, &store, &bundle, false);
        let first = std::fs::read(&bundle).unwrap();

        run_cycle(root, &store, &bundle, false);
        let second = std::fs::read(&bundle).unwrap();
        // Byte-identical including the build timestamp: nothing was written.
        assert_eq!(first, second);
    }
}
