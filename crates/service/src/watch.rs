use std::path::Path;
use std::time::Duration;

use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

const DEBOUNCE: Duration = Duration::from_secs(2);

/// Watches the play-log directory and emits one debounced trigger per burst
/// of filesystem activity, so uploaded logs are merged ahead of the next
/// polling tick. The returned watcher must be kept alive by the caller.
pub fn watch_playlogs(
    dir: &Path,
    trigger: UnboundedSender<()>,
) -> Result<RecommendedWatcher, notify::Error> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        NotifyConfig::default(),
    )?;

    watcher.watch(dir, RecursiveMode::NonRecursive)?;

    tokio::spawn(async move {
        debounce_loop(rx, trigger).await;
    });

    Ok(watcher)
}

async fn debounce_loop(mut rx: UnboundedReceiver<Event>, trigger: UnboundedSender<()>) {
    loop {
        let event = match rx.recv().await {
            Some(event) => event,
            None => break,
        };
        if !is_relevant_event(&event) {
            continue;
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(DEBOUNCE) => {
                    let _ = trigger.send(());
                    break;
                }
                maybe_event = rx.recv() => {
                    if maybe_event.is_none() {
                        let _ = trigger.send(());
                        return;
                    }
                }
            }
        }
    }
}

fn is_relevant_event(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
}
