//!
//! folio storage watcher
//! ----------------------
//! Observes the storage root for out-of-band changes (files copied in by other
//! tools, deletions through a file manager) and regenerates the snapshot once a
//! burst of events has gone quiet.
//!
//! Producer/consumer: the notify callback only pushes a unit token into a
//! bounded channel; a single tokio task drains it and owns regeneration. A full
//! channel drops tokens, which is harmless because any queued token already
//! guarantees a regeneration after the burst.

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::snapshot::SnapshotGenerator;

const EVENT_QUEUE: usize = 256;

/// Whether a changed path should trigger regeneration: it must lie under
/// `root`, contain no dot-prefixed component, and sit no deeper than
/// `max_depth` directories below the root.
pub fn relevant(root: &Path, path: &Path, max_depth: usize) -> bool {
    let Ok(rel) = path.strip_prefix(root) else { return false };
    let mut depth = 0usize;
    for c in rel.components() {
        match c {
            Component::Normal(s) if s.to_string_lossy().starts_with('.') => return false,
            Component::Normal(_) => depth += 1,
            _ => return false,
        }
    }
    depth <= max_depth + 1
}

fn is_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_))
}

/// Consume change tokens and call `on_burst` once per burst, after `quiet` has
/// elapsed with no further token. Returns when `shutdown` fires or every
/// sender is gone (flushing a pending burst in the latter case).
pub async fn debounce_bursts<F, Fut>(
    mut rx: mpsc::Receiver<()>,
    quiet: Duration,
    mut shutdown: oneshot::Receiver<()>,
    mut on_burst: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        tokio::select! {
            _ = &mut shutdown => return,
            token = rx.recv() => if token.is_none() { return },
        }
        let mut events = 1usize;
        let closed = loop {
            tokio::select! {
                _ = &mut shutdown => return,
                next = tokio::time::timeout(quiet, rx.recv()) => match next {
                    Ok(Some(())) => events += 1,
                    Ok(None) => break true,
                    Err(_) => break false,
                },
            }
        };
        debug!(target: "watcher", events, "change burst settled");
        on_burst().await;
        if closed {
            return;
        }
    }
}

/// Keeps the OS watcher alive; dropping it (or calling `stop`) ends watching.
pub struct WatcherHandle {
    _watcher: RecommendedWatcher,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
        info!(target: "watcher", "storage watcher stopped");
    }
}

/// Start watching `root` recursively. Must be called inside a tokio runtime.
pub fn spawn(root: PathBuf, cfg: &WatcherConfig, generator: SnapshotGenerator) -> Result<WatcherHandle, notify::Error> {
    let (tx, rx) = mpsc::channel::<()>(EVENT_QUEUE);
    let filter_root = root.clone();
    let max_depth = cfg.max_depth;

    let mut watcher = RecommendedWatcher::new(
        move |result: Result<Event, notify::Error>| match result {
            Ok(event) if is_change(&event.kind) => {
                if event.paths.iter().any(|p| relevant(&filter_root, p, max_depth)) {
                    let _ = tx.try_send(());
                }
            }
            Ok(_) => {}
            Err(e) => warn!(target: "watcher", error = %e, "watch error"),
        },
        notify::Config::default(),
    )?;
    watcher.watch(&root, RecursiveMode::Recursive)?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(debounce_bursts(rx, cfg.quiet_period(), shutdown_rx, move || {
        let generator = generator.clone();
        async move {
            match generator.refresh().await {
                Ok(_) => debug!(target: "watcher", "snapshot regenerated after external change"),
                Err(e) => warn!(target: "watcher", error = %e, "snapshot regeneration failed"),
            }
        }
    }));

    info!(target: "watcher", root = %root.display(), max_depth, quiet_ms = cfg.quiet_period_ms, "storage watcher started");
    Ok(WatcherHandle { _watcher: watcher, shutdown_tx, task })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn relevance_rules() {
        let root = Path::new("/srv/uploads");
        assert!(relevant(root, Path::new("/srv/uploads/a.jpg"), 6));
        assert!(relevant(root, Path::new("/srv/uploads/A/B/c.jpg"), 6));
        assert!(!relevant(root, Path::new("/srv/uploads/.git/HEAD"), 6));
        assert!(!relevant(root, Path::new("/srv/uploads/A/.hidden.jpg"), 6));
        assert!(!relevant(root, Path::new("/srv/trash/a.jpg"), 6));
        assert!(relevant(root, Path::new("/srv/uploads/1/2/x.jpg"), 2));
        assert!(!relevant(root, Path::new("/srv/uploads/1/2/3/x.jpg"), 2));
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() -> std::future::Ready<()>) {
        let n = Arc::new(AtomicUsize::new(0));
        let c = n.clone();
        (n, move || {
            c.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        })
    }

    #[tokio::test]
    async fn burst_collapses_into_one_regeneration() {
        let (tx, rx) = mpsc::channel(16);
        let (_stop, shutdown) = oneshot::channel();
        let (count, on_burst) = counter();
        let task = tokio::spawn(debounce_bursts(rx, Duration::from_millis(80), shutdown, on_burst));

        for _ in 0..5 {
            tx.send(()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tx.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn closing_the_channel_flushes_pending_burst() {
        let (tx, rx) = mpsc::channel(4);
        let (_stop, shutdown) = oneshot::channel();
        let (count, on_burst) = counter();
        tx.send(()).await.unwrap();
        drop(tx);
        debounce_bursts(rx, Duration::from_secs(5), shutdown, on_burst).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_without_regenerating() {
        let (_tx, rx) = mpsc::channel::<()>(4);
        let (stop, shutdown) = oneshot::channel();
        let (count, on_burst) = counter();
        let task = tokio::spawn(debounce_bursts(rx, Duration::from_millis(20), shutdown, on_burst));
        stop.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn external_write_reaches_the_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = crate::config::StoreConfig::under(tmp.path()).absolutized().unwrap();
        std::fs::create_dir_all(&cfg.storage_root).unwrap();
        let generator = SnapshotGenerator::new(
            cfg.storage_root.clone(),
            cfg.snapshot_path.clone(),
            cfg.ignore.clone(),
            cfg.stabilize.clone(),
        );
        let wcfg = WatcherConfig { quiet_period_ms: 50, ..WatcherConfig::default() };
        let handle = spawn(cfg.storage_root.clone(), &wcfg, generator.clone()).unwrap();

        std::fs::write(cfg.storage_root.join("dropped.jpg"), b"x").unwrap();
        let mut seen = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if let Some(bytes) = generator.read().await.unwrap() {
                if String::from_utf8_lossy(&bytes).contains("dropped.jpg") {
                    seen = true;
                    break;
                }
            }
        }
        handle.stop().await;
        assert!(seen, "watcher never regenerated the snapshot");
    }
}
