use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::file_ops;
use crate::model::MonitoredFolder;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("failed to watch path {0}: {1}")]
    WatchError(PathBuf, notify::Error),
}

/// A file that has settled (no further write events for the configured
/// debounce window) and is ready to be queued (spec §4.C).
#[derive(Debug, Clone)]
pub struct DetectedFile {
    pub path: PathBuf,
    pub folder: Arc<MonitoredFolder>,
    pub size: u64,
}

fn is_hidden(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
    })
}

/// Pure, synchronous debounce bookkeeping: tracks the last time each
/// path was touched and reports which paths have gone quiet for at
/// least `debounce` (spec §4.C). Kept free of I/O and the `notify`
/// crate so it can be unit tested without a filesystem watcher.
#[derive(Debug, Default)]
pub struct DebounceTracker {
    pending: HashMap<PathBuf, Instant>,
}

impl DebounceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, now);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Removes and returns every path whose last touch is at least
    /// `debounce` old as of `now`.
    pub fn take_ready(&mut self, now: Instant, debounce: Duration) -> Vec<PathBuf> {
        let ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, last_seen)| now.duration_since(**last_seen) >= debounce)
            .map(|(path, _)| path.clone())
            .collect();

        for path in &ready {
            self.pending.remove(path);
        }
        ready
    }

    /// Removes and returns every pending path, regardless of age, used
    /// when draining on shutdown.
    pub fn drain_all(&mut self) -> Vec<PathBuf> {
        self.pending.drain().map(|(path, _)| path).collect()
    }
}

/// Finds the monitored folder that owns `path`: the folder whose root
/// is the longest matching ancestor.
fn owning_folder<'a>(
    path: &Path,
    folders: &'a [Arc<MonitoredFolder>],
) -> Option<&'a Arc<MonitoredFolder>> {
    folders
        .iter()
        .filter(|f| path.starts_with(&f.path))
        .max_by_key(|f| f.path.as_os_str().len())
}

/// Watches every enabled folder in `folders` for creates/modifies,
/// debounces per-path, and emits a `DetectedFile` once a path has been
/// quiet for the folder's configured window. Generalizes the
/// single-pipeline watcher into a fan-in over an arbitrary folder set
/// (spec §4.C), bridging the blocking `notify` crate into the async
/// runtime via a dedicated thread.
pub async fn run_watcher(
    folders: Vec<Arc<MonitoredFolder>>,
    debounce_ms: u64,
    tx: mpsc::Sender<DetectedFile>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> Result<(), WatcherError> {
    let (notify_tx, mut notify_rx) = mpsc::channel(256);
    let stop_flag = Arc::new(AtomicBool::new(false));
    let thread_stop = stop_flag.clone();
    let watch_paths: Vec<PathBuf> = folders
        .iter()
        .filter(|f| f.enabled)
        .map(|f| f.path.clone())
        .collect();

    let bridge_paths = watch_paths.clone();
    std::thread::spawn(move || {
        let (std_tx, std_rx) = std::sync::mpsc::channel();

        let mut watcher = match RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = std_tx.send(event);
                }
            },
            notify::Config::default(),
        ) {
            Ok(w) => w,
            Err(e) => {
                tracing::error!(error = %e, "failed to initialize filesystem watcher");
                return;
            }
        };

        for path in &bridge_paths {
            if let Err(e) = watcher.watch(path, RecursiveMode::Recursive) {
                tracing::error!(path = %path.display(), error = %e, "failed to watch path");
            }
        }

        while let Ok(event) = std_rx.recv_timeout(Duration::from_secs(1)) {
            if thread_stop.load(Ordering::Relaxed) {
                break;
            }
            if notify_tx.blocking_send(event).is_err() {
                break;
            }
        }
    });

    let debounce_time = Duration::from_millis(debounce_ms);
    let mut tracker = DebounceTracker::new();
    let mut check_interval = tokio::time::interval(Duration::from_millis(500));

    let emit = |path: PathBuf, tx: mpsc::Sender<DetectedFile>, folders: Vec<Arc<MonitoredFolder>>| async move {
        let Some(folder) = owning_folder(&path, &folders).cloned() else {
            return;
        };
        if !file_ops::is_image(&path, &folder.allowed_extensions) {
            return;
        }
        if let Ok(metadata) = tokio::fs::metadata(&path).await {
            let _ = tx
                .send(DetectedFile {
                    path,
                    folder,
                    size: metadata.len(),
                })
                .await;
        }
    };

    loop {
        tokio::select! {
            Some(event) = notify_rx.recv() => {
                if let EventKind::Create(_) | EventKind::Modify(_) = event.kind {
                    for path in event.paths {
                        if is_hidden(&path) {
                            continue;
                        }
                        if path.exists() && path.is_file() {
                            tracker.touch(path, Instant::now());
                        }
                    }
                }
            }

            _ = check_interval.tick() => {
                for path in tracker.take_ready(Instant::now(), debounce_time) {
                    emit(path, tx.clone(), folders.clone()).await;
                }
            }

            _ = shutdown.recv() => {
                stop_flag.store(true, Ordering::Relaxed);
                let pending = tracker.drain_all();
                tracing::info!(count = pending.len(), "watcher shutting down, draining pending files");
                for path in pending {
                    emit(path, tx.clone(), folders.clone()).await;
                }
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(path: &str) -> Arc<MonitoredFolder> {
        Arc::new(MonitoredFolder {
            path: PathBuf::from(path),
            kind: crate::model::FolderKind::Custom,
            enabled: true,
            cron: None,
            archive_on_move: false,
            archive_root: None,
            allowed_extensions: vec!["jpg".into()],
        })
    }

    #[test]
    fn debounce_tracker_reports_only_quiet_paths() {
        let mut tracker = DebounceTracker::new();
        let now = Instant::now();
        tracker.touch(PathBuf::from("/a"), now);

        let immediately = tracker.take_ready(now, Duration::from_millis(500));
        assert!(immediately.is_empty());
        assert_eq!(tracker.len(), 1);

        let later = now + Duration::from_millis(600);
        let ready = tracker.take_ready(later, Duration::from_millis(500));
        assert_eq!(ready, vec![PathBuf::from("/a")]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn debounce_tracker_touch_resets_the_clock() {
        let mut tracker = DebounceTracker::new();
        let t0 = Instant::now();
        tracker.touch(PathBuf::from("/a"), t0);

        let t1 = t0 + Duration::from_millis(300);
        tracker.touch(PathBuf::from("/a"), t1);

        let t2 = t1 + Duration::from_millis(400);
        assert!(tracker.take_ready(t2, Duration::from_millis(500)).is_empty());
    }

    #[test]
    fn drain_all_returns_everything_regardless_of_age() {
        let mut tracker = DebounceTracker::new();
        tracker.touch(PathBuf::from("/a"), Instant::now());
        tracker.touch(PathBuf::from("/b"), Instant::now());
        assert_eq!(tracker.drain_all().len(), 2);
        assert!(tracker.is_empty());
    }

    #[test]
    fn owning_folder_picks_longest_prefix_match() {
        let outer = folder("/data");
        let inner = folder("/data/alice/photos");
        let folders = vec![outer, inner.clone()];

        let owner = owning_folder(Path::new("/data/alice/photos/img.jpg"), &folders);
        assert_eq!(owner.unwrap().path, inner.path);
    }

    #[test]
    fn owning_folder_returns_none_when_unmatched() {
        let folders = vec![folder("/data/alice")];
        assert!(owning_folder(Path::new("/other/img.jpg"), &folders).is_none());
    }
}
