use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::model::{FolderKind, IngestItem, MonitoredFolder, Priority};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is at capacity ({0})")]
    Full(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A seq-ordered wrapper over `IngestItem` so that items of equal
/// priority dequeue in enqueue order (spec §3 invariant #3). The
/// Python original relies on the priority queue's tuple comparison
/// falling through to insertion order; we make that explicit with a
/// monotonic counter rather than depending on timestamp resolution.
#[derive(Debug, Clone)]
struct QueueEntry {
    priority: Priority,
    seq: u64,
    item: IngestItem,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; invert priority so Manual(0) pops
        // first, and invert seq so the earliest-enqueued entry of equal
        // priority pops first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub size: usize,
    pub capacity: usize,
    pub by_priority: [usize; 4],
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry {
    path: PathBuf,
    folder_path: PathBuf,
    priority: Priority,
    enqueued_at: DateTime<Utc>,
    retry_count: u32,
    max_retries: u32,
}

/// Bounded priority queue of pending ingest work (spec §3, §4.E).
/// Backed by a `BinaryHeap` guarded by a `tokio::sync::Mutex` since
/// enqueue/dequeue rates are dominated by filesystem and network I/O,
/// not lock contention.
pub struct IngestQueue {
    inner: Mutex<BinaryHeap<QueueEntry>>,
    capacity: usize,
    next_seq: std::sync::atomic::AtomicU64,
}

impl IngestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BinaryHeap::new()),
            capacity,
            next_seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub async fn enqueue(&self, item: IngestItem) -> Result<(), QueueError> {
        let mut heap = self.inner.lock().await;
        if heap.len() >= self.capacity {
            return Err(QueueError::Full(self.capacity));
        }
        let seq = self.next_seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        heap.push(QueueEntry {
            priority: item.priority,
            seq,
            item,
        });
        Ok(())
    }

    pub async fn dequeue(&self) -> Option<IngestItem> {
        self.inner.lock().await.pop().map(|entry| entry.item)
    }

    pub async fn size(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.size().await == 0
    }

    pub async fn is_full(&self) -> bool {
        self.size().await >= self.capacity
    }

    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }

    /// Non-destructive snapshot of pending items, for `stats` reporting
    /// and for persistence (spec §4.E `get_items`).
    pub async fn peek_items(&self) -> Vec<IngestItem> {
        self.inner
            .lock()
            .await
            .iter()
            .map(|entry| entry.item.clone())
            .collect()
    }

    pub async fn statistics(&self) -> QueueStatistics {
        let heap = self.inner.lock().await;
        let mut by_priority = [0usize; 4];
        for entry in heap.iter() {
            by_priority[entry.priority as usize] += 1;
        }
        QueueStatistics {
            size: heap.len(),
            capacity: self.capacity,
            by_priority,
        }
    }

    /// Serializes every pending item to `path` as JSON (spec §4.E
    /// `save_to_file`), for recovery across a restart.
    pub async fn save_snapshot(&self, path: &Path) -> Result<(), QueueError> {
        let entries: Vec<SnapshotEntry> = self
            .peek_items()
            .await
            .into_iter()
            .map(|item| SnapshotEntry {
                path: item.path,
                folder_path: item.folder.path.clone(),
                priority: item.priority,
                enqueued_at: item.enqueued_at,
                retry_count: item.retry_count,
                max_retries: item.max_retries,
            })
            .collect();

        let json = serde_json::to_vec_pretty(&entries)?;
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    /// Restores a previously saved snapshot, re-resolving each entry's
    /// folder against `known_folders` by path. Entries whose folder no
    /// longer exists in the current config are dropped.
    pub async fn load_snapshot(
        &self,
        path: &Path,
        known_folders: &[Arc<MonitoredFolder>],
    ) -> Result<usize, QueueError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(QueueError::Io(e)),
        };

        let entries: Vec<SnapshotEntry> = serde_json::from_slice(&bytes)?;
        let mut restored = 0usize;

        for entry in entries {
            let Some(folder) = known_folders.iter().find(|f| f.path == entry.folder_path) else {
                continue;
            };
            let item = IngestItem {
                path: entry.path,
                folder: folder.clone(),
                priority: entry.priority,
                enqueued_at: entry.enqueued_at,
                retry_count: entry.retry_count,
                max_retries: entry.max_retries,
            };
            if self.enqueue(item).await.is_ok() {
                restored += 1;
            }
        }

        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_folder() -> Arc<MonitoredFolder> {
        Arc::new(MonitoredFolder {
            path: PathBuf::from("/data/alice"),
            kind: FolderKind::UserRoot {
                user: "alice".into(),
            },
            enabled: true,
            cron: None,
            archive_on_move: false,
            archive_root: None,
            allowed_extensions: vec!["jpg".into()],
        })
    }

    #[tokio::test]
    async fn higher_priority_dequeues_first() {
        let queue = IngestQueue::new(10);
        let folder = test_folder();

        queue
            .enqueue(IngestItem::new(PathBuf::from("low.jpg"), folder.clone(), Priority::Low))
            .await
            .unwrap();
        queue
            .enqueue(IngestItem::new(PathBuf::from("manual.jpg"), folder.clone(), Priority::Manual))
            .await
            .unwrap();
        queue
            .enqueue(IngestItem::new(PathBuf::from("normal.jpg"), folder, Priority::Normal))
            .await
            .unwrap();

        assert_eq!(queue.dequeue().await.unwrap().priority, Priority::Manual);
        assert_eq!(queue.dequeue().await.unwrap().priority, Priority::Normal);
        assert_eq!(queue.dequeue().await.unwrap().priority, Priority::Low);
    }

    #[tokio::test]
    async fn equal_priority_dequeues_in_fifo_order() {
        let queue = IngestQueue::new(10);
        let folder = test_folder();

        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            queue
                .enqueue(IngestItem::new(PathBuf::from(name), folder.clone(), Priority::Normal))
                .await
                .unwrap();
        }

        let order: Vec<PathBuf> = {
            let mut out = Vec::new();
            while let Some(item) = queue.dequeue().await {
                out.push(item.path);
            }
            out
        };

        assert_eq!(
            order,
            vec![
                PathBuf::from("a.jpg"),
                PathBuf::from("b.jpg"),
                PathBuf::from("c.jpg"),
            ]
        );
    }

    #[tokio::test]
    async fn enqueue_past_capacity_fails() {
        let queue = IngestQueue::new(1);
        let folder = test_folder();
        queue
            .enqueue(IngestItem::new(PathBuf::from("a.jpg"), folder.clone(), Priority::Normal))
            .await
            .unwrap();

        let result = queue
            .enqueue(IngestItem::new(PathBuf::from("b.jpg"), folder, Priority::Normal))
            .await;
        assert!(matches!(result, Err(QueueError::Full(1))));
    }

    #[tokio::test]
    async fn snapshot_round_trips_pending_items() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot_path = dir.path().join("queue.json");
        let folder = test_folder();

        let queue = IngestQueue::new(10);
        queue
            .enqueue(IngestItem::new(PathBuf::from("a.jpg"), folder.clone(), Priority::High))
            .await
            .unwrap();
        queue.save_snapshot(&snapshot_path).await.unwrap();

        let restored_queue = IngestQueue::new(10);
        let restored = restored_queue
            .load_snapshot(&snapshot_path, &[folder])
            .await
            .unwrap();

        assert_eq!(restored, 1);
        assert_eq!(restored_queue.size().await, 1);
    }

    #[tokio::test]
    async fn statistics_reports_counts_per_priority() {
        let queue = IngestQueue::new(10);
        let folder = test_folder();
        queue
            .enqueue(IngestItem::new(PathBuf::from("a.jpg"), folder.clone(), Priority::High))
            .await
            .unwrap();
        queue
            .enqueue(IngestItem::new(PathBuf::from("b.jpg"), folder, Priority::High))
            .await
            .unwrap();

        let stats = queue.statistics().await;
        assert_eq!(stats.size, 2);
        assert_eq!(stats.by_priority[Priority::High as usize], 2);
    }
}
