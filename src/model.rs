use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a `MonitoredFolder` was discovered (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderKind {
    UserRoot { user: String },
    Custom,
}

/// A single source folder under watch. Immutable after load; a config
/// reload replaces the whole set atomically rather than mutating one in
/// place (spec §3, §9 "global config singleton" redesign note).
#[derive(Debug, Clone)]
pub struct MonitoredFolder {
    pub path: PathBuf,
    pub kind: FolderKind,
    pub enabled: bool,
    pub cron: Option<String>,
    pub archive_on_move: bool,
    pub archive_root: Option<PathBuf>,
    pub allowed_extensions: Vec<String>,
}

impl MonitoredFolder {
    /// Default archive base when `archive_root` is unset: `<folder>/.archive`.
    pub fn archive_base(&self) -> PathBuf {
        self.archive_root
            .clone()
            .unwrap_or_else(|| self.path.join(".archive"))
    }

    pub fn label(&self) -> String {
        match &self.kind {
            FolderKind::UserRoot { user } => format!("user:{user}"),
            FolderKind::Custom => format!("custom:{}", self.path.display()),
        }
    }
}

/// Ingest priority. Smaller value dequeues first (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Manual = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

/// A single source-file work unit traversing the sync state machine
/// (spec §3). Owned by the queue between enqueue and dequeue.
#[derive(Debug, Clone)]
pub struct IngestItem {
    pub path: PathBuf,
    pub folder: std::sync::Arc<MonitoredFolder>,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl IngestItem {
    pub fn new(path: PathBuf, folder: std::sync::Arc<MonitoredFolder>, priority: Priority) -> Self {
        Self {
            path,
            folder,
            priority,
            enqueued_at: Utc::now(),
            retry_count: 0,
            max_retries: 3,
        }
    }

    pub fn retry(mut self) -> Self {
        self.retry_count += 1;
        self.enqueued_at = Utc::now();
        self
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Terminal outcome of syncing a single `IngestItem` (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Completed,
    SkippedDuplicate,
    Failed,
}

#[derive(Debug, Clone)]
pub struct SyncResult {
    pub source: PathBuf,
    pub status: SyncStatus,
    pub destination: Option<PathBuf>,
    pub error: Option<(crate::error::ErrorKind, String)>,
    pub hash: Option<String>,
    pub size: Option<u64>,
    pub at: DateTime<Utc>,
}
