use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use crate::dedup::DedupCache;
use crate::error::ErrorKind;
use crate::file_ops::{self, CollisionPolicy};
use crate::model::{IngestItem, SyncResult, SyncStatus};
use crate::stats::Stats;

/// Moves a single debounced file from its source folder into the
/// shared import directory, skipping already-seen content and
/// recording the outcome (spec §4.I, grounded in the original
/// `Orchestrator`'s per-file handling and the teacher's
/// `organizer.rs::move_safe`).
pub struct SyncEngine {
    import_dir: PathBuf,
    dedup: Arc<DedupCache>,
    stats: Arc<Stats>,
}

impl SyncEngine {
    pub fn new(import_dir: PathBuf, dedup: Arc<DedupCache>, stats: Arc<Stats>) -> Self {
        Self {
            import_dir,
            dedup,
            stats,
        }
    }

    /// Pending -> Hashing -> CheckingDuplicate -> Moving -> Recording ->
    /// Completed, per the per-file state machine (spec §4.I).
    pub async fn sync_item(&self, item: &IngestItem) -> SyncResult {
        self.stats.record_processed();

        if !tokio::fs::try_exists(&item.path).await.unwrap_or(false) {
            self.stats.record_error();
            return failed(item, ErrorKind::NotFound);
        }

        let hash = match self.dedup.hash_cached(&item.path).await {
            Ok(hash) => hash,
            Err(e) => {
                self.stats.record_error();
                return failed(item, ErrorKind::HashFailure(e.to_string()));
            }
        };

        if let Some(_existing) = self.dedup.find_by_hash(&hash).filter(|p| p != &item.path) {
            return self.handle_duplicate(item).await;
        }

        let size = tokio::fs::metadata(&item.path).await.map(|m| m.len()).unwrap_or(0);

        let outcome =
            match file_ops::move_file(&item.path, &self.import_dir, true, CollisionPolicy::Rename).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.stats.record_error();
                    return failed(item, ErrorKind::MoveFailure(e.to_string()));
                }
            };

        self.dedup.record(hash.clone(), outcome.dest.clone());
        self.stats.record_moved(size);

        SyncResult {
            source: item.path.clone(),
            status: SyncStatus::Completed,
            destination: Some(outcome.dest),
            error: None,
            hash: Some(hash),
            size: Some(size),
            at: Utc::now(),
        }
    }

    /// Archives-or-deletes the source on a duplicate hit. Archive
    /// failure is logged but never downgrades the SkippedDuplicate
    /// status (spec §4.I "Duplicate policy on hit").
    async fn handle_duplicate(&self, item: &IngestItem) -> SyncResult {
        self.stats.record_duplicate();

        if item.folder.archive_on_move {
            if let Err(e) = file_ops::archive_file(&item.path, &item.folder.archive_base(), true).await {
                tracing::warn!(path = %item.path.display(), error = %e, "archive-on-duplicate failed");
            }
        }

        if let Err(e) = tokio::fs::remove_file(&item.path).await {
            tracing::warn!(path = %item.path.display(), error = %e, "failed to remove duplicate source");
        }

        SyncResult {
            source: item.path.clone(),
            status: SyncStatus::SkippedDuplicate,
            destination: None,
            error: None,
            hash: None,
            size: None,
            at: Utc::now(),
        }
    }
}

fn failed(item: &IngestItem, kind: ErrorKind) -> SyncResult {
    SyncResult {
        source: item.path.clone(),
        status: SyncStatus::Failed,
        destination: None,
        error: Some((kind.clone(), kind.to_string())),
        hash: None,
        size: None,
        at: Utc::now(),
    }
}
