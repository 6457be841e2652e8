use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter bag (spec §3 "Stats counter bag"). Reset only by
/// explicit call to `reset`; never decremented otherwise.
#[derive(Debug, Default)]
pub struct Stats {
    files_processed: AtomicU64,
    files_moved: AtomicU64,
    duplicates_skipped: AtomicU64,
    errors: AtomicU64,
    total_bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub files_processed: u64,
    pub files_moved: u64,
    pub duplicates_skipped: u64,
    pub errors: u64,
    pub total_bytes: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_processed(&self) {
        self.files_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_moved(&self, bytes: u64) {
        self.files_moved.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            files_processed: self.files_processed.load(Ordering::Relaxed),
            files_moved: self.files_moved.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.files_processed.store(0, Ordering::Relaxed);
        self.files_moved.store(0, Ordering::Relaxed);
        self.duplicates_skipped.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.total_bytes.store(0, Ordering::Relaxed);
    }
}
