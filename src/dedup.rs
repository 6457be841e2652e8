use std::path::{Path, PathBuf};
use std::time::SystemTime;

use dashmap::DashMap;

use crate::file_ops::{self, FileOpsError};

#[derive(Debug, Clone)]
struct CacheEntry {
    hash: String,
    mtime: Option<SystemTime>,
}

/// Content-hash dedup cache keyed by SHA-256 digest, with a secondary
/// mtime-gated index keyed by path so re-hashing an unchanged file is
/// avoided (spec §4.B, grounded in the mtime-validity check of the
/// original `Deduplicator.calculate_hash`).
#[derive(Debug, Default)]
pub struct DedupCache {
    by_hash: DashMap<String, PathBuf>,
    by_path: DashMap<PathBuf, CacheEntry>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hashes `path`, reusing the cached digest when the file's mtime
    /// has not changed since it was last recorded.
    pub async fn hash_cached(&self, path: &Path) -> Result<String, FileOpsError> {
        let mtime = tokio::fs::metadata(path).await.ok().and_then(|m| m.modified().ok());

        if let Some(entry) = self.by_path.get(path) {
            if entry.mtime.is_some() && entry.mtime == mtime {
                return Ok(entry.hash.clone());
            }
        }

        let hash = file_ops::hash_file(path).await?;
        self.by_path.insert(
            path.to_path_buf(),
            CacheEntry {
                hash: hash.clone(),
                mtime,
            },
        );
        Ok(hash)
    }

    /// Returns the first previously recorded path sharing `hash`, if any.
    pub fn find_by_hash(&self, hash: &str) -> Option<PathBuf> {
        self.by_hash.get(hash).map(|entry| entry.clone())
    }

    /// Checks whether `path`'s content already exists under a recorded
    /// hash, hashing `path` first. Returns the matching existing path
    /// when a duplicate is found (spec §4.B `is_duplicate`).
    pub async fn is_duplicate(&self, path: &Path) -> Result<Option<PathBuf>, FileOpsError> {
        let hash = self.hash_cached(path).await?;
        Ok(self.find_by_hash(&hash).filter(|existing| existing != path))
    }

    /// Records `path` under `hash`, making it discoverable by future
    /// `is_duplicate` checks.
    pub fn record(&self, hash: String, path: PathBuf) {
        self.by_hash.insert(hash, path);
    }

    /// Recursively walks `dir` and hashes every regular file into the
    /// cache, used to seed the cache from an existing destination tree
    /// (spec §4.B `build_directory_hash_index`).
    pub async fn load_from_directory(&self, dir: &Path) -> Result<usize, FileOpsError> {
        let mut seeded = 0usize;
        let mut stack = vec![dir.to_path_buf()];

        while let Some(current) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(FileOpsError::Io(e)),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                let hash = self.hash_cached(&path).await?;
                self.record(hash, path);
                seeded += 1;
            }
        }

        Ok(seeded)
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    /// Drops every path whose cached mtime no longer matches the
    /// filesystem, used for periodic cache hygiene (spec §4.B `prune_cache`).
    pub async fn prune_stale(&self) -> usize {
        let mut stale = Vec::new();
        for entry in self.by_path.iter() {
            let path = entry.key().clone();
            let current_mtime = tokio::fs::metadata(&path).await.ok().and_then(|m| m.modified().ok());
            if current_mtime != entry.mtime {
                stale.push(path);
            }
        }

        for path in &stale {
            self.by_path.remove(path);
        }
        stale.len()
    }

    pub fn clear(&self) {
        self.by_hash.clear();
        self.by_path.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn records_and_detects_duplicate_by_hash() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.jpg");
        tokio::fs::write(&a, b"same content").await.unwrap();
        tokio::fs::write(&b, b"same content").await.unwrap();

        let cache = DedupCache::new();
        let hash_a = cache.hash_cached(&a).await.unwrap();
        cache.record(hash_a, a.clone());

        let dup = cache.is_duplicate(&b).await.unwrap();
        assert_eq!(dup, Some(a));
    }

    #[tokio::test]
    async fn distinct_content_is_not_a_duplicate() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.jpg");
        tokio::fs::write(&a, b"one").await.unwrap();
        tokio::fs::write(&b, b"two").await.unwrap();

        let cache = DedupCache::new();
        let hash_a = cache.hash_cached(&a).await.unwrap();
        cache.record(hash_a, a);

        assert_eq!(cache.is_duplicate(&b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn load_from_directory_seeds_cache() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("x.jpg"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("y.jpg"), b"y").await.unwrap();

        let cache = DedupCache::new();
        let seeded = cache.load_from_directory(dir.path()).await.unwrap();
        assert_eq!(seeded, 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn load_from_directory_recurses_into_subdirectories() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested");
        tokio::fs::create_dir(&nested).await.unwrap();
        tokio::fs::write(dir.path().join("x.jpg"), b"x").await.unwrap();
        tokio::fs::write(nested.join("y.jpg"), b"y").await.unwrap();

        let cache = DedupCache::new();
        let seeded = cache.load_from_directory(dir.path()).await.unwrap();
        assert_eq!(seeded, 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn hash_cached_reuses_digest_when_mtime_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        tokio::fs::write(&path, b"content").await.unwrap();

        let cache = DedupCache::new();
        let h1 = cache.hash_cached(&path).await.unwrap();
        let h2 = cache.hash_cached(&path).await.unwrap();
        assert_eq!(h1, h2);
    }
}
