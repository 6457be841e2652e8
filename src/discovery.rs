use std::path::{Path, PathBuf};

const SKIP_PREFIXES: &[&str] = &["__groupfolders", "appdata_", "files_external"];
const SKIP_EXACT: &[&str] = &[".ocdata"];
const PHOTO_DIR_CANDIDATES: &[&str] = &["Photos", "photos"];

/// Enumerates Nextcloud user data directories and locates each user's
/// photo folder. Grounded in the original `NextcloudUserDetector`
/// (spec §4.D): skips Nextcloud's internal app/group directories and
/// requires a nested `files/` directory to treat an entry as a real
/// user.
pub struct NextcloudUserDetector {
    data_root: PathBuf,
    include: Vec<String>,
    exclude: Vec<String>,
}

impl NextcloudUserDetector {
    pub fn new(data_root: PathBuf, include: Vec<String>, exclude: Vec<String>) -> Self {
        Self {
            data_root,
            include,
            exclude,
        }
    }

    fn is_internal_entry(name: &str) -> bool {
        name.starts_with('.')
            || SKIP_EXACT.contains(&name)
            || SKIP_PREFIXES.iter().any(|p| name.starts_with(p))
    }

    fn passes_filters(&self, user: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|u| u == user) {
            return false;
        }
        !self.exclude.iter().any(|u| u == user)
    }

    /// Lists every directory under the data root that looks like a
    /// genuine user account (has a nested `files/` directory), applying
    /// the configured include/exclude lists.
    pub async fn detect_users(&self) -> std::io::Result<Vec<String>> {
        let mut users = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.data_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(users),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if Self::is_internal_entry(&name) {
                continue;
            }
            if !tokio::fs::try_exists(entry.path().join("files")).await.unwrap_or(false) {
                continue;
            }
            if self.passes_filters(&name) {
                users.push(name);
            }
        }

        users.sort();
        Ok(users)
    }

    /// Resolves a user's photo directory, trying `files/Photos` then
    /// `files/photos`. Returns `None` if neither exists.
    pub async fn user_photos_path(&self, username: &str) -> Option<PathBuf> {
        for candidate in PHOTO_DIR_CANDIDATES {
            let path = self.data_root.join(username).join("files").join(candidate);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Some(path);
            }
        }
        None
    }

    /// Resolves photo directories for every detected user, skipping
    /// users that have no photo directory yet.
    pub async fn all_user_photos_paths(&self) -> std::io::Result<Vec<(String, PathBuf)>> {
        let mut paths = Vec::new();
        for user in self.detect_users().await? {
            if let Some(path) = self.user_photos_path(&user).await {
                paths.push((user, path));
            }
        }
        Ok(paths)
    }
}

/// Translates a host-visible path into the path the same file has
/// inside the Nextcloud container, by replacing the configured host
/// data root prefix with the container's fixed mount point. Grounded
/// in the teacher's `nextcloud.rs::translate_path`.
pub fn translate_path(host_path: &Path, host_root: &Path, container_root: &str) -> Option<PathBuf> {
    let relative = host_path.strip_prefix(host_root).ok()?;
    Some(Path::new(container_root).join(relative))
}
