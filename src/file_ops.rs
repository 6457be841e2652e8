use std::path::{Path, PathBuf};

use chrono::Local;
use sha2::{Digest, Sha256};
use thiserror::Error;

const HASH_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FileOpsError {
    #[error("source file not found: {0}")]
    NotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("post-move hash mismatch for {0}")]
    VerifyMismatch(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionPolicy {
    Rename,
    Skip,
    Overwrite,
}

#[derive(Debug, Clone)]
pub struct MoveOutcome {
    pub dest: PathBuf,
    pub already_existed: bool,
}

/// Reads `path` in fixed-size chunks and returns its SHA-256 digest as a
/// lowercase hex string. Hashing a missing path is a hard failure
/// (spec §4.A).
pub async fn hash_file(path: &Path) -> Result<String, FileOpsError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(FileOpsError::NotFound(path.to_path_buf()));
    }

    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<String, FileOpsError> {
        use std::io::Read;

        let mut file = std::fs::File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FileOpsError::NotFound(path.clone())
            } else {
                FileOpsError::Io(e)
            }
        })?;

        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; HASH_CHUNK_SIZE];

        loop {
            let read = file.read(&mut buf)?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }

        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .expect("hash task panicked")
}

fn timestamp_suffix() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Resolves a collision by appending `_YYYYMMDD_HHMMSS` then `_<n>` until
/// the candidate path is free (spec §4.A "Rename").
fn resolve_rename_collision(dest_dir: &Path, file_name: &str) -> PathBuf {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|s| s.to_string_lossy().into_owned());

    let build = |suffix: &str| -> PathBuf {
        let name = match &ext {
            Some(ext) => format!("{stem}{suffix}.{ext}"),
            None => format!("{stem}{suffix}"),
        };
        dest_dir.join(name)
    };

    let base_suffix = format!("_{}", timestamp_suffix());
    let candidate = build(&base_suffix);
    if !candidate.exists() {
        return candidate;
    }

    for n in 1u32.. {
        let candidate = build(&format!("{base_suffix}_{n}"));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!("filesystem cannot hold u32::MAX colliding names")
}

/// Moves `src` into `dest_dir`, applying `collision_policy` and
/// optionally verifying content-hash equality after the move (spec
/// §4.A). Same-filesystem rename is used when available; cross-device
/// moves fall back to copy-then-unlink, matching the teacher's
/// `organizer.rs::move_safe`.
pub async fn move_file(
    src: &Path,
    dest_dir: &Path,
    verify: bool,
    collision_policy: CollisionPolicy,
) -> Result<MoveOutcome, FileOpsError> {
    if !tokio::fs::try_exists(src).await.unwrap_or(false) {
        return Err(FileOpsError::NotFound(src.to_path_buf()));
    }

    tokio::fs::create_dir_all(dest_dir).await?;

    let file_name = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());

    let mut dest = dest_dir.join(&file_name);

    if dest.exists() {
        match collision_policy {
            CollisionPolicy::Skip => {
                return Ok(MoveOutcome {
                    dest,
                    already_existed: true,
                });
            }
            CollisionPolicy::Rename => {
                dest = resolve_rename_collision(dest_dir, &file_name);
            }
            CollisionPolicy::Overwrite => {}
        }
    }

    let pre_hash = if verify {
        Some(hash_file(src).await?)
    } else {
        None
    };

    move_same_or_cross_device(src, &dest).await?;

    if let Some(pre_hash) = pre_hash {
        match hash_file(&dest).await {
            Ok(post_hash) if post_hash == pre_hash => {}
            _ => {
                let _ = tokio::fs::remove_file(&dest).await;
                return Err(FileOpsError::VerifyMismatch(dest));
            }
        }
    }

    Ok(MoveOutcome {
        dest,
        already_existed: false,
    })
}

async fn move_same_or_cross_device(src: &Path, dest: &Path) -> Result<(), FileOpsError> {
    if tokio::fs::rename(src, dest).await.is_ok() {
        return Ok(());
    }

    tokio::fs::copy(src, dest).await?;

    let dest_owned = dest.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        std::fs::File::open(&dest_owned)?.sync_all()
    })
    .await
    .expect("sync task panicked")?;

    tokio::fs::remove_file(src).await?;
    Ok(())
}

/// Copies `src` into `archive_base`, preserving the immediate parent
/// directory name when `preserve_structure` is set, appending a
/// timestamp suffix on collision (spec §4.A).
pub async fn archive_file(
    src: &Path,
    archive_base: &Path,
    preserve_structure: bool,
) -> Result<PathBuf, FileOpsError> {
    if !tokio::fs::try_exists(src).await.unwrap_or(false) {
        return Err(FileOpsError::NotFound(src.to_path_buf()));
    }

    let file_name = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());

    let archive_dir = if preserve_structure {
        match src.parent().and_then(|p| p.file_name()) {
            Some(parent_name) => archive_base.join(parent_name),
            None => archive_base.to_path_buf(),
        }
    } else {
        archive_base.to_path_buf()
    };

    tokio::fs::create_dir_all(&archive_dir).await?;

    let mut archive_path = archive_dir.join(&file_name);
    if archive_path.exists() {
        archive_path = resolve_rename_collision(&archive_dir, &file_name);
    }

    tokio::fs::copy(src, &archive_path).await?;
    Ok(archive_path)
}

/// Case-insensitive extension match, rejecting directories implicitly
/// (callers pass regular-file paths; spec §4.A).
pub fn is_image(path: &Path, allowed_extensions: &[String]) -> bool {
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext,
        None => return false,
    };
    allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn hash_is_deterministic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.bin");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let h1 = hash_file(&path).await.unwrap();
        let h2 = hash_file(&path).await.unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[tokio::test]
    async fn empty_file_hashes_to_known_digest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        tokio::fs::write(&path, b"").await.unwrap();

        let h = hash_file(&path).await.unwrap();
        assert_eq!(
            h,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b85"
        );
    }

    #[tokio::test]
    async fn hashing_missing_path_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.bin");
        assert!(matches!(
            hash_file(&path).await,
            Err(FileOpsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn move_with_verify_matches_hash_and_removes_source() {
        let src_dir = tempdir().unwrap();
        let dest_dir = tempdir().unwrap();
        let src = src_dir.path().join("photo.jpg");
        tokio::fs::write(&src, b"bytes").await.unwrap();

        let outcome = move_file(&src, dest_dir.path(), true, CollisionPolicy::Rename)
            .await
            .unwrap();

        assert!(!src.exists());
        assert!(outcome.dest.exists());
        assert_eq!(tokio::fs::read(&outcome.dest).await.unwrap(), b"bytes");
    }

    #[tokio::test]
    async fn move_rename_avoids_overwriting_existing_file() {
        let src_dir = tempdir().unwrap();
        let dest_dir = tempdir().unwrap();
        tokio::fs::write(dest_dir.path().join("photo.jpg"), b"existing")
            .await
            .unwrap();

        let src = src_dir.path().join("photo.jpg");
        tokio::fs::write(&src, b"new").await.unwrap();

        let outcome = move_file(&src, dest_dir.path(), true, CollisionPolicy::Rename)
            .await
            .unwrap();

        assert_ne!(outcome.dest, dest_dir.path().join("photo.jpg"));
        assert!(dest_dir.path().join("photo.jpg").exists());
        assert!(outcome.dest.exists());
    }

    #[tokio::test]
    async fn move_skip_leaves_source_untouched() {
        let src_dir = tempdir().unwrap();
        let dest_dir = tempdir().unwrap();
        tokio::fs::write(dest_dir.path().join("photo.jpg"), b"existing")
            .await
            .unwrap();

        let src = src_dir.path().join("photo.jpg");
        tokio::fs::write(&src, b"new").await.unwrap();

        let outcome = move_file(&src, dest_dir.path(), true, CollisionPolicy::Skip)
            .await
            .unwrap();

        assert!(outcome.already_existed);
        assert!(src.exists());
    }

    #[tokio::test]
    async fn archive_preserves_parent_directory_name() {
        let src_parent = tempdir().unwrap();
        let archive_base = tempdir().unwrap();
        let src = src_parent.path().join("photo.jpg");
        tokio::fs::write(&src, b"data").await.unwrap();

        let archived = archive_file(&src, archive_base.path(), true).await.unwrap();
        let parent_name = src_parent.path().file_name().unwrap();
        assert!(archived.starts_with(archive_base.path().join(parent_name)));
    }

    #[test]
    fn is_image_is_case_insensitive() {
        let allowed = vec!["jpg".to_string(), "png".to_string()];
        assert!(is_image(Path::new("a.JPG"), &allowed));
        assert!(is_image(Path::new("a.png"), &allowed));
        assert!(!is_image(Path::new("a.gif"), &allowed));
        assert!(!is_image(Path::new("noext"), &allowed));
    }
}
