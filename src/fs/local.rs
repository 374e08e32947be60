//! Local filesystem primitives: non-recursive listing and deletion.
//!
//! Listing is split into files and subdirectories because the sync passes
//! treat them differently: files fan out to concurrent transfers while
//! directory recursion stays sequential.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::fs;

use crate::fs::types::FileEntry;

/// List the regular files directly inside `dir`.
///
/// Symlinks and subdirectories are skipped; a missing modification time
/// falls back to the Unix epoch so the entry always compares as stale.
pub async fn list_files(dir: &Path) -> Result<Vec<FileEntry>> {
    let mut entries = Vec::new();

    let mut read_dir = fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read directory {}", dir.display()))?;

    while let Some(entry) = read_dir
        .next_entry()
        .await
        .with_context(|| format!("failed to read directory {}", dir.display()))?
    {
        let metadata = entry
            .metadata()
            .await
            .with_context(|| format!("failed to stat {}", entry.path().display()))?;
        if !metadata.is_file() {
            continue;
        }

        entries.push(FileEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            size: metadata.len(),
            modified: metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or(DateTime::UNIX_EPOCH),
            created: metadata.created().ok().map(DateTime::<Utc>::from),
        });
    }

    Ok(entries)
}

/// List the names of the subdirectories directly inside `dir`.
pub async fn list_dirs(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();

    let mut read_dir = fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read directory {}", dir.display()))?;

    while let Some(entry) = read_dir
        .next_entry()
        .await
        .with_context(|| format!("failed to read directory {}", dir.display()))?
    {
        let file_type = entry
            .file_type()
            .await
            .with_context(|| format!("failed to stat {}", entry.path().display()))?;
        if file_type.is_dir() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }

    Ok(names)
}

/// Delete a single regular file.
pub async fn delete_file(path: &Path) -> Result<()> {
    fs::remove_file(path)
        .await
        .with_context(|| format!("failed to delete file {}", path.display()))
}

/// Remove a directory and everything below it, returning how many regular
/// files were removed so the caller can account for them.
pub async fn remove_subtree(dir: &Path) -> Result<u64> {
    let files = count_files(dir).await?;
    fs::remove_dir_all(dir)
        .await
        .with_context(|| format!("failed to delete directory {}", dir.display()))?;
    Ok(files)
}

async fn count_files(dir: &Path) -> Result<u64> {
    let mut total = 0;

    let mut read_dir = fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read directory {}", dir.display()))?;

    while let Some(entry) = read_dir.next_entry().await? {
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            total += Box::pin(count_files(&entry.path())).await?;
        } else {
            total += 1;
        }
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn list_files_skips_directories() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let files = list_files(dir.path()).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "a.txt");
        assert_eq!(files[0].size, 5);
    }

    #[tokio::test]
    async fn list_dirs_skips_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let dirs = list_dirs(dir.path()).await.unwrap();
        assert_eq!(dirs, vec!["sub".to_string()]);
    }

    #[tokio::test]
    async fn remove_subtree_counts_nested_files() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("doomed");
        std::fs::create_dir_all(root.join("deep")).unwrap();
        std::fs::write(root.join("x.txt"), b"x").unwrap();
        std::fs::write(root.join("deep/y.txt"), b"y").unwrap();

        let removed = remove_subtree(&root).await.unwrap();
        assert_eq!(removed, 2);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn listing_a_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(list_files(&missing).await.is_err());
        assert!(list_dirs(&missing).await.is_err());
    }
}
