//! Copy/update pass: makes every source file present and fresh in the
//! replica.
//!
//! One-way policy: the source is authoritative. A replica file that is
//! newer than its source counterpart (same size) is left untouched within
//! the cycle; it is only overwritten once the source's mtime moves past it
//! or the sizes diverge, and deleted once the source file disappears.
//!
//! File transfers within one directory run concurrently behind a semaphore;
//! recursion into subdirectories is sequential so a deep tree cannot fan
//! out into an unbounded number of open handles.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::fs::copy::copy_file;
use crate::fs::local;
use crate::fs::types::FileEntry;
use crate::sync::retry::{is_cancelled, Cancelled, RetryPolicy};
use crate::sync::stats::SyncStats;

/// How a stale file will be accounted. Captured before the transfer starts
/// so the classification holds even if the replica entry races away.
#[derive(Debug, Clone, Copy)]
enum Action {
    Copy,
    Update,
}

pub struct TreeSynchronizer {
    retry: RetryPolicy,
    transfer_slots: Arc<Semaphore>,
}

impl TreeSynchronizer {
    pub fn new(retry: RetryPolicy, max_transfers: usize) -> Self {
        Self {
            retry,
            transfer_slots: Arc::new(Semaphore::new(max_transfers.max(1))),
        }
    }

    /// Recursively ensure every regular file under `source_dir` exists
    /// under `replica_dir` with matching size and timestamps.
    ///
    /// Listing and per-file failures are absorbed into the error counter;
    /// the only error this returns is [`Cancelled`].
    pub async fn sync_tree(
        &self,
        source_dir: &Path,
        replica_dir: &Path,
        stats: &Arc<SyncStats>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Cancelled.into());
        }

        if let Err(err) = tokio::fs::create_dir_all(replica_dir).await {
            warn!(
                dir = %replica_dir.display(),
                error = %err,
                "failed to create replica directory"
            );
            stats.record_error();
            return Ok(());
        }

        let files = match local::list_files(source_dir).await {
            Ok(files) => files,
            Err(err) => {
                warn!(
                    dir = %source_dir.display(),
                    error = %format!("{err:#}"),
                    "failed to list source files"
                );
                stats.record_error();
                return Ok(());
            }
        };

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        let mut interrupted = false;

        for entry in files {
            // No new file work once cancellation is signalled; in-flight
            // transfers notice it on their next chunk.
            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }
            let replica_path = replica_dir.join(&entry.name);
            let action = match classify(&entry, &replica_path).await {
                Some(action) => action,
                None => continue,
            };

            let permit = tokio::select! {
                permit = self.transfer_slots.clone().acquire_owned() => permit?,
                _ = cancel.cancelled() => {
                    interrupted = true;
                    break;
                }
            };

            let source_path = source_dir.join(&entry.name);
            let stats = stats.clone();
            let cancel = cancel.clone();
            let retry = self.retry;
            tasks.spawn(async move {
                let _permit = permit;
                transfer_one(&source_path, &replica_path, action, retry, &stats, &cancel).await
            });
        }

        // Drain the fan-out before recursing; a failed sibling never
        // cancels the others, only cancellation does.
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) if is_cancelled(&err) => interrupted = true,
                Ok(Err(err)) => {
                    warn!(error = %format!("{err:#}"), "file task failed");
                    stats.record_error();
                }
                Err(join_err) => {
                    warn!(error = %join_err, "file task panicked");
                    stats.record_error();
                }
            }
        }
        if interrupted {
            return Err(Cancelled.into());
        }

        let subdirs = match local::list_dirs(source_dir).await {
            Ok(subdirs) => subdirs,
            Err(err) => {
                warn!(
                    dir = %source_dir.display(),
                    error = %format!("{err:#}"),
                    "failed to list source subdirectories"
                );
                stats.record_error();
                return Ok(());
            }
        };

        for name in subdirs {
            let source_sub = source_dir.join(&name);
            let replica_sub = replica_dir.join(&name);
            Box::pin(self.sync_tree(&source_sub, &replica_sub, stats, cancel)).await?;
        }

        Ok(())
    }
}

/// Decide whether a source file needs transferring, and as what.
///
/// Stale means: the replica copy is missing, its size differs, or its last
/// write time is strictly earlier than the source's. A replica copy newer
/// than the source is not stale; this sync never flows backward.
async fn classify(entry: &FileEntry, replica_path: &Path) -> Option<Action> {
    match tokio::fs::metadata(replica_path).await {
        Ok(meta) => {
            if meta.len() != entry.size {
                return Some(Action::Update);
            }
            let replica_mtime = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or(DateTime::UNIX_EPOCH);
            if replica_mtime < entry.modified {
                Some(Action::Update)
            } else {
                None
            }
        }
        Err(_) => Some(Action::Copy),
    }
}

/// Transfer one file under the retry policy. Non-cancellation failures are
/// absorbed into the error counter here, at file granularity.
async fn transfer_one(
    source_path: &Path,
    replica_path: &Path,
    action: Action,
    retry: RetryPolicy,
    stats: &SyncStats,
    cancel: &CancellationToken,
) -> Result<()> {
    match retry
        .run(cancel, move || copy_file(source_path, replica_path, cancel))
        .await
    {
        Ok(bytes) => {
            match action {
                Action::Copy => stats.record_copy(bytes),
                Action::Update => stats.record_update(bytes),
            }
            debug!(
                file = %replica_path.display(),
                bytes,
                action = ?action,
                "transferred"
            );
            Ok(())
        }
        Err(err) if is_cancelled(&err) => Err(err),
        Err(err) => {
            warn!(
                file = %source_path.display(),
                error = %format!("{err:#}"),
                "file transfer failed"
            );
            stats.record_error();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::tempdir;

    async fn entry_for(path: &Path) -> FileEntry {
        let dir = path.parent().unwrap();
        local::list_files(dir)
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.name == path.file_name().unwrap().to_string_lossy())
            .unwrap()
    }

    #[tokio::test]
    async fn missing_replica_classifies_as_copy() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"hello").unwrap();

        let entry = entry_for(&src).await;
        let action = classify(&entry, &dir.path().join("missing.txt")).await;
        assert!(matches!(action, Some(Action::Copy)));
    }

    #[tokio::test]
    async fn size_mismatch_classifies_as_update_even_when_replica_is_newer() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("b.txt");
        std::fs::write(&src, b"abcd").unwrap();
        std::fs::write(&dst, b"abcdef").unwrap();

        let entry = entry_for(&src).await;
        assert!(matches!(classify(&entry, &dst).await, Some(Action::Update)));
    }

    #[tokio::test]
    async fn newer_replica_with_equal_size_is_left_alone() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("b.txt");
        std::fs::write(&src, b"aaaa").unwrap();
        std::fs::write(&dst, b"bbbb").unwrap();

        let entry = entry_for(&src).await;
        let newer = FileTime::from_unix_time(entry.modified.timestamp() + 3600, 0);
        filetime::set_file_mtime(&dst, newer).unwrap();

        assert!(classify(&entry, &dst).await.is_none());
    }

    #[tokio::test]
    async fn older_replica_with_equal_size_is_stale() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("b.txt");
        std::fs::write(&src, b"aaaa").unwrap();
        std::fs::write(&dst, b"bbbb").unwrap();

        let entry = entry_for(&src).await;
        let older = FileTime::from_unix_time(entry.modified.timestamp() - 3600, 0);
        filetime::set_file_mtime(&dst, older).unwrap();

        assert!(matches!(classify(&entry, &dst).await, Some(Action::Update)));
    }
}
