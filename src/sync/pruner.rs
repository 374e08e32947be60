//! Delete pass: removes replica entries with no source counterpart.
//!
//! Runs strictly after the copy pass has finished for the whole tree, so a
//! file moved between source subdirectories mid-cycle is confirmed at its
//! new location before the stale copy is removed from the old one.
//!
//! Name comparison is case-insensitive for both files and directories,
//! regardless of what the host filesystem does. This is a deliberate
//! simplification, not filesystem detection.

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::fs::local;
use crate::sync::retry::{is_cancelled, Cancelled, RetryPolicy};
use crate::sync::stats::SyncStats;

pub struct ReplicaPruner {
    retry: RetryPolicy,
}

impl ReplicaPruner {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Recursively delete everything under `replica_dir` that has no
    /// corresponding entry under `source_dir`.
    ///
    /// A missing replica directory is a no-op. Deletion failures are
    /// absorbed into the error counter and the sweep continues; the only
    /// error this returns is [`Cancelled`].
    pub async fn prune_tree(
        &self,
        source_dir: &Path,
        replica_dir: &Path,
        stats: &Arc<SyncStats>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Cancelled.into());
        }

        match tokio::fs::metadata(replica_dir).await {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                warn!(
                    dir = %replica_dir.display(),
                    error = %err,
                    "failed to stat replica directory"
                );
                stats.record_error();
                return Ok(());
            }
        }

        // If the source side cannot be listed, skip this directory rather
        // than treating it as empty and sweeping the whole replica away.
        let source_files: HashSet<String> = match local::list_files(source_dir).await {
            Ok(files) => files.into_iter().map(|e| e.name.to_lowercase()).collect(),
            Err(err) => {
                warn!(
                    dir = %source_dir.display(),
                    error = %format!("{err:#}"),
                    "failed to list source files, skipping prune here"
                );
                stats.record_error();
                return Ok(());
            }
        };

        let replica_files = match local::list_files(replica_dir).await {
            Ok(files) => files,
            Err(err) => {
                warn!(
                    dir = %replica_dir.display(),
                    error = %format!("{err:#}"),
                    "failed to list replica files"
                );
                stats.record_error();
                return Ok(());
            }
        };

        for entry in replica_files {
            if cancel.is_cancelled() {
                return Err(Cancelled.into());
            }
            if source_files.contains(&entry.name.to_lowercase()) {
                continue;
            }
            let path = replica_dir.join(&entry.name);
            let target = path.as_path();
            match self
                .retry
                .run(cancel, move || local::delete_file(target))
                .await
            {
                Ok(()) => {
                    stats.record_delete();
                    debug!(file = %path.display(), "deleted orphan file");
                }
                Err(err) if is_cancelled(&err) => return Err(err),
                Err(err) => {
                    warn!(
                        file = %path.display(),
                        error = %format!("{err:#}"),
                        "failed to delete orphan file"
                    );
                    stats.record_error();
                }
            }
        }

        // Lowercase name -> actual source name, so recursion lists the
        // source directory under its real casing.
        let source_dirs: HashMap<String, String> = match local::list_dirs(source_dir).await {
            Ok(dirs) => dirs
                .into_iter()
                .map(|name| (name.to_lowercase(), name))
                .collect(),
            Err(err) => {
                warn!(
                    dir = %source_dir.display(),
                    error = %format!("{err:#}"),
                    "failed to list source subdirectories, skipping prune here"
                );
                stats.record_error();
                return Ok(());
            }
        };

        let replica_dirs = match local::list_dirs(replica_dir).await {
            Ok(dirs) => dirs,
            Err(err) => {
                warn!(
                    dir = %replica_dir.display(),
                    error = %format!("{err:#}"),
                    "failed to list replica subdirectories"
                );
                stats.record_error();
                return Ok(());
            }
        };

        for name in replica_dirs {
            if cancel.is_cancelled() {
                return Err(Cancelled.into());
            }
            match source_dirs.get(&name.to_lowercase()) {
                Some(source_name) => {
                    let source_sub = source_dir.join(source_name);
                    let replica_sub = replica_dir.join(&name);
                    Box::pin(self.prune_tree(&source_sub, &replica_sub, stats, cancel)).await?;
                }
                None => {
                    let path = replica_dir.join(&name);
                    let target = path.as_path();
                    match self
                        .retry
                        .run(cancel, move || local::remove_subtree(target))
                        .await
                    {
                        Ok(removed) => {
                            stats.record_deletes(removed);
                            debug!(
                                dir = %path.display(),
                                files = removed,
                                "deleted orphan directory"
                            );
                        }
                        Err(err) if is_cancelled(&err) => return Err(err),
                        Err(err) => {
                            warn!(
                                dir = %path.display(),
                                error = %format!("{err:#}"),
                                "failed to delete orphan directory"
                            );
                            stats.record_error();
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
