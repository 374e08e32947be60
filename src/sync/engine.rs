//! One full mirroring cycle: copy/update pass, then prune pass.

use anyhow::{ensure, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::sync::pruner::ReplicaPruner;
use crate::sync::retry::RetryPolicy;
use crate::sync::stats::{SyncReport, SyncStats};
use crate::sync::walker::TreeSynchronizer;

pub struct SyncEngine {
    walker: TreeSynchronizer,
    pruner: ReplicaPruner,
}

impl SyncEngine {
    /// Engine with the default retry policy and a transfer fan-out bounded
    /// by the host's logical CPU count.
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default(), num_cpus::get())
    }

    pub fn with_policy(retry: RetryPolicy, max_transfers: usize) -> Self {
        Self {
            walker: TreeSynchronizer::new(retry, max_transfers),
            pruner: ReplicaPruner::new(retry),
        }
    }

    /// Run one cycle against a validated (source, replica) pair.
    ///
    /// The copy/update pass for the entire tree finishes before any
    /// deletion begins, so a file moved within the source mid-cycle is
    /// never dropped from its old replica location before landing at its
    /// new one. Per-file and per-directory failures are absorbed into the
    /// error counter; only cancellation or a failure with no containing
    /// scope, such as the source root itself being unreadable, propagates.
    pub async fn run(
        &self,
        source: &Path,
        replica: &Path,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let meta = tokio::fs::metadata(source)
            .await
            .with_context(|| format!("source directory {} is not accessible", source.display()))?;
        ensure!(
            meta.is_dir(),
            "source path {} is not a directory",
            source.display()
        );

        info!(
            source = %source.display(),
            replica = %replica.display(),
            "starting sync cycle"
        );

        let stats = Arc::new(SyncStats::new());
        self.walker.sync_tree(source, replica, &stats, cancel).await?;
        self.pruner.prune_tree(source, replica, &stats, cancel).await?;

        Ok(stats.snapshot())
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}
