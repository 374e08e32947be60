//! Concurrency-safe accounting for one sync cycle.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the in-flight file tasks of one engine run.
///
/// Each counter is its own atomic so the per-file fan-out never serializes
/// on a lock. An instance belongs to exactly one run and is discarded with
/// it; nothing carries over between cycles.
#[derive(Debug, Default)]
pub struct SyncStats {
    files_copied: AtomicU64,
    files_updated: AtomicU64,
    files_deleted: AtomicU64,
    bytes_transferred: AtomicU64,
    errors: AtomicU64,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A file that did not previously exist in the replica was transferred.
    pub fn record_copy(&self, bytes: u64) {
        self.files_copied.fetch_add(1, Ordering::Relaxed);
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    /// A stale replica file was overwritten.
    pub fn record_update(&self, bytes: u64) {
        self.files_updated.fetch_add(1, Ordering::Relaxed);
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.files_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Several files removed at once, e.g. an orphan directory subtree.
    pub fn record_deletes(&self, count: u64) {
        self.files_deleted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncReport {
        SyncReport {
            files_copied: self.files_copied.load(Ordering::Relaxed),
            files_updated: self.files_updated.load(Ordering::Relaxed),
            files_deleted: self.files_deleted.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Plain counters handed back to the scheduler at the end of a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub files_copied: u64,
    pub files_updated: u64,
    pub files_deleted: u64,
    pub bytes_transferred: u64,
    pub errors: u64,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counters_start_at_zero() {
        let report = SyncStats::new().snapshot();
        assert_eq!(report, SyncReport::default());
        assert!(report.is_clean());
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let stats = Arc::new(SyncStats::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let stats = stats.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    stats.record_copy(3);
                    stats.record_update(2);
                    stats.record_delete();
                    stats.record_error();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let report = stats.snapshot();
        assert_eq!(report.files_copied, 8_000);
        assert_eq!(report.files_updated, 8_000);
        assert_eq!(report.files_deleted, 8_000);
        assert_eq!(report.bytes_transferred, 8_000 * 5);
        assert_eq!(report.errors, 8_000);
        assert!(!report.is_clean());
    }
}
