use chrono::{DateTime, Utc};

/// Metadata snapshot of one regular file, taken at listing time.
///
/// Entries are produced fresh on every listing and never cached across
/// cycles; the filesystem itself is the only state carried between runs.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    /// Last write time in UTC.
    pub modified: DateTime<Utc>,
    /// Creation time in UTC, where the platform reports one.
    pub created: Option<DateTime<Utc>>,
}
