//! Streaming file copy with timestamp preservation.
//!
//! The destination is written in place (create-or-truncate, pre-sized to
//! the source length). A failed copy may leave it partially written;
//! callers that need atomic replacement must layer a temp-file-plus-rename
//! on top. After the bytes land, the source's modification time is applied
//! to the destination so the replica compares equal on the next cycle.

use anyhow::{Context, Result};
use filetime::FileTime;
use std::path::Path;
use std::time::SystemTime;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::sync::retry::Cancelled;

/// Pick a transfer buffer size scaled to the file: small files do not pay
/// for a large allocation, large files amortize syscalls over bigger reads.
fn buffer_size(len: u64) -> usize {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    if len < 8 * MIB {
        (64 * KIB) as usize
    } else if len < 256 * MIB {
        (256 * KIB) as usize
    } else {
        MIB as usize
    }
}

/// Copy `src` to `dst`, creating or truncating the destination, and return
/// the number of bytes written.
///
/// Cancellation is checked between chunks and surfaces as [`Cancelled`],
/// not as an I/O failure.
pub async fn copy_file(src: &Path, dst: &Path, cancel: &CancellationToken) -> Result<u64> {
    if cancel.is_cancelled() {
        return Err(Cancelled.into());
    }

    let mut reader = File::open(src)
        .await
        .with_context(|| format!("failed to open {}", src.display()))?;
    let metadata = reader
        .metadata()
        .await
        .with_context(|| format!("failed to stat {}", src.display()))?;
    let len = metadata.len();

    let mut writer = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dst)
        .await
        .with_context(|| format!("failed to create {}", dst.display()))?;

    // Pre-size to the known length so the filesystem can allocate extents
    // up front instead of growing the file chunk by chunk.
    writer
        .set_len(len)
        .await
        .with_context(|| format!("failed to pre-size {}", dst.display()))?;

    let mut buf = vec![0u8; buffer_size(len)];
    let mut copied: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(Cancelled.into());
        }
        let n = reader
            .read(&mut buf)
            .await
            .with_context(|| format!("failed to read {}", src.display()))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .await
            .with_context(|| format!("failed to write {}", dst.display()))?;
        copied += n as u64;
    }

    // The source may have shrunk between stat and read; trim the pre-sized
    // tail so the destination matches what was actually streamed.
    if copied != len {
        writer
            .set_len(copied)
            .await
            .with_context(|| format!("failed to trim {}", dst.display()))?;
    }

    writer
        .flush()
        .await
        .with_context(|| format!("failed to flush {}", dst.display()))?;
    drop(writer);

    // Timestamps go on after the handle is closed so the writes above do
    // not bump the mtime we just set.
    let mtime = FileTime::from_system_time(
        metadata
            .modified()
            .with_context(|| format!("failed to read mtime of {}", src.display()))?,
    );
    let atime = FileTime::from_system_time(metadata.accessed().unwrap_or_else(|_| SystemTime::now()));
    filetime::set_file_times(dst, atime, mtime)
        .with_context(|| format!("failed to set timestamps on {}", dst.display()))?;

    Ok(copied)
}
