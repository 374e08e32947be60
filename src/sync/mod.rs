//! Synchronization engine.
//!
//! One-way mirroring of a source tree into a replica tree: a recursive
//! copy/update pass followed by an orphan-deletion pass, with bounded
//! per-directory transfer concurrency, transient-error retry, and
//! concurrency-safe result accounting.

pub mod engine;
pub mod pruner;
pub mod retry;
pub mod stats;
pub mod walker;

pub use engine::SyncEngine;
pub use pruner::ReplicaPruner;
pub use retry::{Cancelled, RetryPolicy};
pub use stats::{SyncReport, SyncStats};
pub use walker::TreeSynchronizer;
