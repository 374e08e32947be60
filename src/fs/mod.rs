pub mod copy;
pub mod local;
pub mod types;

pub use types::FileEntry;
