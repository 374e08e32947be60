//! Command-line interface and pre-cycle validation.

use anyhow::{ensure, Context, Result};
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "replisync",
    about = "Periodically mirrors a source directory into a replica"
)]
pub struct Args {
    /// Directory treated as ground truth.
    pub source: PathBuf,

    /// Directory kept convergent with the source.
    pub replica: PathBuf,

    /// Seconds between sync cycles.
    #[arg(long, default_value_t = 30)]
    pub interval: u64,

    /// Increase log verbosity (-v: debug, -vv: trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Normalize and validate the pair once, before the first cycle: the
/// source must be an existing directory, the two paths must be distinct,
/// and neither may contain the other. The replica root is created if
/// absent. The engine itself never re-checks any of this.
pub fn validate(args: &Args) -> Result<(PathBuf, PathBuf)> {
    let source = args.source.canonicalize().with_context(|| {
        format!(
            "source directory {} does not exist",
            args.source.display()
        )
    })?;
    ensure!(
        source.is_dir(),
        "source path {} is not a directory",
        source.display()
    );

    std::fs::create_dir_all(&args.replica).with_context(|| {
        format!(
            "failed to create replica directory {}",
            args.replica.display()
        )
    })?;
    let replica = args.replica.canonicalize().with_context(|| {
        format!(
            "replica directory {} is not accessible",
            args.replica.display()
        )
    })?;

    ensure!(
        source != replica,
        "source and replica must be different directories"
    );
    ensure!(
        !replica.starts_with(&source) && !source.starts_with(&replica),
        "source and replica must not contain each other"
    );

    Ok((source, replica))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn args(source: PathBuf, replica: PathBuf) -> Args {
        Args {
            source,
            replica,
            interval: 30,
            verbose: 0,
        }
    }

    #[test]
    fn valid_pair_is_normalized_and_replica_created() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        let replica = dir.path().join("dst");
        std::fs::create_dir(&source).unwrap();

        let (s, r) = validate(&args(source, replica.clone())).unwrap();
        assert!(s.is_dir());
        assert!(replica.is_dir());
        assert_ne!(s, r);
    }

    #[test]
    fn missing_source_is_rejected() {
        let dir = tempdir().unwrap();
        let result = validate(&args(dir.path().join("ghost"), dir.path().join("dst")));
        assert!(result.is_err());
    }

    #[test]
    fn identical_paths_are_rejected() {
        let dir = tempdir().unwrap();
        let result = validate(&args(dir.path().to_path_buf(), dir.path().to_path_buf()));
        assert!(result.is_err());
    }

    #[test]
    fn replica_inside_source_is_rejected() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        std::fs::create_dir(&source).unwrap();
        let result = validate(&args(source.clone(), source.join("nested")));
        assert!(result.is_err());
    }

    #[test]
    fn source_inside_replica_is_rejected() {
        let dir = tempdir().unwrap();
        let replica = dir.path().join("dst");
        let source = replica.join("nested");
        std::fs::create_dir_all(&source).unwrap();
        let result = validate(&args(source, replica));
        assert!(result.is_err());
    }
}
