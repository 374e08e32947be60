use anyhow::Result;
use clap::Parser;
use humansize::{format_size, DECIMAL};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use replisync::cli::{self, Args};
use replisync::sync::retry::is_cancelled;
use replisync::sync::SyncEngine;

fn init_logging(verbosity: u8) {
    let default = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let (source, replica) = cli::validate(&args)?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    let engine = SyncEngine::new();

    // First tick fires immediately; a cycle running long delays the next
    // tick instead of letting runs pile up on the same pair.
    let mut ticker = interval(Duration::from_secs(args.interval.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        source = %source.display(),
        replica = %replica.display(),
        interval_secs = args.interval,
        "mirroring started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => break,
        }

        match engine.run(&source, &replica, &cancel).await {
            Ok(report) => info!(
                copied = report.files_copied,
                updated = report.files_updated,
                deleted = report.files_deleted,
                transferred = %format_size(report.bytes_transferred, DECIMAL),
                errors = report.errors,
                "cycle finished"
            ),
            Err(err) if is_cancelled(&err) => break,
            Err(err) => warn!(
                error = %format!("{err:#}"),
                "cycle failed, retrying on the next tick"
            ),
        }
    }

    info!("mirroring stopped");
    Ok(())
}
