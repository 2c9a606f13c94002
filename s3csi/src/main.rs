use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use s3csi::config::Args;
use s3csi::metrics::{self, Metrics};
use s3csi::s3::S3ClientFactory;
use s3csi::{S3Driver, logging};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(&args.log_file, &args.log_level, args.log_format)?;
    info!(version = env!("CARGO_PKG_VERSION"), "s3csi starting");

    let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);
    tokio::spawn(metrics::run(args.metrics_address, Arc::clone(&metrics)));

    let endpoint = args.endpoint()?;
    let descriptor = S3Driver::setup(&args.driver_name, env!("CARGO_PKG_VERSION"), &args.node_id)?;
    let driver = S3Driver::new(descriptor, Arc::new(S3ClientFactory)).with_observer(metrics);
    let handle = driver
        .start(&endpoint)
        .await
        .with_context(|| format!("failed to serve on {endpoint}"))?;

    let shutdown = handle.shutdown_token();
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received interrupt"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
        shutdown.cancel();
    });

    if let Err(e) = handle.wait().await {
        error!(error = %e, "CSI host stopped");
        return Err(e.into());
    }
    info!("s3csi stopped");
    Ok(())
}
