#![cfg(not(tarpaulin_include))]

use clap::Parser;
use tracker::app;
use tracker::config::ServerConfig;
use tracker::logging;

/// Main entry point for the tracker API server
///
/// Reads the configuration from flags and `TRACKER_*` environment variables,
/// installs logging and serves the REST API until the process is stopped.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    logging::init(false);

    app::run(config).await
}
