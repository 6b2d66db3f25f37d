use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};

mod cli;
mod controller;
mod logging;
mod worker;

use crate::cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logging starts before the config is read so that loading is traced too
    let logs = logging::init(args.log_level.as_deref().unwrap_or(logging::DEFAULT_LEVEL));

    match args.command {
        Command::Parent { timeout_ms, config } => {
            let config = controller::load_config(config.as_deref(), timeout_ms)?;
            let log_level =
                logging::effective_level(args.log_level.as_deref(), config.log_level.as_deref());
            logs.set_level(&log_level);
            debug!("Resolved configuration: {:?}", config);
            info!("Starting controller (default timeout {:?}ms)", config.default_timeout_millis);
            controller::run(config, &log_level).await
        }
        Command::Child => worker::run().await,
    }
}
