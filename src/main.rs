use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info};

mod config;
mod logger;
mod server;

use config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::read(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("fatal: {err}");
            return ExitCode::FAILURE;
        }
    };
    logger::init_logger(&config.control.log_level, config.control.log_format);

    info!("Starting riptide");
    if let Err(err) = server::run(config).await {
        error!(%err, "fatal");
        return ExitCode::FAILURE;
    }

    info!("Received exit signal. Terminating...");
    ExitCode::SUCCESS
}
