use std::path::PathBuf;

use clap::Parser;
use tracing::error;

mod config;
mod logger;

#[derive(Debug, Parser)]
#[command(about, author, version)]
struct Options {
    #[arg(long, env = "UNMASK_LOG_FORMAT", value_enum, default_value_t)]
    log_format: logger::LogFormat,

    #[arg(short = 'f', long = "config", env = "UNMASK_CONFIG_PATH")]
    config_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let options = Options::parse();

    config::init(options.config_path.as_deref());
    logger::init(options.log_format);

    // an invalid exclusion list must never let the server come up
    if let Err(err) = unmask_proxy::init() {
        error!(?err, "Invalid real IP configuration");
        std::process::exit(1);
    }

    if let Err(err) = unmask_proxy::start().await {
        error!(?err, "Server failed to start");
        std::process::exit(1);
    }
}
