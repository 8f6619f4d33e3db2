use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod logger;

pub const DEFAULT_FILENAMES: [&str; 2] = ["ensemble.toml", ".ensemble.toml"];

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = config::Cli::parse();

    let result = match cli.command {
        config::Commands::Run {
            file,
            kill_timeout,
            services,
        } => commands::run(file, services, kill_timeout).await,
        config::Commands::Check { file } => commands::check(file),
    };

    result.unwrap_or_else(|err| {
        logger::Logger::default().error(&format!("{err:#}"));
        ExitCode::FAILURE
    })
}
