use clap::{Parser, Subcommand};

/// CLI for ensemble
#[derive(Parser, Debug)]
#[command(
    name = "ensemble",
    version,
    about = "Starts, supervises and stops a set of local services"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the project and supervise it until interrupted
    Run {
        /// File path to the configuration file (TOML)
        #[arg(short, long, env = "ENSEMBLE_CONFIG")]
        file: Option<String>,

        /// Seconds a service gets to exit after SIGTERM before it is killed
        #[arg(long, env = "ENSEMBLE_KILL_TIMEOUT")]
        kill_timeout: Option<u64>,

        /// Services to start, together with their dependencies (default: all)
        services: Vec<String>,
    },
    /// Validate the configuration file and print the startup order
    Check {
        /// File path to the configuration file (TOML)
        #[arg(short, long, env = "ENSEMBLE_CONFIG")]
        file: Option<String>,
    },
}
