use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use isolink::SupervisorConfig;

mod cli;
mod demo;
mod error;

use cli::{Cli, Commands};
use error::{CliResult, to_exit_code};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "isolink=debug"
    } else {
        "isolink=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    to_exit_code(run(cli))
}

fn run(cli: Cli) -> CliResult<()> {
    let file_config = match &cli.config {
        Some(path) => SupervisorConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => SupervisorConfig::default(),
    };

    match cli.command {
        Commands::Demo(args) => {
            let config = match args.timeout_ms {
                Some(ms) => SupervisorConfig::builder()
                    .thread_name_prefix(file_config.thread_name_prefix())
                    .handshake_timeout(Duration::from_millis(ms))
                    .build()?,
                None => file_config,
            };
            demo::execute(args, config)
        }
    }
}
