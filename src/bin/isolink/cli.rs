use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "isolink")]
#[command(version)]
#[command(about = "Service connections between isolated execution contexts")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file (TOML)
    #[arg(short, long, global = true, env = "ISOLINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a supervisor with an echo service and a pipe broker, then drive
    /// it from a few client contexts
    Demo(DemoArgs),
}

#[derive(Args)]
pub struct DemoArgs {
    /// Number of client contexts talking to the echo service
    #[arg(long, default_value_t = 2)]
    pub clients: usize,

    /// Messages each client sends to the echo service
    #[arg(long, default_value_t = 3)]
    pub messages: usize,

    /// Handshake timeout in milliseconds, overriding the config file
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}
