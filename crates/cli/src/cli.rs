//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// NATS Relay - shard-fanout pub/sub message relay
#[derive(Parser, Debug)]
#[command(
    name = "nats-relay",
    author,
    version,
    about = "Pub/sub message relay with consistent-hash shard fanout",
    long_about = "Relays messages published on one or more source fabrics to a \n\
                  destination fabric. Each configured topic fans out across a pool \n\
                  of per-shard publish workers, with optional primary/secondary \n\
                  failover and load-aware routing."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "NATS_RELAY_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "NATS_RELAY_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (YAML, TOML or JSON)
    #[arg(short, long, default_value = "relay.yaml", env = "NATS_RELAY_CONFIG")]
    pub config: PathBuf,

    /// Override the primary source URL from configuration
    #[arg(long, env = "NATS_RELAY_PRIMARY")]
    pub primary: Option<String>,

    /// Override the secondary source URL from configuration
    #[arg(long, env = "NATS_RELAY_SECONDARY")]
    pub secondary: Option<String>,

    /// Override the destination URL from configuration
    #[arg(long, env = "NATS_RELAY_DESTINATION")]
    pub destination: Option<String>,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "9000", env = "NATS_RELAY_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "relay.yaml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "relay.yaml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}
