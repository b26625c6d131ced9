//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Fusebox - circuit breaker gateway for flaky downstream dependencies
#[derive(Parser, Debug)]
#[command(name = "fusebox")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "FUSEBOX_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "FUSEBOX_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "FUSEBOX_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "FUSEBOX_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "FUSEBOX_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Validate the configuration and print the breaker table
    Check,
}
