// src/cli.rs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "support-chat-router",
    version,
    about = "Chat request router for the student support portal",
    long_about = "Routes student chat messages to an upstream LLM with key and model failover, \
                  screens every message for crisis language first, and caches replies."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// Server port, overriding the configuration
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Default log filter when RUST_LOG is unset
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "SUPPORT_CHAT_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Load and validate a configuration file, then exit
    CheckConfig {
        /// Configuration file to validate
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
