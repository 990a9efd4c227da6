//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// TcpMux - multiplexed request/response over one TCP connection
#[derive(Parser)]
#[command(
    name = "tm",
    about = "Correlated request/response multiplexing over a shared TCP connection",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/tcpmux/logs/tcpmux.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run the echo server until interrupted
    Serve,

    /// Send one request to a running server and print the result
    Call {
        /// Request payload; the leading characters are the correlation key
        payload: String,

        /// Reply timeout override in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },

    /// Run server and client in one process and fire concurrent calls
    Demo {
        /// Number of concurrent calls
        #[arg(short = 'n', long, default_value = "100")]
        count: usize,
    },
}
