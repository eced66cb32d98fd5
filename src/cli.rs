use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Option-chain capture daemon: polls the exchange's option chain on a daily
/// schedule and records the configured strikes to SQLite, xlsx and Google Sheets.
#[derive(Parser)]
#[command(name = "optchain-capture", version, about)]
pub struct Cli {
    /// Path to the capture config JSON file
    #[arg(long, global = true, env = "OPTCHAIN_CONFIG", default_value = "capture.json")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the capture daemon on the configured daily schedule
    Run {
        /// Capture once immediately at startup, then follow the schedule
        #[arg(long, short = 'i')]
        init: bool,

        /// Like --init, but accept the current snapshot however old it is
        #[arg(long, conflicts_with = "init")]
        init_now: bool,
    },

    /// Run a single capture cycle and exit (for use from cron)
    Once {
        /// Accept the current snapshot however old it is
        #[arg(long)]
        force: bool,
    },

    /// Start the HTTP control API that starts/stops the daemon
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(long, default_value = "5000")]
        port: u16,

        /// PID file for the managed daemon (default: ~/.optchain-capture/capture.pid)
        #[arg(long)]
        pid_file: Option<PathBuf>,
    },
}
