use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dynasession")]
#[command(author, version, about = "Maintain a dynasession session table", long_about = None)]
pub struct Cli {
    /// TOML settings file; DYNAMO_DB_SESSION_* variables override it
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Delete expired sessions
    Gc {
        /// Delete sessions not updated for this many seconds
        #[arg(long)]
        max_age_secs: Option<u64>,

        /// Delete sessions created more than this many seconds ago
        #[arg(long)]
        max_stale_secs: Option<u64>,

        /// Keys per batch delete request (at most 25)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Print a session's lock state, timestamps and payload size
    Show {
        /// Session id
        id: String,
    },

    /// Remove a session
    Delete {
        /// Session id
        id: String,
    },
}
