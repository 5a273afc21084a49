//! # dynasession-cli
//!
//! Maintenance commands for a DynamoDB-backed session table.
//!
//! - `dynasession gc` - delete expired sessions, typically from a scheduled job
//! - `dynasession show <id>` - inspect a session's lock and timestamps
//! - `dynasession delete <id>` - remove a session
//!
//! Settings come from `--config <file.toml>` and `DYNAMO_DB_SESSION_*`
//! environment variables, the latter taking precedence.

pub mod cli;
pub mod commands;
pub mod config;

pub use cli::{Cli, Commands};
pub use commands::run;
pub use config::load_config;
