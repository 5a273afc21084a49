//! # dynasession telemetry
//!
//! Structured logging for session stores using `tracing`.
//!
//! ## Usage
//!
//! ```rust
//! use dynasession_telemetry::{init_telemetry, info, session_load_span};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_telemetry("session-gc")?;
//!
//!     let span = session_load_span("0f3a9c", true);
//!     let _enter = span.enter();
//!     info!("loading session");
//!     Ok(())
//! }
//! ```

pub mod init;
pub mod spans;

// Re-export tracing macros for convenience
pub use tracing::{Span, debug, error, info, instrument, trace, warn};

pub use init::{init_json_telemetry, init_telemetry};
pub use spans::*;
