//! Logging setup
//!
//! Structured logging via `tracing`. The dispatcher emits one record per
//! operation (name, path, result code) at debug level; this module only
//! wires the subscriber. Logging never feeds errors back into the call
//! path; a failed write to the log file is the log's problem, not the
//! caller's.

use std::io;
use std::path::Path;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over `level` when set;
/// with a file the output drops ANSI escapes.
pub fn init(level: &str, log_file: Option<&Path>) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .init();
        }
    }
    Ok(())
}
