//! Error types for warmtex.

use std::path::PathBuf;
use std::time::Duration;

use crate::engine::EngineFault;

/// Errors surfaced by the library.
#[derive(thiserror::Error, Debug)]
pub enum WarmtexError {
    /// Config file exists but could not be parsed.
    #[error("invalid config {path}: {message}")]
    Config { path: PathBuf, message: String },

    /// The engine binary could not be found on PATH.
    #[error("engine `{0}` not found in PATH")]
    EngineNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No server is listening on the control port.
    #[error("no server listening on {0}")]
    Unreachable(String),

    /// Malformed HTTP traffic on the control plane.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server answered the compile request with 400.
    #[error("server rejected the request (expected exactly one source file argument)")]
    BadRequest,

    /// Response body ended without the status trailer.
    #[error("failed to receive the exit status")]
    MissingStatus,

    #[error("server did not acknowledge launch within {0:?}")]
    LaunchTimeout(Duration),

    #[error("server exited before acknowledging launch ({0})")]
    LaunchExited(String),

    #[error(transparent)]
    Engine(#[from] EngineFault),
}

/// A specialized Result type for warmtex operations.
pub type Result<T> = std::result::Result<T, WarmtexError>;
