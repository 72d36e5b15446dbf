//! Error types for burrow-sandbox.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for burrow-sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors that can occur while driving a sandbox environment.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Failed to boot the environment
    #[error("failed to boot environment: {0}")]
    Boot(String),

    /// Failed to mount files into the environment
    #[error("failed to mount files: {0}")]
    Mount(String),

    /// Failed to spawn a process inside the environment
    #[error("failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    /// Failed to tear the environment down
    #[error("failed to tear down environment: {0}")]
    Teardown(String),

    /// A mounted path escapes the environment root
    #[error("invalid path in file tree: {0}")]
    InvalidPath(PathBuf),

    /// The process is gone (already exited, or its exit was never reported)
    #[error("process has exited")]
    Exited,
}
