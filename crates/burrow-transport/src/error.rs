//! Error types for burrow-transport.

use burrow_sandbox::SandboxError;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for burrow-transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors surfaced by [`SandboxTransport`](crate::SandboxTransport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// `start()` was called while the transport is already started
    #[error("transport already started")]
    AlreadyStarted,

    /// An operation needed a running process and there is none
    #[error("transport not started")]
    NotStarted,

    /// Transport options are unusable
    #[error("invalid transport options: {0}")]
    Config(String),

    /// The sandbox environment failed to boot
    #[error("boot failed: {0}")]
    Boot(#[source] SandboxError),

    /// Mounting the file tree failed
    #[error("mount failed: {0}")]
    Mount(#[source] SandboxError),

    /// The dependency install command could not be started
    #[error("install failed: {0}")]
    Install(#[source] SandboxError),

    /// The server process could not be spawned
    #[error("spawn failed: {0}")]
    Spawn(#[source] SandboxError),

    /// Writing to the process input failed
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The peer answered a request with a JSON-RPC error
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// Error code from the peer
        code: i64,
        /// Error message from the peer
        message: String,
    },

    /// No response arrived in time
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The transport closed before a response arrived
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// True for failures raised while bringing the transport up.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Boot(_) | Self::Mount(_) | Self::Install(_) | Self::Spawn(_)
        )
    }
}
