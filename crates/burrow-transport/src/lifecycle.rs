//! Lifecycle state machine - boot, provision and launch the server process.
//!
//! ```text
//!  idle ──start()──▶ booting ──▶ mounting ──▶ [installing] ──▶ running
//!                       │          (files only; install only with a manifest)
//!                       └─────────────────────────────────────▶ running   (spawn)
//!
//!  running ──close()──▶ unmounting ──▶ teardowned ──▶ idle
//! ```
//!
//! Statuses only move forward within one cycle. The [`StatusTracker`] drops
//! any transition that would move backwards or repeat.

use crate::codec::FrameCodec;
use crate::error::{Result, TransportError};
use crate::options::{StatusCallback, TransportOptions};
use burrow_sandbox::{Environment, ProcessHandle, ProcessOutput, Runtime, SpawnSpec};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tokio_util::codec::FramedRead;

/// File whose presence in a file tree triggers the install step.
pub const PACKAGE_MANIFEST: &str = "package.json";

/// Checkpoint broadcast while a transport comes up or goes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    /// Environment is booting.
    Booting,
    /// Files are being written into the environment.
    Mounting,
    /// Manifest dependencies are being installed.
    Installing,
    /// The server process is running.
    Running,
    /// The server process is being stopped.
    Unmounting,
    /// The environment is gone.
    Teardowned,
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Booting => write!(f, "booting"),
            Self::Mounting => write!(f, "mounting"),
            Self::Installing => write!(f, "installing"),
            Self::Running => write!(f, "running"),
            Self::Unmounting => write!(f, "unmounting"),
            Self::Teardowned => write!(f, "teardowned"),
        }
    }
}

/// Records the current status of a cycle and notifies the observer.
pub(crate) struct StatusTracker {
    current: Option<LifecycleStatus>,
    callback: Option<StatusCallback>,
}

impl StatusTracker {
    pub(crate) fn new(callback: Option<StatusCallback>) -> Self {
        Self {
            current: None,
            callback,
        }
    }

    /// Current status; `None` while idle.
    pub(crate) fn current(&self) -> Option<LifecycleStatus> {
        self.current
    }

    /// Move to `next` if it lies ahead of the current status.
    pub(crate) fn advance(&mut self, next: LifecycleStatus) -> bool {
        if let Some(current) = self.current.filter(|current| next <= *current) {
            tracing::warn!(%current, %next, "Ignoring out-of-order status transition");
            return false;
        }
        self.current = Some(next);
        tracing::info!(status = %next, "Lifecycle status changed");
        if let Some(callback) = &self.callback {
            callback(next);
        }
        true
    }

    /// Return to idle, starting a new cycle.
    pub(crate) fn reset(&mut self) {
        self.current = None;
    }
}

/// Environment and server process produced by a successful start.
pub(crate) struct Provisioned {
    pub(crate) environment: Box<dyn Environment>,
    pub(crate) process: ProcessHandle,
}

/// Boot an environment and launch the server process in it.
///
/// If anything fails after boot, the environment is torn down before the
/// error is returned.
pub(crate) async fn provision(
    runtime: &dyn Runtime,
    options: &TransportOptions,
    status: &mut StatusTracker,
    max_frame_bytes: usize,
) -> Result<Provisioned> {
    let start = Instant::now();

    status.advance(LifecycleStatus::Booting);
    let environment = runtime
        .boot(options.boot_options())
        .await
        .map_err(TransportError::Boot)?;
    tracing::debug!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Environment booted"
    );

    match launch(environment.as_ref(), options, status, max_frame_bytes).await {
        Ok(process) => {
            tracing::info!(
                command = %process.command(),
                pid = ?process.pid(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Server process running"
            );
            Ok(Provisioned {
                environment,
                process,
            })
        }
        Err(e) => {
            tracing::error!(error = %e, "Provisioning failed, tearing down environment");
            if let Err(teardown) = environment.teardown().await {
                tracing::warn!(error = %teardown, "Failed to tear down environment");
            }
            Err(e)
        }
    }
}

async fn launch(
    environment: &dyn Environment,
    options: &TransportOptions,
    status: &mut StatusTracker,
    max_frame_bytes: usize,
) -> Result<ProcessHandle> {
    let spec = match options {
        TransportOptions::Files(files) => {
            status.advance(LifecycleStatus::Mounting);
            environment
                .mount(&files.files)
                .await
                .map_err(TransportError::Mount)?;
            tracing::debug!(count = files.files.len(), "Files mounted");

            if files.files.contains_key(PACKAGE_MANIFEST) {
                status.advance(LifecycleStatus::Installing);
                install(environment, max_frame_bytes).await?;
            }
            environment.entrypoint_command(&files.entrypoint)
        }
        TransportOptions::Spawn(spawn) => SpawnSpec::new(spawn.command.clone())
            .args(spawn.args.iter().cloned())
            .envs(spawn.env.clone()),
    };

    let process = environment
        .spawn(&spec)
        .await
        .map_err(TransportError::Spawn)?;
    status.advance(LifecycleStatus::Running);
    Ok(process)
}

/// Run the environment's install command to completion.
///
/// The exit code is logged but never fails the start.
async fn install(environment: &dyn Environment, max_frame_bytes: usize) -> Result<()> {
    let spec = environment.install_command();
    tracing::info!(command = %spec.command, args = ?spec.args, "Installing dependencies");
    let start = Instant::now();

    let process = environment
        .spawn(&spec)
        .await
        .map_err(TransportError::Install)?;
    if let Some(output) = process.take_output() {
        tokio::spawn(log_install_output(output, max_frame_bytes));
    }

    match process.wait().await {
        Ok(0) => tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Dependencies installed"
        ),
        Ok(code) => tracing::warn!(exit_code = code, "Install exited with non-zero status"),
        Err(e) => tracing::warn!(error = %e, "Install exit status unavailable"),
    }
    Ok(())
}

async fn log_install_output(output: ProcessOutput, max_frame_bytes: usize) {
    let mut lines = FramedRead::new(output, FrameCodec::with_max_frame_bytes(max_frame_bytes));
    while let Some(Ok(line)) = lines.next().await {
        tracing::debug!(line = %line, "install");
    }
}
