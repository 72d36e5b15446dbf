//! Local runtime - environments backed by a host working directory.
//!
//! Each booted environment owns `<base_dir>/<uuid>`. Mounted files are written
//! below that directory and processes run with it as their working directory.
//! Teardown removes the directory.

use crate::config::LocalRuntimeConfig;
use crate::error::{Result, SandboxError};
use crate::process::ProcessHandle;
use crate::runtime::{BootOptions, Environment, FileTree, Runtime, SpawnSpec};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{oneshot, watch};
use uuid::Uuid;

/// Runtime that boots environments as directories on the host.
#[derive(Debug, Clone, Default)]
pub struct LocalRuntime {
    config: LocalRuntimeConfig,
}

impl LocalRuntime {
    /// Create a runtime with the given configuration.
    pub fn new(config: LocalRuntimeConfig) -> Self {
        Self { config }
    }

    /// Get the runtime configuration.
    pub fn config(&self) -> &LocalRuntimeConfig {
        &self.config
    }
}

#[async_trait]
impl Runtime for LocalRuntime {
    async fn boot(&self, options: &BootOptions) -> Result<Box<dyn Environment>> {
        self.config.validate()?;

        let id = Uuid::new_v4();
        let root = self.config.base_dir.join(id.to_string());
        tracing::info!(%id, root = %root.display(), "Booting local environment");
        tracing::trace!(%id, options = ?options, "Boot options");

        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            tracing::error!(%id, error = %e, "Failed to create environment directory");
            SandboxError::Boot(format!("failed to create {}: {e}", root.display()))
        })?;

        Ok(Box::new(LocalEnvironment {
            id,
            root,
            config: self.config.clone(),
            torn_down: AtomicBool::new(false),
        }))
    }
}

/// An environment rooted at a host directory.
#[derive(Debug)]
pub struct LocalEnvironment {
    id: Uuid,
    root: PathBuf,
    config: LocalRuntimeConfig,
    torn_down: AtomicBool,
}

impl LocalEnvironment {
    /// Unique identifier of this environment.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Working directory of this environment.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Environment for LocalEnvironment {
    async fn mount(&self, files: &FileTree) -> Result<()> {
        tracing::debug!(id = %self.id, count = files.len(), "Mounting files");

        for (path, content) in files {
            let target = resolve(&self.root, path)?;
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    SandboxError::Mount(format!("failed to create directories for '{path}': {e}"))
                })?;
            }
            tokio::fs::write(&target, content)
                .await
                .map_err(|e| SandboxError::Mount(format!("failed to write '{path}': {e}")))?;
            tracing::trace!(id = %self.id, path = %path, size = content.len(), "File mounted");
        }
        Ok(())
    }

    async fn spawn(&self, spec: &SpawnSpec) -> Result<ProcessHandle> {
        tracing::debug!(
            id = %self.id,
            command = %spec.command,
            args = ?spec.args,
            "Spawning process"
        );

        let mut child = Command::new(&spec.command)
            .args(&spec.args)
            .envs(&spec.env)
            .current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Spawn {
                command: spec.command.clone(),
                reason: e.to_string(),
            })?;

        let missing = |stream: &str| SandboxError::Spawn {
            command: spec.command.clone(),
            reason: format!("{stream} was not captured"),
        };
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(spec.command.clone(), stderr));
        }

        let pid = child.id();
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(supervise(spec.command.clone(), child, exit_tx, kill_rx));

        tracing::info!(id = %self.id, command = %spec.command, pid = ?pid, "Process spawned");
        Ok(ProcessHandle::new(spec.command.clone(), stdout, stdin, exit_rx)
            .with_pid(pid)
            .with_kill(kill_tx))
    }

    async fn teardown(&self) -> Result<()> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            tracing::trace!(id = %self.id, "Environment already torn down");
            return Ok(());
        }

        tracing::info!(id = %self.id, root = %self.root.display(), "Tearing down environment");
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SandboxError::Teardown(format!(
                "failed to remove {}: {e}",
                self.root.display()
            ))),
        }
    }

    fn install_command(&self) -> SpawnSpec {
        let mut parts = self.config.install_command.iter();
        let command = parts.next().cloned().unwrap_or_default();
        SpawnSpec::new(command).args(parts.cloned())
    }

    fn entrypoint_command(&self, entrypoint: &str) -> SpawnSpec {
        SpawnSpec::new(self.config.entry_program.clone()).arg(entrypoint)
    }
}

/// Resolve a file-tree path below `root`, refusing anything that escapes it.
fn resolve(root: &Path, path: &str) -> Result<PathBuf> {
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SandboxError::InvalidPath(PathBuf::from(path)));
            }
        }
    }
    if depth == 0 {
        return Err(SandboxError::InvalidPath(PathBuf::from(path)));
    }
    Ok(resolved)
}

/// Wait for the child to exit, killing it first if asked to.
///
/// Dropping the kill switch counts as a kill request.
async fn supervise(
    command: String,
    mut child: Child,
    exit: watch::Sender<Option<i32>>,
    kill: oneshot::Receiver<()>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            tracing::debug!(command = %command, "Killing process");
            if let Err(e) = child.start_kill() {
                tracing::debug!(command = %command, error = %e, "Kill failed");
            }
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => status.code().unwrap_or(-1),
        Err(e) => {
            tracing::warn!(command = %command, error = %e, "Failed to wait for process");
            -1
        }
    };
    tracing::debug!(command = %command, exit_code = code, "Process exited");
    exit.send_replace(Some(code));
}

async fn drain_stderr(command: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).split(b'\n');
    while let Ok(Some(line)) = lines.next_segment().await {
        let line = String::from_utf8_lossy(&line);
        tracing::debug!(command = %command, line = %line.trim_end(), "stderr");
    }
}
