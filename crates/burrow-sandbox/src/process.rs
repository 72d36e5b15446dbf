//! Process handle - a process spawned inside a sandbox environment.

use crate::error::{Result, SandboxError};
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, watch, Mutex};

/// Readable output stream of a sandboxed process.
pub type ProcessOutput = Pin<Box<dyn AsyncRead + Send>>;

/// Writable input stream of a sandboxed process.
pub type ProcessInput = Pin<Box<dyn AsyncWrite + Send>>;

/// A process running inside an [`Environment`](crate::Environment).
///
/// The handle owns three channels to the process:
/// - the output stream, which can be taken exactly once by a reader
/// - the input stream, shared behind an async mutex so each writer holds it
///   only for the duration of one write
/// - the exit signal, reported by the runtime once the process is gone
///
/// Runtimes that can terminate their processes attach a kill switch with
/// [`with_kill`](Self::with_kill).
pub struct ProcessHandle {
    command: String,
    pid: Option<u32>,
    output: StdMutex<Option<ProcessOutput>>,
    input: Arc<Mutex<ProcessInput>>,
    exit: watch::Receiver<Option<i32>>,
    kill: StdMutex<Option<oneshot::Sender<()>>>,
}

impl ProcessHandle {
    /// Assemble a handle from the process streams and its exit channel.
    ///
    /// The runtime publishes `Some(code)` on the exit channel once the
    /// process terminates.
    pub fn new(
        command: impl Into<String>,
        output: impl AsyncRead + Send + 'static,
        input: impl AsyncWrite + Send + 'static,
        exit: watch::Receiver<Option<i32>>,
    ) -> Self {
        Self {
            command: command.into(),
            pid: None,
            output: StdMutex::new(Some(Box::pin(output))),
            input: Arc::new(Mutex::new(Box::pin(input))),
            exit,
            kill: StdMutex::new(None),
        }
    }

    /// Record the OS process id, when the runtime has one.
    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    /// Attach a kill switch; the runtime terminates the process when it fires.
    pub fn with_kill(self, kill: oneshot::Sender<()>) -> Self {
        if let Ok(mut slot) = self.kill.lock() {
            *slot = Some(kill);
        }
        self
    }

    /// Command this process was spawned from.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// OS process id, if known.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take the output stream. Returns `None` once it has been taken.
    pub fn take_output(&self) -> Option<ProcessOutput> {
        self.output.lock().ok().and_then(|mut output| output.take())
    }

    /// Shared input stream. Lock it for one write, then release it.
    pub fn input(&self) -> Arc<Mutex<ProcessInput>> {
        Arc::clone(&self.input)
    }

    /// Exit code, if the process has already terminated.
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit.borrow()
    }

    /// Wait for the process to exit and return its exit code.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Exited`] if the runtime dropped the exit
    /// channel without reporting a code.
    pub async fn wait(&self) -> Result<i32> {
        let mut exit = self.exit.clone();
        let code = *exit
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SandboxError::Exited)?;
        code.ok_or(SandboxError::Exited)
    }

    /// Ask the runtime to terminate the process.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Exited`] if the process has no kill switch,
    /// was already killed, or its supervisor is gone.
    pub fn kill(&self) -> Result<()> {
        let kill = self.kill.lock().ok().and_then(|mut kill| kill.take());
        match kill {
            Some(kill) => kill.send(()).map_err(|_| SandboxError::Exited),
            None => Err(SandboxError::Exited),
        }
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("command", &self.command)
            .field("pid", &self.pid)
            .field("exit_code", &self.exit_code())
            .finish_non_exhaustive()
    }
}
