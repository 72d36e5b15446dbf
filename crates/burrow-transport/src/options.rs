//! Transport options and tunables.
//!
//! [`TransportOptions`] describes what to run: either a file tree with an
//! entrypoint, or a command to spawn directly. [`TransportConfig`] holds the
//! timing and size limits of the transport itself.

use crate::codec::DEFAULT_MAX_FRAME_BYTES;
use crate::error::TransportError;
use crate::lifecycle::LifecycleStatus;
use burrow_sandbox::{BootOptions, FileTree};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Entrypoint used when a file-based configuration names none.
pub const DEFAULT_ENTRYPOINT: &str = "index.js";

/// Wait between killing the server process and tearing the environment down.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_millis(1000);

/// Default time to wait for the response to a request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Observer for lifecycle status changes.
pub type StatusCallback = Arc<dyn Fn(LifecycleStatus) + Send + Sync>;

fn default_entrypoint() -> String {
    DEFAULT_ENTRYPOINT.to_string()
}

/// Mount a file tree and run its entrypoint.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesOptions {
    /// Relative path to file content.
    pub files: FileTree,
    /// File to launch (default: `index.js`).
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,
    /// Passed to the runtime's boot untouched.
    #[serde(default)]
    pub boot_options: BootOptions,
    #[serde(skip)]
    pub on_status_change: Option<StatusCallback>,
}

impl FilesOptions {
    /// Create options for the given files, launching `index.js`.
    pub fn new<I, K, V>(files: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            files: files
                .into_iter()
                .map(|(path, content)| (path.into(), content.into()))
                .collect(),
            entrypoint: default_entrypoint(),
            boot_options: BootOptions::default(),
            on_status_change: None,
        }
    }

    /// Set the entrypoint file.
    pub fn entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = entrypoint.into();
        self
    }

    /// Set the boot options.
    pub fn boot_options(mut self, options: BootOptions) -> Self {
        self.boot_options = options;
        self
    }

    /// Observe lifecycle status changes.
    pub fn on_status_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(LifecycleStatus) + Send + Sync + 'static,
    {
        self.on_status_change = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for FilesOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilesOptions")
            .field("files", &self.files.keys().collect::<Vec<_>>())
            .field("entrypoint", &self.entrypoint)
            .field("boot_options", &self.boot_options)
            .field("on_status_change", &self.on_status_change.is_some())
            .finish()
    }
}

/// Spawn a command directly, without mounting anything.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnOptions {
    /// Program to run.
    pub command: String,
    /// Arguments, in order.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Passed to the runtime's boot untouched.
    #[serde(default)]
    pub boot_options: BootOptions,
    #[serde(skip)]
    pub on_status_change: Option<StatusCallback>,
}

impl SpawnOptions {
    /// Create options that spawn `command` with no arguments.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            boot_options: BootOptions::default(),
            on_status_change: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the boot options.
    pub fn boot_options(mut self, options: BootOptions) -> Self {
        self.boot_options = options;
        self
    }

    /// Observe lifecycle status changes.
    pub fn on_status_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(LifecycleStatus) + Send + Sync + 'static,
    {
        self.on_status_change = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for SpawnOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnOptions")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("boot_options", &self.boot_options)
            .field("on_status_change", &self.on_status_change.is_some())
            .finish()
    }
}

/// What the transport runs inside its sandbox.
///
/// Deserializes from `{"type": "files", ...}` or `{"type": "spawn", ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportOptions {
    Files(FilesOptions),
    Spawn(SpawnOptions),
}

impl From<FilesOptions> for TransportOptions {
    fn from(options: FilesOptions) -> Self {
        Self::Files(options)
    }
}

impl From<SpawnOptions> for TransportOptions {
    fn from(options: SpawnOptions) -> Self {
        Self::Spawn(options)
    }
}

impl TransportOptions {
    /// Boot options of either variant.
    pub fn boot_options(&self) -> &BootOptions {
        match self {
            Self::Files(o) => &o.boot_options,
            Self::Spawn(o) => &o.boot_options,
        }
    }

    /// Status observer of either variant.
    pub fn status_callback(&self) -> Option<&StatusCallback> {
        match self {
            Self::Files(o) => o.on_status_change.as_ref(),
            Self::Spawn(o) => o.on_status_change.as_ref(),
        }
    }

    /// Attach a status observer, e.g. to options loaded from a config file.
    pub fn with_status_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(LifecycleStatus) + Send + Sync + 'static,
    {
        let callback: StatusCallback = Arc::new(callback);
        match &mut self {
            Self::Files(o) => o.on_status_change = Some(callback),
            Self::Spawn(o) => o.on_status_change = Some(callback),
        }
        self
    }

    /// Short name of the active variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Files(_) => "files",
            Self::Spawn(_) => "spawn",
        }
    }

    /// Check that the options describe something runnable.
    pub fn validate(&self) -> Result<(), TransportError> {
        match self {
            Self::Files(o) => {
                if o.entrypoint.trim().is_empty() {
                    return Err(TransportError::Config("entrypoint must not be empty".into()));
                }
                if o.files.keys().any(|path| path.trim().is_empty()) {
                    return Err(TransportError::Config("file paths must not be empty".into()));
                }
            }
            Self::Spawn(o) => {
                if o.command.trim().is_empty() {
                    return Err(TransportError::Config("command must not be empty".into()));
                }
            }
        }
        Ok(())
    }
}

/// Tunables of the transport itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Wait after killing the process before tearing down (default: 1s).
    pub close_grace: Duration,
    /// Longest accepted output line in bytes (default: 10 MB).
    pub max_frame_bytes: usize,
    /// Timeout for [`request`](crate::SandboxTransport::request); `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            close_grace: DEFAULT_CLOSE_GRACE,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

impl TransportConfig {
    /// Set the close grace delay.
    pub fn close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Set the maximum frame size.
    pub fn max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    /// Set or disable the request timeout.
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }
}
