//! Runtime and environment traits - the boundary to a sandbox implementation.

use crate::error::Result;
use crate::process::ProcessHandle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Files to mount into an environment: relative path to file content.
pub type FileTree = BTreeMap<String, String>;

/// Boot configuration, passed through to the runtime untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BootOptions(pub serde_json::Value);

impl BootOptions {
    /// Wrap an arbitrary JSON value.
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Borrow the raw value.
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// A command line to run inside an environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnSpec {
    /// Program name or path.
    pub command: String,
    /// Arguments, in order.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl SpawnSpec {
    /// Create a spec for `command` with no arguments.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
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

    /// Set several environment variables.
    pub fn envs(mut self, vars: HashMap<String, String>) -> Self {
        self.env.extend(vars);
        self
    }
}

/// A sandbox runtime able to boot isolated environments.
///
/// Every call to [`boot`](Runtime::boot) yields an independent environment;
/// callers own the returned handle and are responsible for tearing it down.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Boot a new environment.
    async fn boot(&self, options: &BootOptions) -> Result<Box<dyn Environment>>;
}

/// A booted, isolated execution environment.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Write the given files into the environment's filesystem.
    async fn mount(&self, files: &FileTree) -> Result<()>;

    /// Spawn a process inside the environment.
    async fn spawn(&self, spec: &SpawnSpec) -> Result<ProcessHandle>;

    /// Release the environment and everything running in it.
    async fn teardown(&self) -> Result<()>;

    /// Command that installs dependencies declared by a package manifest.
    fn install_command(&self) -> SpawnSpec {
        SpawnSpec::new("npm").arg("install")
    }

    /// Command that launches a mounted entrypoint file.
    fn entrypoint_command(&self, entrypoint: &str) -> SpawnSpec {
        SpawnSpec::new("node").arg(entrypoint)
    }
}
