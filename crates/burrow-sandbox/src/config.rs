//! Local runtime configuration.
//!
//! Configuration is built programmatically or loaded from environment
//! variables with sensible defaults.

use crate::error::SandboxError;
use std::path::PathBuf;

/// Configuration for [`LocalRuntime`](crate::LocalRuntime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRuntimeConfig {
    /// Directory under which each environment gets its own working directory.
    pub base_dir: PathBuf,
    /// Program that runs an entrypoint file (default: `node`).
    pub entry_program: String,
    /// Command line that installs manifest dependencies (default: `npm install`).
    pub install_command: Vec<String>,
}

impl Default for LocalRuntimeConfig {
    fn default() -> Self {
        Self {
            base_dir: std::env::temp_dir().join("burrow"),
            entry_program: "node".to_string(),
            install_command: vec!["npm".to_string(), "install".to_string()],
        }
    }
}

impl LocalRuntimeConfig {
    /// Create a new config builder.
    pub fn builder() -> LocalRuntimeConfigBuilder {
        LocalRuntimeConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `BURROW_WORKDIR` | `$TMPDIR/burrow` |
    /// | `BURROW_NODE` | `node` |
    /// | `BURROW_INSTALL` | `npm install` (split on whitespace) |
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            base_dir: std::env::var("BURROW_WORKDIR")
                .map(PathBuf::from)
                .unwrap_or(default.base_dir),
            entry_program: std::env::var("BURROW_NODE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default.entry_program),
            install_command: std::env::var("BURROW_INSTALL")
                .ok()
                .map(|v| v.split_whitespace().map(String::from).collect::<Vec<_>>())
                .filter(|v| !v.is_empty())
                .unwrap_or(default.install_command),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.base_dir.as_os_str().is_empty() {
            return Err(SandboxError::Boot("base_dir is required".into()));
        }
        if self.entry_program.trim().is_empty() {
            return Err(SandboxError::Boot("entry_program must not be empty".into()));
        }
        if self.install_command.is_empty() {
            return Err(SandboxError::Boot("install_command must not be empty".into()));
        }
        Ok(())
    }
}

/// Builder for LocalRuntimeConfig.
#[derive(Debug, Default)]
pub struct LocalRuntimeConfigBuilder {
    config: LocalRuntimeConfig,
}

impl LocalRuntimeConfigBuilder {
    /// Set the base directory for environment working directories.
    pub fn base_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.base_dir = path.into();
        self
    }

    /// Set the program used to launch entrypoints.
    pub fn entry_program(mut self, program: impl Into<String>) -> Self {
        self.config.entry_program = program.into();
        self
    }

    /// Set the dependency install command line.
    pub fn install_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.install_command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<LocalRuntimeConfig, SandboxError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
