//! # burrow-sandbox
//!
//! Sandbox runtime boundary for burrow.
//! Describes what the transport needs from an isolated execution environment
//! and ships a host-directory runtime that satisfies it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use burrow_sandbox::{BootOptions, FileTree, LocalRuntime, Runtime, SpawnSpec};
//!
//! # async fn example() -> burrow_sandbox::Result<()> {
//! let runtime = LocalRuntime::default();
//! let env = runtime.boot(&BootOptions::default()).await?;
//!
//! let mut files = FileTree::new();
//! files.insert("index.js".into(), "console.log('hi')".into());
//! env.mount(&files).await?;
//!
//! let process = env.spawn(&env.entrypoint_command("index.js")).await?;
//! let code = process.wait().await?;
//! println!("exited with {code}");
//!
//! env.teardown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Runtime / Environment traits**: boot, mount, spawn and teardown as the
//!   only operations a transport relies on
//! - **Process handles**: take-once output, per-write input locking, awaitable
//!   exit and best-effort kill
//! - **Local runtime**: one working directory per environment, processes
//!   spawned with `tokio::process`

mod config;
mod error;
mod local;
mod process;
mod runtime;

pub use config::{LocalRuntimeConfig, LocalRuntimeConfigBuilder};
pub use error::{Result, SandboxError};
pub use local::{LocalEnvironment, LocalRuntime};
pub use process::{ProcessHandle, ProcessInput, ProcessOutput};
pub use runtime::{BootOptions, Environment, FileTree, Runtime, SpawnSpec};
