//! # burrow-transport
//!
//! JSON-RPC 2.0 transport to a server process running inside a sandbox.
//!
//! The transport boots an environment, optionally mounts a file tree and
//! installs its dependencies, launches the server, and then exchanges
//! newline-delimited JSON-RPC messages over the process's stdio.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 burrow-transport (host)                  │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │ SandboxTransport│────▶│  lifecycle::provision    │   │
//! │  │   - start()     │     │  booting → mounting →    │   │
//! │  │   - send()      │     │  [installing] → running  │   │
//! │  │   - request()   │     └──────────────────────────┘   │
//! │  │   - close()     │                │                   │
//! │  └─────────────────┘                ▼                   │
//! │       ▲       │          ┌──────────────────────────┐   │
//! │       │       │ stdin    │  Runtime / Environment   │   │
//! │       │       └─────────▶│  (from burrow-sandbox)   │   │
//! │       │                  └──────────────────────────┘   │
//! │       │                             │ stdout            │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │ message::       │◀────│  FrameCodec              │   │
//! │  │   validate()    │     │  lines, ANSI stripped    │   │
//! │  └─────────────────┘     └──────────────────────────┘   │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use burrow_transport::{FilesOptions, SandboxTransport};
//! use burrow_sandbox::LocalRuntime;
//! use std::sync::Arc;
//!
//! # async fn example() -> burrow_transport::Result<()> {
//! let options = FilesOptions::new([("index.js", "/* server */")])
//!     .on_status_change(|status| println!("status: {status}"));
//!
//! let mut transport = SandboxTransport::new(Arc::new(LocalRuntime::default()), options);
//! transport.on_message(|message| println!("received: {message:?}"));
//! transport.on_error(|error| eprintln!("transport error: {error}"));
//!
//! transport.start().await?;
//! let tools = transport.request("tools/list", None).await?;
//! println!("tools: {tools}");
//!
//! transport.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Frame decoding**: chunk-invariant line splitting with ANSI escape and
//!   carriage-return removal, bounded frame size
//! - **Strict validation**: only well-formed JSON-RPC 2.0 messages reach the
//!   message callback; everything else the process prints is dropped
//! - **Lifecycle**: monotonic status notifications from boot to teardown
//! - **Requests**: id correlation with a configurable timeout

mod codec;
mod error;
mod lifecycle;
mod message;
mod options;
mod transport;

pub use codec::{strip_control, FrameCodec, FrameDecoder, Frames, DEFAULT_MAX_FRAME_BYTES};
pub use error::{Result, TransportError};
pub use lifecycle::{LifecycleStatus, PACKAGE_MANIFEST};
pub use message::{
    validate, JsonRpcMessage, Notification, Outcome, ParseError, Request, RequestId, Response,
    RpcError, JSONRPC_VERSION,
};
pub use options::{
    FilesOptions, SpawnOptions, StatusCallback, TransportConfig, TransportOptions,
    DEFAULT_CLOSE_GRACE, DEFAULT_ENTRYPOINT, DEFAULT_REQUEST_TIMEOUT,
};
pub use transport::{SandboxTransport, TransportState};
