//! Sandbox transport - JSON-RPC over the stdio of a sandboxed process.
//!
//! The transport boots an environment through a [`Runtime`], launches the
//! server process, and then:
//! - reads its output through the [`FrameCodec`], validating every line and
//!   handing JSON-RPC messages to the message callback
//! - writes outgoing messages to its input, one newline-terminated line each
//!
//! Lines that are not JSON-RPC (logs, banners, colored noise) are dropped.

use crate::codec::FrameCodec;
use crate::error::{Result, TransportError};
use crate::lifecycle::{self, LifecycleStatus, Provisioned, StatusTracker};
use crate::message::{self, JsonRpcMessage, Outcome, RequestId, Response};
use crate::options::{TransportConfig, TransportOptions};
use burrow_sandbox::{Environment, ProcessHandle, ProcessOutput, Runtime};
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;

type MessageHandler = Arc<dyn Fn(JsonRpcMessage) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&TransportError) + Send + Sync>;
type CloseHandler = Arc<dyn Fn() + Send + Sync>;

/// Requests awaiting a response, keyed by id.
#[derive(Default)]
struct Pending {
    waiters: HashMap<RequestId, oneshot::Sender<Response>>,
    /// Set once the process output ended; nothing can answer after that.
    closed: bool,
}

impl Pending {
    /// Fail every waiter and refuse new ones.
    fn close(&mut self) {
        self.closed = true;
        self.waiters.clear();
    }
}

type PendingRequests = Arc<Mutex<Pending>>;

/// Removes a request's pending entry when dropped, so abandoned request
/// futures do not leave waiters behind.
struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.waiters.remove(&self.id);
        }
    }
}

/// Started/initialized flags of a transport.
///
/// `initialized` implies `started`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportState {
    /// `start()` has been called and has not failed or been closed since.
    pub started: bool,
    /// The server process is running and its output is wired up.
    pub initialized: bool,
}

/// Observer slots. Handlers are cloned out of their lock before being called.
#[derive(Default)]
struct Handlers {
    message: RwLock<Option<MessageHandler>>,
    error: RwLock<Option<ErrorHandler>>,
    close: RwLock<Option<CloseHandler>>,
}

impl Handlers {
    fn emit_message(&self, message: JsonRpcMessage) {
        let handler = self.message.read().ok().and_then(|h| h.clone());
        if let Some(handler) = handler {
            handler(message);
        }
    }

    fn emit_error(&self, error: &TransportError) {
        let handler = self.error.read().ok().and_then(|h| h.clone());
        if let Some(handler) = handler {
            handler(error);
        }
    }

    fn emit_close(&self) {
        let handler = self.close.read().ok().and_then(|h| h.clone());
        if let Some(handler) = handler {
            handler();
        }
    }
}

fn set_handler<T>(slot: &RwLock<Option<T>>, handler: T) {
    if let Ok(mut slot) = slot.write() {
        *slot = Some(handler);
    }
}

/// JSON-RPC transport to a process running inside a sandbox.
///
/// Each transport owns at most one environment and one process at a time.
/// `start()` and `close()` take `&mut self`; sending only needs `&self`, so
/// several requests may be in flight at once.
pub struct SandboxTransport {
    runtime: Arc<dyn Runtime>,
    options: TransportOptions,
    config: TransportConfig,
    state: TransportState,
    status: StatusTracker,
    /// Set once a close completed; cleared by the next start.
    closed: bool,
    environment: Option<Box<dyn Environment>>,
    process: Option<ProcessHandle>,
    reader: Option<JoinHandle<()>>,
    handlers: Arc<Handlers>,
    pending: PendingRequests,
    next_id: AtomicI64,
}

impl SandboxTransport {
    /// Create a transport that will run `options` on `runtime`.
    pub fn new(runtime: Arc<dyn Runtime>, options: impl Into<TransportOptions>) -> Self {
        let options = options.into();
        let status = StatusTracker::new(options.status_callback().cloned());
        Self {
            runtime,
            options,
            config: TransportConfig::default(),
            state: TransportState::default(),
            status,
            closed: false,
            environment: None,
            process: None,
            reader: None,
            handlers: Arc::new(Handlers::default()),
            pending: Arc::new(Mutex::new(Pending::default())),
            next_id: AtomicI64::new(1),
        }
    }

    /// Replace the transport tunables.
    pub fn with_config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Options this transport was created with.
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Transport tunables.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Started/initialized flags.
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// True between a successful or in-progress `start()` and `close()`.
    pub fn is_started(&self) -> bool {
        self.state.started
    }

    /// True once the server process is running and wired up.
    pub fn is_initialized(&self) -> bool {
        self.state.initialized
    }

    /// Current lifecycle status; `None` while idle.
    pub fn status(&self) -> Option<LifecycleStatus> {
        self.status.current()
    }

    /// Called with every validated message read from the process.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(JsonRpcMessage) + Send + Sync + 'static,
    {
        set_handler(&self.handlers.message, Arc::new(handler) as MessageHandler);
    }

    /// Called when starting fails or a write fails.
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        set_handler(&self.handlers.error, Arc::new(handler) as ErrorHandler);
    }

    /// Called once at the end of every `close()`.
    pub fn on_close<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        set_handler(&self.handlers.close, Arc::new(handler) as CloseHandler);
    }

    /// Boot the environment, provision it and launch the server process.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AlreadyStarted`] without side effects if the
    /// transport is started. Any startup failure resets the transport to not
    /// started, fires the error callback, and is returned.
    pub async fn start(&mut self) -> Result<()> {
        if self.state.started {
            return Err(TransportError::AlreadyStarted);
        }
        if let Err(e) = self.options.validate() {
            self.handlers.emit_error(&e);
            return Err(e);
        }

        let start = Instant::now();
        tracing::info!(kind = self.options.kind(), "Starting transport");
        self.state.started = true;
        self.closed = false;
        self.status.reset();
        self.pending = Arc::new(Mutex::new(Pending::default()));

        let provisioned = lifecycle::provision(
            self.runtime.as_ref(),
            &self.options,
            &mut self.status,
            self.config.max_frame_bytes,
        )
        .await;

        match provisioned {
            Ok(Provisioned {
                environment,
                process,
            }) => {
                match process.take_output() {
                    Some(output) => {
                        self.reader = Some(tokio::spawn(read_messages(
                            output,
                            self.config.max_frame_bytes,
                            Arc::clone(&self.handlers),
                            Arc::clone(&self.pending),
                        )));
                    }
                    None => tracing::warn!("Server process has no output stream"),
                }
                self.environment = Some(environment);
                self.process = Some(process);
                self.state.initialized = true;
                tracing::info!(
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Transport started"
                );
                Ok(())
            }
            Err(e) => {
                self.state.started = false;
                tracing::error!(error = %e, "Transport failed to start");
                self.handlers.emit_error(&e);
                Err(e)
            }
        }
    }

    /// Write one message to the server process.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotStarted`] if there is no process. A failed
    /// write fires the error callback and is returned.
    pub async fn send(&self, message: &JsonRpcMessage) -> Result<()> {
        let process = self.process.as_ref().ok_or(TransportError::NotStarted)?;

        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        let input = process.input();
        let written = async {
            let mut writer = input.lock().await;
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            let err = TransportError::Write(e);
            tracing::warn!(error = %err, "Failed to write message");
            self.handlers.emit_error(&err);
            return Err(err);
        }

        tracing::debug!(method = ?message.method(), id = ?message.id(), "Sent message");
        tracing::trace!(body = %line.trim_end(), "Message body");
        Ok(())
    }

    /// Send a notification.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.send(&JsonRpcMessage::notification(method, params))
            .await
    }

    /// Send a request and wait for its response.
    ///
    /// The response is also delivered to the message callback.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Rpc`] for an error response,
    /// [`TransportError::Timeout`] if no response arrives within the
    /// configured timeout, and [`TransportError::Closed`] if the process
    /// output ends or the transport closes first, or had already ended.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.process.is_none() {
            return Err(TransportError::NotStarted);
        }

        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().map_err(|_| TransportError::Closed)?;
            if pending.closed {
                return Err(TransportError::Closed);
            }
            pending.waiters.insert(id.clone(), tx);
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            id: id.clone(),
        };

        let message = JsonRpcMessage::request(id.clone(), method, params);
        self.send(&message).await?;

        let response = match self.config.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(response) => response,
                Err(_) => {
                    tracing::warn!(method = %method, %id, timeout_ms = limit.as_millis() as u64, "Request timed out");
                    return Err(TransportError::Timeout(limit));
                }
            },
            None => rx.await,
        };
        let response = response.map_err(|_| TransportError::Closed)?;

        match response.outcome {
            Outcome::Result(result) => {
                tracing::debug!(method = %method, %id, "Request succeeded");
                Ok(result)
            }
            Outcome::Error(error) => {
                tracing::debug!(method = %method, %id, code = error.code, message = %error.message, "Request failed");
                Err(TransportError::Rpc {
                    code: error.code,
                    message: error.message,
                })
            }
        }
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().map(|p| p.waiters.len()).unwrap_or(0)
    }

    /// Stop the process, tear the environment down and fire the close callback.
    ///
    /// Every step is best-effort: failures are logged and never prevent the
    /// remaining steps. Safe before `start()` and after a failed start.
    /// Repeated calls after a completed close do nothing until the next start.
    pub async fn close(&mut self) {
        if self.closed {
            tracing::debug!("Transport already closed");
            return;
        }

        let start = Instant::now();
        tracing::info!("Closing transport");
        self.status.advance(LifecycleStatus::Unmounting);

        if let Some(process) = &self.process {
            if let Err(e) = process.kill() {
                tracing::debug!(error = %e, "Failed to kill server process");
            }
        }

        tokio::time::sleep(self.config.close_grace).await;

        if let Some(environment) = self.environment.take() {
            if let Err(e) = environment.teardown().await {
                tracing::warn!(error = %e, "Failed to tear down environment");
            }
        }

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.process = None;
        if let Ok(mut pending) = self.pending.lock() {
            pending.close();
        }
        self.state = TransportState::default();

        self.status.advance(LifecycleStatus::Teardowned);
        self.status.reset();
        self.closed = true;

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Transport closed"
        );
        self.handlers.emit_close();
    }
}

impl Drop for SandboxTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if self.environment.is_some() {
            tracing::warn!("Transport dropped without close(), environment was not torn down");
        }
    }
}

/// Read process output until it ends, delivering every JSON-RPC message.
async fn read_messages(
    output: ProcessOutput,
    max_frame_bytes: usize,
    handlers: Arc<Handlers>,
    pending: PendingRequests,
) {
    let mut frames = FramedRead::new(output, FrameCodec::with_max_frame_bytes(max_frame_bytes));

    while let Some(frame) = frames.next().await {
        let line = match frame {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read process output");
                break;
            }
        };

        match message::validate(&line) {
            Ok(message) => {
                tracing::debug!(method = ?message.method(), id = ?message.id(), "Received message");
                tracing::trace!(body = %line, "Message body");
                if let JsonRpcMessage::Response(response) = &message {
                    resolve(&pending, response);
                }
                handlers.emit_message(message);
            }
            Err(e) => {
                tracing::debug!(error = %e, line = %line, "Dropping non-protocol line");
            }
        }
    }

    tracing::debug!("Process output closed");
    if let Ok(mut pending) = pending.lock() {
        pending.close();
    }
}

fn resolve(pending: &PendingRequests, response: &Response) {
    let Some(id) = &response.id else {
        return;
    };
    let waiter = pending.lock().ok().and_then(|mut p| p.waiters.remove(id));
    if let Some(waiter) = waiter {
        let _ = waiter.send(response.clone());
    }
}
