//! In-memory sandbox runtime shared by the transport integration tests.
//!
//! Processes are tasks wired to the transport through `tokio::io::duplex`.
//! Commands understood by [`MockEnvironment::spawn`]:
//! - `npm ...`: prints one line and exits 0 (3 with [`Failures::install`])
//! - `crash`: both streams are closed before the handle is returned
//! - `quit`: reads one line, then exits without answering
//! - `mute`: closes its output at once but keeps reading input
//! - anything else: a JSON-RPC echo server (see [`serve`])

#![allow(dead_code)]

use async_trait::async_trait;
use burrow_sandbox::{
    BootOptions, Environment, FileTree, ProcessHandle, Result, Runtime, SandboxError, SpawnSpec,
};
use burrow_transport::LifecycleStatus;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::{oneshot, watch};

/// Ordered record of runtime calls, e.g. `boot`, `mount:a.js`, `spawn:node index.js`.
pub type CallLog = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct Failures {
    pub boot: bool,
    pub mount: bool,
    /// Fails every spawn except the install command.
    pub spawn: bool,
    pub teardown: bool,
    /// Makes the install command exit with status 3.
    pub install: bool,
}

#[derive(Default)]
pub struct MockRuntime {
    pub calls: CallLog,
    pub fail: Failures,
}

impl MockRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(fail: Failures) -> Arc<Self> {
        Arc::new(Self {
            calls: CallLog::default(),
            fail,
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }
}

#[async_trait]
impl Runtime for MockRuntime {
    async fn boot(&self, _options: &BootOptions) -> Result<Box<dyn Environment>> {
        self.calls.lock().unwrap().push("boot".into());
        if self.fail.boot {
            return Err(SandboxError::Boot("no capacity".into()));
        }
        Ok(Box::new(MockEnvironment {
            calls: Arc::clone(&self.calls),
            fail: self.fail,
        }))
    }
}

pub struct MockEnvironment {
    calls: CallLog,
    fail: Failures,
}

impl MockEnvironment {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Environment for MockEnvironment {
    async fn mount(&self, files: &FileTree) -> Result<()> {
        let paths: Vec<&str> = files.keys().map(String::as_str).collect();
        self.record(format!("mount:{}", paths.join(",")));
        if self.fail.mount {
            return Err(SandboxError::Mount("read-only filesystem".into()));
        }
        Ok(())
    }

    async fn spawn(&self, spec: &SpawnSpec) -> Result<ProcessHandle> {
        let command_line = std::iter::once(spec.command.as_str())
            .chain(spec.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        self.record(format!("spawn:{command_line}"));

        let (output, mut child_stdout) = tokio::io::duplex(64 * 1024);
        let (input, child_stdin) = tokio::io::duplex(64 * 1024);
        let (exit_tx, exit_rx) = watch::channel(None);

        match spec.command.as_str() {
            "npm" => {
                let (line, code) = if self.fail.install {
                    (&b"npm ERR! code E404\n"[..], 3)
                } else {
                    (&b"added 0 packages\n"[..], 0)
                };
                child_stdout
                    .write_all(line)
                    .await
                    .map_err(|e| SandboxError::Spawn {
                        command: command_line.clone(),
                        reason: e.to_string(),
                    })?;
                drop(child_stdout);
                exit_tx.send_replace(Some(code));
                Ok(ProcessHandle::new(command_line, output, input, exit_rx))
            }
            _ if self.fail.spawn => Err(SandboxError::Spawn {
                command: spec.command.clone(),
                reason: "No such file or directory".into(),
            }),
            "crash" => {
                drop(child_stdout);
                drop(child_stdin);
                exit_tx.send_replace(Some(1));
                Ok(ProcessHandle::new(command_line, output, input, exit_rx))
            }
            "mute" => {
                drop(child_stdout);
                tokio::spawn(async move {
                    let mut lines = BufReader::new(child_stdin).lines();
                    while let Ok(Some(_)) = lines.next_line().await {}
                    exit_tx.send_replace(Some(0));
                });
                Ok(ProcessHandle::new(command_line, output, input, exit_rx))
            }
            "quit" => {
                tokio::spawn(async move {
                    let mut lines = BufReader::new(child_stdin).lines();
                    let _ = lines.next_line().await;
                    drop(child_stdout);
                    exit_tx.send_replace(Some(0));
                });
                Ok(ProcessHandle::new(command_line, output, input, exit_rx))
            }
            _ => {
                let (kill_tx, kill_rx) = oneshot::channel::<()>();
                let calls = Arc::clone(&self.calls);
                tokio::spawn(async move {
                    let code = tokio::select! {
                        killed = kill_rx => {
                            if killed.is_ok() {
                                calls.lock().unwrap().push("kill".into());
                            }
                            -1
                        }
                        _ = serve(child_stdin, child_stdout) => 0,
                    };
                    exit_tx.send_replace(Some(code));
                });
                Ok(ProcessHandle::new(command_line, output, input, exit_rx).with_kill(kill_tx))
            }
        }
    }

    async fn teardown(&self) -> Result<()> {
        self.record("teardown".into());
        if self.fail.teardown {
            return Err(SandboxError::Teardown("device busy".into()));
        }
        Ok(())
    }
}

/// Echo server: announces itself, then answers every request.
///
/// - method `fail`: error response `-32601`
/// - method `hang`: no response
/// - anything else: `{"echo": <method>, "params": <params>}`
///
/// Every answer is preceded by a plain log line.
pub async fn serve(stdin: DuplexStream, mut stdout: DuplexStream) {
    let banner = "\x1b[33mserver starting\x1b[0m\r\n\
                  {\"jsonrpc\":\"2.0\",\"method\":\"notifications/ready\"}\n";
    if stdout.write_all(banner.as_bytes()).await.is_err() {
        return;
    }

    let mut lines = BufReader::new(stdin).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let (Some(id), Some(method)) = (message.get("id"), message["method"].as_str()) else {
            continue;
        };

        let reply = match method {
            "hang" => continue,
            "fail" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": "Method not found"}
            }),
            _ => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {"echo": method, "params": message.get("params").cloned().unwrap_or(Value::Null)}
            }),
        };

        let out = format!("handling {method}\n{reply}\n");
        if stdout.write_all(out.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// Collects lifecycle statuses reported through the options callback.
#[derive(Clone, Default)]
pub struct StatusLog(Arc<Mutex<Vec<LifecycleStatus>>>);

impl StatusLog {
    pub fn callback(&self) -> impl Fn(LifecycleStatus) + Send + Sync + 'static {
        let sink = Arc::clone(&self.0);
        move |status| sink.lock().unwrap().push(status)
    }

    pub fn seen(&self) -> Vec<LifecycleStatus> {
        self.0.lock().unwrap().clone()
    }
}

/// Counts callback invocations.
#[derive(Clone, Default)]
pub struct Counter(Arc<Mutex<usize>>);

impl Counter {
    pub fn hit(&self) {
        *self.0.lock().unwrap() += 1;
    }

    pub fn get(&self) -> usize {
        *self.0.lock().unwrap()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
