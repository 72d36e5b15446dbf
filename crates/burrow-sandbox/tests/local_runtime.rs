//! Integration tests for the local runtime.
//!
//! These tests spawn real processes through `sh` and therefore only run on Unix.

#![cfg(unix)]

use burrow_sandbox::{
    BootOptions, FileTree, LocalRuntime, LocalRuntimeConfig, Runtime, SandboxError, SpawnSpec,
};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

fn runtime(base: &tempfile::TempDir) -> LocalRuntime {
    LocalRuntime::new(
        LocalRuntimeConfig::builder()
            .base_dir(base.path())
            .entry_program("sh")
            .install_command(["sh", "-c", "echo installed > installed.txt"])
            .build()
            .expect("valid config"),
    )
}

/// Count environment directories currently present under the base dir.
fn environments(base: &tempfile::TempDir) -> usize {
    std::fs::read_dir(base.path()).map(|d| d.count()).unwrap_or(0)
}

/// Test full environment lifecycle: boot -> mount -> spawn -> teardown
#[tokio::test]
async fn test_environment_lifecycle() {
    let base = tempfile::tempdir().unwrap();
    let runtime = runtime(&base);

    let env = runtime
        .boot(&BootOptions::default())
        .await
        .expect("Failed to boot");
    assert_eq!(environments(&base), 1);

    let mut files = FileTree::new();
    files.insert("main.sh".into(), "cat nested/data.txt\n".into());
    files.insert("nested/data.txt".into(), "hello from the sandbox".into());
    env.mount(&files).await.expect("Failed to mount");

    let process = env
        .spawn(&env.entrypoint_command("main.sh"))
        .await
        .expect("Failed to spawn");
    let output = process.take_output().expect("output available");
    let mut lines = BufReader::new(output).lines();
    let line = lines.next_line().await.unwrap();
    assert_eq!(line.as_deref(), Some("hello from the sandbox"));
    assert_eq!(process.wait().await.unwrap(), 0);

    env.teardown().await.expect("Failed to tear down");
    assert_eq!(environments(&base), 0);

    // Second teardown is a no-op
    env.teardown().await.expect("Repeated teardown should succeed");
}

#[tokio::test]
async fn test_install_command_runs_in_working_directory() {
    let base = tempfile::tempdir().unwrap();
    let runtime = runtime(&base);
    let env = runtime.boot(&BootOptions::default()).await.unwrap();

    let process = env.spawn(&env.install_command()).await.unwrap();
    assert_eq!(process.wait().await.unwrap(), 0);

    let check = env
        .spawn(&SpawnSpec::new("cat").arg("installed.txt"))
        .await
        .unwrap();
    let mut lines = BufReader::new(check.take_output().unwrap()).lines();
    assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("installed"));

    env.teardown().await.unwrap();
}

#[tokio::test]
async fn test_spawn_with_env_and_stdin() {
    let base = tempfile::tempdir().unwrap();
    let env = runtime(&base).boot(&BootOptions::default()).await.unwrap();

    let spec = SpawnSpec::new("sh")
        .args(["-c", "read line; echo \"$GREETING:$line\""])
        .env("GREETING", "hi");
    let process = env.spawn(&spec).await.unwrap();

    {
        let input = process.input();
        let mut writer = input.lock().await;
        writer.write_all(b"there\n").await.unwrap();
        writer.flush().await.unwrap();
    }

    let mut lines = BufReader::new(process.take_output().unwrap()).lines();
    assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("hi:there"));
    assert_eq!(process.wait().await.unwrap(), 0);

    env.teardown().await.unwrap();
}

#[tokio::test]
async fn test_nonzero_exit_code() {
    let base = tempfile::tempdir().unwrap();
    let env = runtime(&base).boot(&BootOptions::default()).await.unwrap();

    let process = env
        .spawn(&SpawnSpec::new("sh").args(["-c", "exit 7"]))
        .await
        .unwrap();
    assert_eq!(process.wait().await.unwrap(), 7);

    env.teardown().await.unwrap();
}

#[tokio::test]
async fn test_kill_terminates_process() {
    let base = tempfile::tempdir().unwrap();
    let env = runtime(&base).boot(&BootOptions::default()).await.unwrap();

    let process = env
        .spawn(&SpawnSpec::new("sh").args(["-c", "sleep 30"]))
        .await
        .unwrap();
    process.kill().expect("kill should be delivered");

    let code = tokio::time::timeout(Duration::from_secs(5), process.wait())
        .await
        .expect("process should exit after kill")
        .unwrap();
    assert_ne!(code, 0);

    env.teardown().await.unwrap();
}

#[tokio::test]
async fn test_spawn_missing_program() {
    let base = tempfile::tempdir().unwrap();
    let env = runtime(&base).boot(&BootOptions::default()).await.unwrap();

    let result = env
        .spawn(&SpawnSpec::new("definitely-not-a-real-program-burrow"))
        .await;
    assert!(matches!(result, Err(SandboxError::Spawn { .. })));

    env.teardown().await.unwrap();
}

#[tokio::test]
async fn test_mount_rejects_escaping_paths() {
    let base = tempfile::tempdir().unwrap();
    let env = runtime(&base).boot(&BootOptions::default()).await.unwrap();

    let mut files = FileTree::new();
    files.insert("../outside.txt".into(), "nope".into());
    assert!(matches!(
        env.mount(&files).await,
        Err(SandboxError::InvalidPath(_))
    ));
    assert!(!base.path().join("outside.txt").exists());

    env.teardown().await.unwrap();
}
