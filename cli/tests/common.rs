#![allow(unused_crate_dependencies)]
//! Test utilities for CLI crate integration tests.
#![allow(missing_docs)]
#![allow(dead_code)]

use std::path::Path;
use std::process::{Command, Output};
use std::time::Duration;

/// Path of the built `process-sandbox` binary
pub const SANDBOX_BIN: &str = env!("CARGO_BIN_EXE_process-sandbox");

/// Command for the sandbox binary with logging silenced
pub fn sandbox() -> Command {
    let mut command = Command::new(SANDBOX_BIN);
    command.env_remove("RUST_LOG").env_remove("PROCESS_SANDBOX_LOG");
    command
}

/// Run the sandbox to completion with the given arguments
pub fn run_sandbox(args: &[&str]) -> Output {
    sandbox().args(args).output().expect("failed to run process-sandbox")
}

/// Standard output as text
pub fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Run the given future with a timeout, failing the test if it elapses.
///
/// # Panics
///
/// Panics if the timeout elapses before the future completes.
pub async fn run_with_timeout<F, T>(duration: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(duration, fut)
        .await
        .expect("test timed out")
}

/// Whether `pid` is alive; zombies count as dead
pub fn process_is_running(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return false;
    };
    let state = stat
        .rsplit_once(')')
        .and_then(|(_, rest)| rest.split_whitespace().next());
    !matches!(state, Some("Z") | Some("X") | None)
}

/// Poll until `pid` is gone or about five seconds have passed
pub async fn wait_until_dead(pid: u32) -> bool {
    for _ in 0..100 {
        if !process_is_running(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Poll until a pid file has been written
pub async fn read_pid(path: &Path) -> u32 {
    for _ in 0..100 {
        if let Ok(contents) = std::fs::read_to_string(path) {
            if let Ok(pid) = contents.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("pid file {} was never written", path.display());
}
