//! Tests for the supervisor state machine against real processes

#![cfg(unix)]

use super::SupervisorState::*;
use super::*;
use crate::config::LaunchConfig;
#[cfg(target_os = "linux")]
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::process::Command;

fn sh(script: &str) -> LaunchConfig {
    LaunchConfig::new("sh").with_args(["-c", script])
}

async fn run_with_timeout(config: LaunchConfig) -> (Outcome, Vec<SupervisorState>) {
    tokio::time::timeout(Duration::from_secs(20), Supervisor::new(config).run_traced())
        .await
        .expect("supervisor did not finish")
}

#[tokio::test]
async fn test_exit_code_is_propagated() {
    for code in [0, 1, 42] {
        let (outcome, history) = run_with_timeout(sh(&format!("exit {}", code))).await;
        match outcome {
            Outcome::Completed { exit_code, cause } => {
                assert_eq!(exit_code, code);
                assert_eq!(cause, ExitCause::Child);
            }
            Outcome::Failed(e) => panic!("unexpected failure: {}", e),
        }
        assert_eq!(
            history,
            vec![Init, Launching, Supervising, ChildExited, Terminating, Done]
        );
    }
}

#[tokio::test]
async fn test_missing_executable_fails_with_launch_error() {
    let (outcome, history) = run_with_timeout(LaunchConfig::new("nonexistent_command_12345")).await;
    match outcome {
        Outcome::Failed(e) => assert_eq!(e.kind(), "LaunchError"),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(history, vec![Init, Launching, Failed]);
}

#[tokio::test]
async fn test_unresolvable_parent_is_skipped() {
    let config = sh("exit 7").with_parent(u32::MAX / 2);
    let (outcome, _) = run_with_timeout(config).await;
    match outcome {
        Outcome::Completed { exit_code, cause } => {
            assert_eq!(exit_code, 7);
            assert_eq!(cause, ExitCause::Child);
        }
        Outcome::Failed(e) => panic!("unexpected failure: {}", e),
    }
}

#[tokio::test]
async fn test_unresolvable_parent_fails_in_strict_mode() {
    let config = sh("exit 7")
        .with_parent(u32::MAX / 2)
        .with_strict_parent(true);
    let (outcome, history) = run_with_timeout(config).await;
    match outcome {
        Outcome::Failed(e) => assert_eq!(e.kind(), "ParentResolutionError"),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(history, vec![Init, Launching, Failed]);
}

#[tokio::test]
async fn test_live_parent_does_not_interfere() {
    let mut parent = std::process::Command::new("sleep").arg("30").spawn().unwrap();
    let config = sh("exit 3").with_parent(parent.id());

    let (outcome, _) = run_with_timeout(config).await;
    match outcome {
        Outcome::Completed { exit_code, cause } => {
            assert_eq!(exit_code, 3);
            assert_eq!(cause, ExitCause::Child);
        }
        Outcome::Failed(e) => panic!("unexpected failure: {}", e),
    }

    let _ = parent.kill();
    let _ = parent.wait();
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_parent_exit_kills_child() {
    let mut parent = std::process::Command::new("sleep").arg("30").spawn().unwrap();
    let parent_pid = parent.id();
    let config = LaunchConfig::new("sleep").with_args(["30"]).with_parent(parent_pid);

    let killer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        let _ = parent.kill();
        let _ = parent.wait();
    });

    let (outcome, history) = run_with_timeout(config).await;
    killer.join().unwrap();

    match outcome {
        Outcome::Completed { exit_code, cause } => {
            assert_eq!(cause, ExitCause::Parent);
            // SIGKILL
            assert_eq!(exit_code, 137);
        }
        Outcome::Failed(e) => panic!("unexpected failure: {}", e),
    }
    assert_eq!(
        history,
        vec![Init, Launching, Supervising, ParentExited, Terminating, Done]
    );
}

#[test]
fn test_supervisor_starts_in_init() {
    let supervisor = Supervisor::new(sh("exit 0"));
    assert_eq!(supervisor.state(), Init);
    assert_eq!(supervisor.history(), &[Init]);
    assert_eq!(supervisor.config().executable_args, vec!["-c", "exit 0"]);
}

/// PID most recently refused by `RejectingGroup`
#[cfg(target_os = "linux")]
static REJECTED_PID: AtomicU32 = AtomicU32::new(0);

/// Group that accepts the supervisor but refuses every child
#[cfg(target_os = "linux")]
#[derive(Debug)]
struct RejectingGroup {
    members: Vec<u32>,
}

#[cfg(target_os = "linux")]
impl ProcessGroup for RejectingGroup {
    fn create() -> Result<Self> {
        Ok(Self {
            members: Vec::new(),
        })
    }

    fn add_self(&mut self) -> Result<()> {
        self.members.push(std::process::id());
        Ok(())
    }

    fn prepare(&self, _command: &mut Command) {}

    fn add_process(&mut self, pid: u32) -> Result<()> {
        REJECTED_PID.store(pid, Ordering::SeqCst);
        Err(SandboxError::GroupMembership {
            pid,
            reason: "refused".to_string(),
        })
    }

    fn members(&self) -> &[u32] {
        &self.members
    }
}

/// Zombies count as gone
#[cfg(target_os = "linux")]
fn process_is_running(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return false;
    };
    let state = stat
        .rsplit_once(')')
        .and_then(|(_, rest)| rest.split_whitespace().next());
    !matches!(state, Some("Z") | Some("X") | None)
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_failed_registration_kills_launched_child() {
    let config = LaunchConfig::new("sleep").with_args(["30"]);
    let supervisor: Supervisor<RejectingGroup> = Supervisor::with_group(config);

    let (outcome, history) = tokio::time::timeout(Duration::from_secs(20), supervisor.run_traced())
        .await
        .expect("supervisor did not finish");

    match outcome {
        Outcome::Failed(e) => assert_eq!(e.kind(), "GroupError"),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(history, vec![Init, Launching, Failed]);

    let pid = REJECTED_PID.load(Ordering::SeqCst);
    assert_ne!(pid, 0);
    let mut gone = false;
    for _ in 0..100 {
        if !process_is_running(pid) {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(gone, "launched child {} survived the failed setup", pid);
}

#[tokio::test]
async fn test_stop_child_kills_running_child() {
    let child = Command::new("sleep").arg("30").spawn().unwrap();
    let pid = child.id().unwrap();
    let mut tracked = TrackedProcess::new(pid, child);

    stop_child(&mut tracked);
    // SIGKILL
    assert_eq!(tracked.wait().await.unwrap(), 137);
}

#[tokio::test]
async fn test_stop_child_after_exit_keeps_exit_code() {
    let child = Command::new("sh").args(["-c", "exit 5"]).spawn().unwrap();
    let pid = child.id().unwrap();
    let mut tracked = TrackedProcess::new(pid, child);
    assert_eq!(tracked.wait().await.unwrap(), 5);

    stop_child(&mut tracked);
    assert_eq!(tracked.exit_code(), Some(5));
}
