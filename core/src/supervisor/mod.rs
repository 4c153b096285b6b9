//! Process-lifecycle supervisor
//!
//! Launches one child inside a kill-on-close process group, optionally
//! watches an external parent process, and reports the child's exit code.
//!
//! ## Architecture
//!
//! A single flow of control drives the state machine:
//!
//! ```text
//! Init → Launching → Supervising → ChildExited  ─┐
//!                         │                      ├→ Terminating → Done
//!                         └──→ ParentExited ─────┘
//! Init/Launching ──→ Failed
//! ```
//!
//! `Supervising` is one wait-for-any over the child's exit and, when a
//! parent is watched, the parent's exit. If the parent goes first the child
//! is killed. Either way the child's final exit code becomes the outcome.
//!
//! If the supervisor itself is killed, no code here runs: the process group
//! policy alone takes the child down.

use crate::config::LaunchConfig;
use crate::launcher::ChildLauncher;
use crate::process::{ExitSignal, NativeProcessGroup, ProcessGroup, TrackedProcess};
use crate::{Result, SandboxError};
use tracing::{debug, info, warn};

#[cfg(test)]
mod supervisor_tests;

/// Supervisor lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Configuration accepted, nothing created yet
    Init,
    /// Creating the group and launching the child
    Launching,
    /// Blocked until the child or the parent exits
    Supervising,
    /// The child exited on its own
    ChildExited,
    /// The watched parent exited first
    ParentExited,
    /// Collecting the child's final exit code
    Terminating,
    /// Finished with the child's exit code
    Done,
    /// Setup failed
    Failed,
}

/// Which watched lifecycle ended first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCause {
    Child,
    Parent,
}

/// Final result of a supervision run
#[derive(Debug)]
pub enum Outcome {
    /// The child ran and terminated; `exit_code` is what the supervisor exits with
    Completed { exit_code: i32, cause: ExitCause },
    /// Setup failed; the child, if any was launched, has been killed
    Failed(SandboxError),
}

/// Orchestrates the process group, the child and the optional parent watch
#[derive(Debug)]
pub struct Supervisor<G: ProcessGroup = NativeProcessGroup> {
    config: LaunchConfig,
    state: SupervisorState,
    history: Vec<SupervisorState>,
    group: Option<G>,
    child: Option<TrackedProcess>,
    parent: Option<ExitSignal>,
}

impl Supervisor<NativeProcessGroup> {
    pub fn new(config: LaunchConfig) -> Self {
        Self::with_group(config)
    }
}

impl<G: ProcessGroup> Supervisor<G> {
    /// Supervisor using a specific process group implementation
    pub fn with_group(config: LaunchConfig) -> Self {
        Self {
            config,
            state: SupervisorState::Init,
            history: vec![SupervisorState::Init],
            group: None,
            child: None,
            parent: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Every state visited so far, starting with `Init`
    pub fn history(&self) -> &[SupervisorState] {
        &self.history
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Run to completion.
    ///
    /// Consumes the supervisor; the process group is closed when this returns.
    pub async fn run(mut self) -> Outcome {
        let (outcome, _) = self.run_in_place().await;
        outcome
    }

    /// Run to completion, returning the visited states alongside the outcome
    pub async fn run_traced(mut self) -> (Outcome, Vec<SupervisorState>) {
        self.run_in_place().await
    }

    async fn run_in_place(&mut self) -> (Outcome, Vec<SupervisorState>) {
        let outcome = match self.supervise().await {
            Ok((exit_code, cause)) => {
                self.transition(SupervisorState::Done);
                info!("Child exited with code {} ({:?} ended first)", exit_code, cause);
                Outcome::Completed { exit_code, cause }
            }
            Err(err) => {
                self.transition(SupervisorState::Failed);
                warn!("Supervision failed: {} ({})", err, err.kind());
                self.abort();
                Outcome::Failed(err)
            }
        };
        self.close();
        (outcome, self.history.clone())
    }

    async fn supervise(&mut self) -> Result<(i32, ExitCause)> {
        self.transition(SupervisorState::Launching);

        // resolved before anything is created, so a strict failure launches nothing
        self.parent = self.resolve_parent()?;

        let mut group = G::create()?;
        group.add_self()?;
        let group = self.group.insert(group);

        let child = ChildLauncher::new(&self.config).launch(&*group)?;
        let pid = child.pid();
        // tracked before registration so a failed registration still kills it
        self.child = Some(child);
        group.add_process(pid)?;

        self.transition(SupervisorState::Supervising);
        let cause = wait_for_any(tracked(&mut self.child, pid)?, self.parent.as_ref()).await?;

        match cause {
            ExitCause::Child => self.transition(SupervisorState::ChildExited),
            ExitCause::Parent => {
                self.transition(SupervisorState::ParentExited);
                info!("Parent process exited, killing child {}", pid);
                stop_child(tracked(&mut self.child, pid)?);
            }
        }

        self.transition(SupervisorState::Terminating);
        let exit_code = tracked(&mut self.child, pid)?.wait().await?;
        Ok((exit_code, cause))
    }

    fn resolve_parent(&self) -> Result<Option<ExitSignal>> {
        let Some(ppid) = self.config.parent_process_id else {
            return Ok(None);
        };
        match ExitSignal::open(ppid) {
            Ok(signal) => Ok(Some(signal)),
            Err(err) if self.config.strict_parent => Err(err),
            Err(err) => {
                debug!("Skipping parent watch: {}", err);
                Ok(None)
            }
        }
    }

    /// Best-effort kill of the child; never fails
    fn abort(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.kill() {
                debug!("Ignoring cleanup failure: {}", e);
            }
        }
    }

    fn close(&mut self) {
        self.parent = None;
        if self.group.take().is_some() {
            debug!("Process group closed");
        }
    }

    fn transition(&mut self, to: SupervisorState) {
        debug!("Supervisor state: {:?} → {:?}", self.state, to);
        self.state = to;
        self.history.push(to);
    }
}

fn tracked(child: &mut Option<TrackedProcess>, pid: u32) -> Result<&mut TrackedProcess> {
    child.as_mut().ok_or_else(|| SandboxError::ProcessWait {
        pid,
        reason: "child is not tracked".to_string(),
    })
}

/// Kill the child after its parent exited. Once supervising, a failed kill
/// is logged and the final wait still decides the outcome.
fn stop_child(child: &mut TrackedProcess) {
    if let Err(e) = child.kill() {
        debug!("Ignoring kill failure for process {}: {}", child.pid(), e);
    }
}

/// Block until the child exits or, when watched, the parent exits.
///
/// When both are already done the child wins.
async fn wait_for_any(
    child: &mut TrackedProcess,
    parent: Option<&ExitSignal>,
) -> Result<ExitCause> {
    let Some(parent) = parent else {
        child.wait().await?;
        return Ok(ExitCause::Child);
    };

    tokio::select! {
        biased;
        code = child.wait() => {
            code?;
            Ok(ExitCause::Child)
        }
        exited = parent.exited() => {
            exited?;
            Ok(ExitCause::Parent)
        }
    }
}
