//! Process management primitives for the sandbox supervisor
//!
//! This module provides the OS-facing pieces the supervisor is built from,
//! with one implementation per platform behind a common surface:
//!
//! - [`ProcessGroup`]: a kill-on-close group binding the supervisor and its
//!   child together
//! - [`ExitSignal`]: waits for an arbitrary process (not necessarily our
//!   child) to terminate
//! - [`TrackedProcess`]: the launched child, its PID and final exit code
//!
//! ## Platform Support
//!
//! - **Unix**: dedicated process group per child; on Linux the child is also
//!   bound to the supervisor with a parent-death signal, and foreign
//!   processes are watched through pidfds
//! - **Windows**: Job Object with kill-on-job-close

use crate::{Result, SandboxError};
use std::process::ExitStatus;
use tokio::process::{Child, Command};
use tracing::debug;

#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub use unix::{apply_priority, apply_window_style, ExitSignal, UnixProcessGroup};

#[cfg(windows)]
pub use windows::{apply_priority, apply_window_style, ExitSignal, JobObjectGroup};

/// The process group implementation for the current platform
#[cfg(unix)]
pub type NativeProcessGroup = UnixProcessGroup;

/// The process group implementation for the current platform
#[cfg(windows)]
pub type NativeProcessGroup = JobObjectGroup;

/// An OS construct whose members are all terminated when it is closed,
/// including when its creator dies abnormally.
///
/// The kill-on-close policy is armed by [`ProcessGroup::create`], before any
/// member can be added. Membership is permanent.
pub trait ProcessGroup: Sized {
    /// Create an empty group with the kill-on-close policy already set
    fn create() -> Result<Self>;

    /// Register the calling process
    fn add_self(&mut self) -> Result<()>;

    /// Configure a command that is about to be spawned as a member
    fn prepare(&self, command: &mut Command);

    /// Register a live process by ID
    fn add_process(&mut self, pid: u32) -> Result<()>;

    /// IDs registered so far, in order
    fn members(&self) -> &[u32];
}

/// A launched child together with its final exit code once known
#[derive(Debug)]
pub struct TrackedProcess {
    pid: u32,
    child: Child,
    exit_code: Option<i32>,
}

impl TrackedProcess {
    pub fn new(pid: u32, child: Child) -> Self {
        Self {
            pid,
            child,
            exit_code: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit code, if the process has been observed to exit
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Wait for the process to exit and return its exit code.
    ///
    /// Idempotent: once the code is known it is returned immediately.
    /// Cancel-safe, so it can race other signals in `select!`.
    pub async fn wait(&mut self) -> Result<i32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| SandboxError::ProcessWait {
                pid: self.pid,
                reason: e.to_string(),
            })?;
        let code = exit_code_of(status);
        debug!("Process {} exited with code {}", self.pid, code);
        self.exit_code = Some(code);
        Ok(code)
    }

    /// Forcibly terminate the process.
    ///
    /// Killing a process that has already exited is a no-op.
    pub fn kill(&mut self) -> Result<()> {
        if self.exit_code.is_some() {
            return Ok(());
        }
        match self.child.start_kill() {
            Ok(()) => {
                debug!("Sent kill to process {}", self.pid);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
                debug!("Process {} already exited", self.pid);
                Ok(())
            }
            Err(e) => Err(SandboxError::ProcessWait {
                pid: self.pid,
                reason: format!("kill failed: {}", e),
            }),
        }
    }
}

/// Exit code to propagate for a finished process.
///
/// On Unix a process terminated by signal `N` reports `128 + N`, the
/// convention shells use.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
