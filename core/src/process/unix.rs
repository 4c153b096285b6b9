//! Unix process groups and exit signals
//!
//! The kill-on-close group is built from three pieces:
//!
//! - Every member is placed in one dedicated process group (`setpgid` in the
//!   pre-exec hook), so the whole tree can be signalled with `killpg`.
//! - On Linux every member also gets `PR_SET_PDEATHSIG = SIGKILL`, so the
//!   kernel kills it when the supervisor dies for any reason, including
//!   `SIGKILL` and OOM kills, without any supervisor code running.
//! - Closing the group (dropping it) sends `SIGKILL` to the process group,
//!   taking out anything the child left behind.
//!
//! The parent-death signal is tied to the thread that forked the child, so
//! members must be spawned from a thread that lives as long as the
//! supervisor (the main thread of a current-thread runtime).

// Allow unsafe code for this module since process management requires libc calls
#![allow(unsafe_code)]

use super::ProcessGroup;
use crate::config::{Priority, WindowStyle};
use crate::{Result, SandboxError};
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::{getpgid, getpid, Pid};
use tokio::process::Command;
use tracing::{debug, warn};

#[cfg(target_os = "linux")]
use std::os::fd::{FromRawFd, OwnedFd};
#[cfg(target_os = "linux")]
use tokio::io::unix::AsyncFd;

/// Kill-on-close group backed by a Unix process group
#[derive(Debug)]
pub struct UnixProcessGroup {
    /// The supervisor every member is bound to
    anchor: Pid,
    /// Process group of the members; the first member leads it
    pgid: Option<Pid>,
    members: Vec<u32>,
    self_registered: bool,
    kill_on_close: bool,
}

impl UnixProcessGroup {
    /// Process group ID shared by the members, once the first one joined
    pub fn pgid(&self) -> Option<u32> {
        self.pgid.map(|p| p.as_raw() as u32)
    }

    /// Close the group, killing every remaining member
    pub fn close(mut self) {
        self.kill_members();
    }

    fn kill_members(&mut self) {
        if !self.kill_on_close {
            return;
        }
        self.kill_on_close = false;
        let Some(pgid) = self.pgid else {
            return;
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) => debug!("Sent SIGKILL to process group {}", pgid),
            Err(Errno::ESRCH) => debug!("Process group {} already exited", pgid),
            Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
        }
    }
}

impl ProcessGroup for UnixProcessGroup {
    fn create() -> Result<Self> {
        let anchor = getpid();
        debug!("Created process group anchored to supervisor {}", anchor);
        Ok(Self {
            anchor,
            pgid: None,
            members: Vec::new(),
            self_registered: false,
            kill_on_close: true,
        })
    }

    fn add_self(&mut self) -> Result<()> {
        if self.self_registered {
            return Ok(());
        }

        // Orphaned descendants of the child get reparented to us instead of init,
        // which keeps them in the group until it is closed.
        #[cfg(target_os = "linux")]
        {
            let rc = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0) };
            if rc == -1 {
                return Err(SandboxError::GroupCreation(format!(
                    "PR_SET_CHILD_SUBREAPER failed: {}",
                    std::io::Error::last_os_error()
                )));
            }
        }

        self.self_registered = true;
        self.members.push(self.anchor.as_raw() as u32);
        debug!("Supervisor {} registered in its process group", self.anchor);
        Ok(())
    }

    fn prepare(&self, command: &mut Command) {
        let target_pgid = self.pgid.map(|p| p.as_raw()).unwrap_or(0);
        #[cfg(target_os = "linux")]
        let anchor = self.anchor.as_raw();

        // Safety: only async-signal-safe calls (setpgid, prctl, getppid, raise)
        // run between fork and exec
        #[deny(unsafe_op_in_unsafe_fn)]
        unsafe {
            command.pre_exec(move || {
                if libc::setpgid(0, target_pgid) == -1 {
                    return Err(std::io::Error::last_os_error());
                }

                #[cfg(target_os = "linux")]
                {
                    if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL, 0, 0, 0) == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    // the supervisor may have died between fork and prctl
                    if libc::getppid() != anchor {
                        libc::raise(libc::SIGKILL);
                    }
                }

                Ok(())
            });
        }
    }

    fn add_process(&mut self, pid: u32) -> Result<()> {
        let target = Pid::from_raw(pid as i32);

        // A zombie still answers signal 0, so a child that already exited but
        // has not been reaped counts as a member.
        match kill(target, None) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                return Err(SandboxError::GroupMembership {
                    pid,
                    reason: "process already exited".to_string(),
                })
            }
            Err(Errno::EPERM) => {
                return Err(SandboxError::GroupMembership {
                    pid,
                    reason: "insufficient privileges".to_string(),
                })
            }
            Err(e) => {
                return Err(SandboxError::GroupMembership {
                    pid,
                    reason: e.to_string(),
                })
            }
        }

        let expected = self.pgid.unwrap_or(target);
        let actual = getpgid(Some(target)).map_err(|e| SandboxError::GroupMembership {
            pid,
            reason: e.to_string(),
        })?;
        if actual != expected {
            return Err(SandboxError::GroupMembership {
                pid,
                reason: format!(
                    "process is in group {} instead of {} (was it prepared by this group?)",
                    actual, expected
                ),
            });
        }

        if self.pgid.is_none() {
            self.pgid = Some(target);
        }
        self.members.push(pid);
        debug!("Process {} joined process group {}", pid, expected);
        Ok(())
    }

    fn members(&self) -> &[u32] {
        &self.members
    }
}

impl Drop for UnixProcessGroup {
    fn drop(&mut self) {
        self.kill_members();
    }
}

/// Waitable termination signal for any process, child or not
#[derive(Debug)]
pub struct ExitSignal {
    pid: u32,
    #[cfg(target_os = "linux")]
    fd: AsyncFd<OwnedFd>,
}

impl ExitSignal {
    /// Open a termination signal for `pid`.
    ///
    /// Must be called from within a tokio runtime.
    #[cfg(target_os = "linux")]
    pub fn open(pid: u32) -> Result<Self> {
        let raw = unsafe { libc::syscall(libc::SYS_pidfd_open, pid as libc::pid_t, 0) };
        if raw < 0 {
            return Err(SandboxError::ParentResolution {
                pid,
                reason: std::io::Error::last_os_error().to_string(),
            });
        }
        // Safety: pidfd_open returned a fresh descriptor that nothing else owns
        let fd = unsafe { OwnedFd::from_raw_fd(raw as libc::c_int) };
        // Safety: the OwnedFd stays open and owned by the AsyncFd for its lifetime
        let fd = unsafe { AsyncFd::register(fd) }.map_err(|e| SandboxError::ParentResolution {
            pid,
            reason: e.to_string(),
        })?;
        debug!("Watching process {} for termination", pid);
        Ok(Self { pid, fd })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn open(pid: u32) -> Result<Self> {
        Err(SandboxError::ParentResolution {
            pid,
            reason: "watching a non-child process is not supported on this platform".to_string(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Resolves once the process has terminated
    #[cfg(target_os = "linux")]
    pub async fn exited(&self) -> Result<()> {
        let _ready = self
            .fd
            .readable()
            .await
            .map_err(|e| SandboxError::ProcessWait {
                pid: self.pid,
                reason: e.to_string(),
            })?;
        debug!("Process {} terminated", self.pid);
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub async fn exited(&self) -> Result<()> {
        std::future::pending().await
    }
}

/// Apply a scheduling priority to a running process, best-effort
pub fn apply_priority(pid: u32, priority: Priority) {
    let nice = priority.nice_value();
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, nice) };
    if rc == -1 {
        debug!(
            "Priority {} (nice {}) not applied to process {}: {}",
            priority,
            nice,
            pid,
            std::io::Error::last_os_error()
        );
    } else {
        debug!("Applied priority {} (nice {}) to process {}", priority, nice, pid);
    }
}

/// Window styles have no meaning for Unix processes
pub fn apply_window_style(_command: &mut Command, style: WindowStyle) {
    debug!("Window style {} ignored on this platform", style);
}
