//! Windows Job Object groups and exit signals
//!
//! The group is a Job Object created with `JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE`.
//! Once the supervisor has assigned itself, the job handle lives exactly as
//! long as the supervisor process: when the process ends, however it ends,
//! the OS closes the handle and terminates every remaining member.

#![allow(unsafe_code)]

use super::ProcessGroup;
use crate::config::{Priority, WindowStyle};
use crate::{Result, SandboxError};
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use tokio::process::Command;
use tracing::debug;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_FAILED, WAIT_OBJECT_0};
use windows::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, JobObjectExtendedLimitInformation,
    SetInformationJobObject, JOBOBJECT_EXTENDED_LIMIT_INFORMATION,
    JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
};
use windows::Win32::System::Threading::{
    GetCurrentProcess, OpenProcess, SetPriorityClass, WaitForSingleObject,
    ABOVE_NORMAL_PRIORITY_CLASS, BELOW_NORMAL_PRIORITY_CLASS, HIGH_PRIORITY_CLASS,
    IDLE_PRIORITY_CLASS, INFINITE, NORMAL_PRIORITY_CLASS, PROCESS_CREATION_FLAGS,
    PROCESS_SET_INFORMATION, PROCESS_SET_QUOTA, PROCESS_SYNCHRONIZE, PROCESS_TERMINATE,
    REALTIME_PRIORITY_CLASS,
};

const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Kill-on-close group backed by a Job Object
#[derive(Debug)]
pub struct JobObjectGroup {
    /// Deliberately never closed: closing it would terminate the supervisor
    /// itself. The OS releases it at process exit.
    job: HANDLE,
    members: Vec<u32>,
}

impl ProcessGroup for JobObjectGroup {
    fn create() -> Result<Self> {
        unsafe {
            let job = CreateJobObjectW(None, None)
                .map_err(|e| SandboxError::GroupCreation(format!("CreateJobObject: {e}")))?;

            let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = std::mem::zeroed();
            info.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;

            if let Err(e) = SetInformationJobObject(
                job,
                JobObjectExtendedLimitInformation,
                (&raw const info).cast(),
                std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
            ) {
                let _ = CloseHandle(job);
                return Err(SandboxError::GroupCreation(format!(
                    "unable to set kill-on-close policy: {e}"
                )));
            }

            debug!("Created job object with kill-on-close policy");
            Ok(Self {
                job,
                members: Vec::new(),
            })
        }
    }

    fn add_self(&mut self) -> Result<()> {
        let pid = std::process::id();
        unsafe {
            AssignProcessToJobObject(self.job, GetCurrentProcess()).map_err(|e| {
                SandboxError::GroupMembership {
                    pid,
                    reason: e.to_string(),
                }
            })?;
        }
        self.members.push(pid);
        debug!("Supervisor {} assigned to job object", pid);
        Ok(())
    }

    fn prepare(&self, _command: &mut Command) {
        // children of a job member are created inside the job
    }

    fn add_process(&mut self, pid: u32) -> Result<()> {
        unsafe {
            let access = PROCESS_SET_QUOTA | PROCESS_TERMINATE | PROCESS_SYNCHRONIZE;
            let process =
                OpenProcess(access, false, pid).map_err(|e| SandboxError::GroupMembership {
                    pid,
                    reason: e.to_string(),
                })?;

            let assigned = AssignProcessToJobObject(self.job, process);
            let already_exited = WaitForSingleObject(process, 0) == WAIT_OBJECT_0;
            let _ = CloseHandle(process);

            match assigned {
                Ok(()) => {}
                Err(e) if already_exited => {
                    debug!("Process {} exited before job assignment: {}", pid, e);
                }
                Err(e) => {
                    return Err(SandboxError::GroupMembership {
                        pid,
                        reason: e.to_string(),
                    })
                }
            }
        }
        self.members.push(pid);
        debug!("Process {} assigned to job object", pid);
        Ok(())
    }

    fn members(&self) -> &[u32] {
        &self.members
    }
}

/// Waitable termination signal for any process, child or not
#[derive(Debug)]
pub struct ExitSignal {
    pid: u32,
    handle: OwnedHandle,
}

impl ExitSignal {
    pub fn open(pid: u32) -> Result<Self> {
        let handle = unsafe { OpenProcess(PROCESS_SYNCHRONIZE, false, pid) }.map_err(|e| {
            SandboxError::ParentResolution {
                pid,
                reason: e.to_string(),
            }
        })?;
        // Safety: OpenProcess returned a fresh handle that nothing else owns
        let handle = unsafe { OwnedHandle::from_raw_handle(handle.0 as _) };
        debug!("Watching process {} for termination", pid);
        Ok(Self { pid, handle })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Resolves once the process has terminated
    pub async fn exited(&self) -> Result<()> {
        let pid = self.pid;
        let handle = self.handle.try_clone().map_err(|e| SandboxError::ProcessWait {
            pid,
            reason: e.to_string(),
        })?;
        let outcome = tokio::task::spawn_blocking(move || {
            let raw = HANDLE(handle.as_raw_handle() as _);
            unsafe { WaitForSingleObject(raw, INFINITE) }
        })
        .await
        .map_err(|e| SandboxError::ProcessWait {
            pid,
            reason: e.to_string(),
        })?;

        if outcome == WAIT_FAILED {
            return Err(SandboxError::ProcessWait {
                pid,
                reason: std::io::Error::last_os_error().to_string(),
            });
        }
        debug!("Process {} terminated", pid);
        Ok(())
    }
}

fn priority_class(priority: Priority) -> PROCESS_CREATION_FLAGS {
    match priority {
        Priority::Idle => IDLE_PRIORITY_CLASS,
        Priority::BelowNormal => BELOW_NORMAL_PRIORITY_CLASS,
        Priority::Normal => NORMAL_PRIORITY_CLASS,
        Priority::AboveNormal => ABOVE_NORMAL_PRIORITY_CLASS,
        Priority::High => HIGH_PRIORITY_CLASS,
        Priority::RealTime => REALTIME_PRIORITY_CLASS,
    }
}

/// Apply a priority class to a running process, best-effort
pub fn apply_priority(pid: u32, priority: Priority) {
    unsafe {
        let process = match OpenProcess(PROCESS_SET_INFORMATION, false, pid) {
            Ok(process) => process,
            Err(e) => {
                debug!("Priority {} not applied to process {}: {}", priority, pid, e);
                return;
            }
        };
        match SetPriorityClass(process, priority_class(priority)) {
            Ok(()) => debug!("Applied priority {} to process {}", priority, pid),
            Err(e) => debug!("Priority {} not applied to process {}: {}", priority, pid, e),
        }
        let _ = CloseHandle(process);
    }
}

/// Only `Hidden` has a creation-time equivalent; targets often ignore the rest
pub fn apply_window_style(command: &mut Command, style: WindowStyle) {
    match style {
        WindowStyle::Hidden => {
            command.creation_flags(CREATE_NO_WINDOW);
        }
        other => debug!("Window style {} left to the target", other),
    }
}
