//! Child launching
//!
//! Builds the child's command from a [`LaunchConfig`], arms it for its
//! process group, spawns it with inherited standard streams and applies the
//! priority hint once it runs.

use crate::config::LaunchConfig;
use crate::process::{self, ProcessGroup, TrackedProcess};
use crate::{Result, SandboxError};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error};

/// Starts the configured executable as a member of a process group
#[derive(Debug, Clone, Copy)]
pub struct ChildLauncher<'a> {
    config: &'a LaunchConfig,
}

impl<'a> ChildLauncher<'a> {
    pub fn new(config: &'a LaunchConfig) -> Self {
        Self { config }
    }

    /// The command that will be spawned, before group preparation
    pub fn command(&self) -> Command {
        let config = self.config;
        let mut command = Command::new(&config.executable);

        #[cfg(windows)]
        {
            if !config.executable_args.is_empty() {
                command.raw_arg(config.command_line());
            }
        }
        #[cfg(not(windows))]
        {
            command.args(&config.executable_args);
        }

        if let Some(dir) = &config.working_directory {
            command.current_dir(dir);
        }
        if let Some(style) = config.window_style {
            process::apply_window_style(&mut command, style);
        }

        command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(false);
        command
    }

    /// Spawn the child, prepared for `group` but not yet registered in it
    pub fn launch<G: ProcessGroup>(&self, group: &G) -> Result<TrackedProcess> {
        let executable = self.config.executable_name();
        debug!("Launching {} {:?}", executable, self.config.executable_args);

        let mut command = self.command();
        group.prepare(&mut command);

        let child = command.spawn().map_err(|e| {
            error!("Failed to launch '{}': {}", executable, e);
            SandboxError::Launch {
                executable: executable.clone(),
                source: e,
            }
        })?;

        let pid = child.id().ok_or_else(|| SandboxError::Launch {
            executable: executable.clone(),
            source: std::io::Error::other("launched child did not have a PID"),
        })?;

        if let Some(priority) = self.config.priority {
            process::apply_priority(pid, priority);
        }

        debug!("Launched '{}' as process {}", executable, pid);
        Ok(TrackedProcess::new(pid, child))
    }
}
