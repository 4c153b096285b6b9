//! Core error types and utilities

use thiserror::Error;

/// Errors raised while setting up or supervising a child process
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("failed to launch '{executable}': {source}")]
    Launch {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create process group: {0}")]
    GroupCreation(String),

    #[error("failed to add process {pid} to group: {reason}")]
    GroupMembership { pid: u32, reason: String },

    #[error("cannot watch parent process {pid}: {reason}")]
    ParentResolution { pid: u32, reason: String },

    #[error("failed to wait for process {pid}: {reason}")]
    ProcessWait { pid: u32, reason: String },

    #[error("{0}")]
    Argument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Error-kind label appended to the failure line, e.g. `(LaunchError)`
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxError::Launch { .. } => "LaunchError",
            SandboxError::GroupCreation(_) => "GroupCreationError",
            SandboxError::GroupMembership { .. } => "GroupError",
            SandboxError::ParentResolution { .. } => "ParentResolutionError",
            SandboxError::ProcessWait { .. } => "ProcessWaitError",
            SandboxError::Argument(_) => "ArgumentError",
            SandboxError::Io(_) => "IoError",
        }
    }

    /// Whether the child was never created (nothing to clean up)
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, SandboxError::Launch { .. })
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, SandboxError>;
