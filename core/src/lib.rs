//! Core functionality for the process sandbox
//!
//! This crate launches one child process bound to a kill-on-close process
//! group, optionally ties its lifetime to an external parent process, and
//! propagates the child's exit code. The `process-sandbox` binary in the
//! `cli` crate is a thin shell around [`Supervisor`].

pub mod config;
pub mod error;
pub mod launcher;
pub mod process;
pub mod report;
pub mod supervisor;


pub use config::{LaunchConfig, Priority, WindowStyle};
pub use error::{Result, SandboxError};
pub use launcher::ChildLauncher;
pub use process::{ExitSignal, NativeProcessGroup, ProcessGroup, TrackedProcess};
pub use report::{FailureReport, FAILURE_EXIT_CODE, LAUNCH_FAILURE_EVENT};
pub use supervisor::{ExitCause, Outcome, Supervisor, SupervisorState};

/// Core utilities and helper functions
pub mod utils {
    use tracing::debug;
    use tracing_subscriber::{fmt, EnvFilter};

    /// Environment variable holding the log filter
    pub const LOG_ENV: &str = "PROCESS_SANDBOX_LOG";

    /// Initialize tracing on stderr.
    ///
    /// The filter comes from `PROCESS_SANDBOX_LOG`, then `RUST_LOG`, then
    /// `default_level`. Standard output is left untouched.
    pub fn init_tracing(default_level: &str) -> crate::Result<()> {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new(default_level));

        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| crate::SandboxError::Io(std::io::Error::other(e.to_string())))?;

        debug!("Tracing initialized with default level: {}", default_level);
        Ok(())
    }
}
