//! Launch configuration for the supervised child
//!
//! `LaunchConfig` is built once from the command line and never mutated.
//! Scheduling priority and window style are hints: they parse
//! case-insensitively from their names and are applied best-effort.

use crate::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Scheduling-priority classes accepted by `--priority`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Idle,
    BelowNormal,
    Normal,
    AboveNormal,
    High,
    RealTime,
}

impl Priority {
    /// All variants, in ascending order of urgency
    pub const ALL: [Priority; 6] = [
        Priority::Idle,
        Priority::BelowNormal,
        Priority::Normal,
        Priority::AboveNormal,
        Priority::High,
        Priority::RealTime,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Priority::Idle => "Idle",
            Priority::BelowNormal => "BelowNormal",
            Priority::Normal => "Normal",
            Priority::AboveNormal => "AboveNormal",
            Priority::High => "High",
            Priority::RealTime => "RealTime",
        }
    }

    /// Unix nice value used for this class
    pub fn nice_value(&self) -> i32 {
        match self {
            Priority::Idle => 19,
            Priority::BelowNormal => 10,
            Priority::Normal => 0,
            Priority::AboveNormal => -5,
            Priority::High => -10,
            Priority::RealTime => -20,
        }
    }
}

/// Window-visibility styles accepted by `--windowStyle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowStyle {
    Normal,
    Hidden,
    Minimized,
    Maximized,
}

impl WindowStyle {
    pub const ALL: [WindowStyle; 4] = [
        WindowStyle::Normal,
        WindowStyle::Hidden,
        WindowStyle::Minimized,
        WindowStyle::Maximized,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WindowStyle::Normal => "Normal",
            WindowStyle::Hidden => "Hidden",
            WindowStyle::Minimized => "Minimized",
            WindowStyle::Maximized => "Maximized",
        }
    }
}

fn parse_named<T: Copy>(
    input: &str,
    all: &[T],
    name: impl Fn(&T) -> &'static str,
    what: &str,
) -> Result<T> {
    let wanted = input.trim();
    all.iter()
        .copied()
        .find(|candidate| name(candidate).eq_ignore_ascii_case(wanted))
        .ok_or_else(|| {
            let names: Vec<&str> = all.iter().map(&name).collect();
            SandboxError::Argument(format!(
                "unknown {} '{}' (expected one of {})",
                what,
                input,
                names.join(", ")
            ))
        })
}

impl FromStr for Priority {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self> {
        parse_named(s, &Priority::ALL, Priority::name, "priority")
    }
}

impl FromStr for WindowStyle {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self> {
        parse_named(s, &WindowStyle::ALL, WindowStyle::name, "window style")
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for WindowStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything needed to launch and supervise one child
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchConfig {
    /// Process whose termination also terminates the child
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_process_id: Option<u32>,
    /// Working directory for the child
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    /// Program to launch
    pub executable: PathBuf,
    /// Arguments forwarded to the program, in order
    #[serde(default)]
    pub executable_args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_style: Option<WindowStyle>,
    /// Fail instead of skipping the parent watch when `parent_process_id` cannot be opened
    #[serde(default)]
    pub strict_parent: bool,
}

impl LaunchConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            parent_process_id: None,
            working_directory: None,
            executable: executable.into(),
            executable_args: Vec::new(),
            priority: None,
            window_style: None,
            strict_parent: false,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.executable_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Watch `pid`; `0` means no parent
    pub fn with_parent(mut self, pid: u32) -> Self {
        self.parent_process_id = (pid != 0).then_some(pid);
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.working_directory = (!dir.as_os_str().is_empty()).then_some(dir);
        self
    }

    pub fn with_priority(mut self, priority: Option<Priority>) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_window_style(mut self, style: Option<WindowStyle>) -> Self {
        self.window_style = style;
        self
    }

    pub fn with_strict_parent(mut self, strict: bool) -> Self {
        self.strict_parent = strict;
        self
    }

    /// Arguments joined by single spaces.
    ///
    /// Arguments containing spaces must already be quoted by the caller;
    /// no quoting is added here.
    pub fn command_line(&self) -> String {
        self.executable_args.join(" ")
    }

    /// Display name of the executable, as used in error messages
    pub fn executable_name(&self) -> String {
        self.executable.to_string_lossy().into_owned()
    }
}
