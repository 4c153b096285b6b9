//! Launch-failure line written to standard output
//!
//! A monitoring parent detects failed launches by parsing this single line:
//!
//! ```text
//! {"event": "LaunchFailure", "arg": "<message> (<error-kind>)"}
//! ```
//!
//! The line is formatted by hand because its exact bytes are part of the
//! contract (key order, the space after each colon, and escaping of only
//! `\` and `"`).

use crate::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

/// Event name carried by every failure line
pub const LAUNCH_FAILURE_EVENT: &str = "LaunchFailure";

/// Exit status used after a failure line has been written
pub const FAILURE_EXIT_CODE: i32 = 0;

/// One launch-failure event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub event: String,
    pub arg: String,
}

impl FailureReport {
    pub fn from_error(err: &SandboxError) -> Self {
        Self {
            event: LAUNCH_FAILURE_EVENT.to_string(),
            arg: format!("{} ({})", err, err.kind()),
        }
    }

    /// The line without its trailing newline
    pub fn to_line(&self) -> String {
        format!(
            "{{\"event\": \"{}\", \"arg\": \"{}\"}}",
            escape(&self.event),
            escape(&self.arg)
        )
    }

    /// Write the line and flush, so it survives an immediate process exit
    pub fn emit<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}", self.to_line())?;
        out.flush()
    }

    /// Read a failure line back
    pub fn parse_line(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim_end_matches(|c: char| c == '\r' || c == '\n'))
            .map_err(|e| SandboxError::Argument(format!("not a failure line: {}", e)))
    }
}

/// Report `err` on standard output. Write errors are ignored.
pub fn report(err: &SandboxError) {
    let report = FailureReport::from_error(err);
    let stdout = io::stdout();
    let mut lock = stdout.lock();
    let _ = report.emit(&mut lock);
}

/// Backslash-escape `\` and `"`. Everything else passes through verbatim.
pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            other => escaped.push(other),
        }
    }
    escaped
}
