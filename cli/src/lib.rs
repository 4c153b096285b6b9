//! Command-line surface of the process sandbox
//!
//! Flags are only recognised before the first positional token. That token
//! is the executable, and everything after it is forwarded to the child
//! untouched, even tokens that look like our own flags.
//!
//! Flag names match case-insensitively and `/?` asks for help. A flag left
//! without its value at the end of the line is dropped. Priority and window
//! style are hints: a name that is not recognised is ignored.

use clap::error::ErrorKind;
use clap::{ArgAction, Parser};
use sandbox_core::report;
use sandbox_core::{LaunchConfig, Outcome, SandboxError, Supervisor, FAILURE_EXIT_CODE};
use std::ffi::OsString;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "process-sandbox")]
#[command(about = "Uses process groups to ensure child and parent processes die together")]
#[command(disable_help_flag = true)]
#[command(
    override_usage = "process-sandbox [--ppid PID] [--working DIR] [--priority PRIORITY] [--windowStyle STYLE] EXECUTABLE [ARGS]..."
)]
pub struct Cli {
    /// Display usage and quit
    #[arg(short = '?', long = "help", action = ArgAction::Help)]
    #[allow(dead_code)]
    help: Option<bool>,

    /// Parent process ID to wait on; the child is killed if it exits first
    #[arg(long, value_name = "PID")]
    pub ppid: Option<u32>,

    /// Working directory for the child
    #[arg(long, value_name = "DIR")]
    pub working: Option<PathBuf>,

    /// Process priority: Idle, BelowNormal, Normal, AboveNormal, High or RealTime
    #[arg(long, value_name = "PRIORITY")]
    pub priority: Option<String>,

    /// Window style: Normal, Hidden, Minimized or Maximized (not always honoured)
    #[arg(long = "windowStyle", visible_alias = "windowstyle", value_name = "STYLE")]
    pub window_style: Option<String>,

    /// Report a --ppid that cannot be watched instead of ignoring it
    #[arg(long)]
    pub strict_parent: bool,

    /// Program to launch, followed by its arguments
    #[arg(
        value_name = "EXECUTABLE",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}

impl Cli {
    /// Launch configuration, or `None` when no executable was given
    pub fn into_launch_config(self) -> Option<LaunchConfig> {
        let mut command = self.command.into_iter();
        let executable = command.next()?;

        let mut config = LaunchConfig::new(executable)
            .with_args(command)
            .with_parent(self.ppid.unwrap_or(0))
            .with_priority(hint("--priority", self.priority.as_deref()))
            .with_window_style(hint("--windowStyle", self.window_style.as_deref()))
            .with_strict_parent(self.strict_parent);
        if let Some(dir) = self.working {
            config = config.with_working_directory(dir);
        }
        Some(config)
    }
}

/// Parse a best-effort hint; unknown names are ignored
fn hint<T: FromStr<Err = SandboxError>>(flag: &str, value: Option<&str>) -> Option<T> {
    match value?.parse() {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            debug!("Ignoring {}: {}", flag, e);
            None
        }
    }
}

/// Own flags: canonical spelling and whether a value follows
const FLAGS: [(&str, bool); 7] = [
    ("--help", false),
    ("--ppid", true),
    ("--working", true),
    ("--priority", true),
    ("--windowStyle", true),
    ("--strict-parent", false),
    ("-?", false),
];

fn known_flag(name: &str) -> Option<(&'static str, bool)> {
    FLAGS
        .iter()
        .copied()
        .find(|(flag, _)| flag.eq_ignore_ascii_case(name))
}

/// Rewrite the tokens before the executable into the spelling clap expects.
///
/// The first token (the program name) and everything from the executable on
/// pass through untouched.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut tokens = args.into_iter().map(Into::into);
    let mut normalized: Vec<OsString> = tokens.next().into_iter().collect();

    while let Some(token) = tokens.next() {
        let Some(text) = token.to_str() else {
            normalized.push(token);
            break;
        };
        if text == "/?" {
            normalized.push("--help".into());
            continue;
        }

        let (name, inline_value) = match text.split_once('=') {
            Some((name, value)) if name.starts_with("--") => (name, Some(value)),
            _ => (text, None),
        };
        let Some((flag, takes_value)) = known_flag(name) else {
            // first positional: the executable
            normalized.push(token);
            break;
        };

        match inline_value {
            Some(value) => normalized.push(format!("{}={}", flag, value).into()),
            None if takes_value => match tokens.next() {
                Some(value) => {
                    normalized.push(flag.into());
                    normalized.push(value);
                }
                None => debug!("Ignoring {} without a value", flag),
            },
            None => normalized.push(flag.into()),
        }
    }

    normalized.extend(tokens);
    normalized
}

/// Run the sandbox for the given command line and return the exit code
/// the process should terminate with.
pub async fn run<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let cli = match Cli::try_parse_from(normalize_args(args)) {
        Ok(cli) => cli,
        Err(err) => return parse_failure(err),
    };

    let Some(config) = cli.into_launch_config() else {
        debug!("No executable given, nothing to do");
        return 0;
    };

    match Supervisor::new(config).run().await {
        Outcome::Completed { exit_code, .. } => exit_code,
        Outcome::Failed(err) => {
            report::report(&err);
            FAILURE_EXIT_CODE
        }
    }
}

fn parse_failure(err: clap::Error) -> i32 {
    match err.kind() {
        ErrorKind::DisplayHelp
        | ErrorKind::DisplayVersion
        | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
            let _ = err.print();
            0
        }
        _ => {
            report::report(&argument_error(&err));
            FAILURE_EXIT_CODE
        }
    }
}

/// First line of clap's message, without its `error: ` prefix
fn argument_error(err: &clap::Error) -> SandboxError {
    let rendered = err.to_string();
    let first = rendered.lines().next().unwrap_or_default().trim();
    let message = first.strip_prefix("error: ").unwrap_or(first);
    SandboxError::Argument(message.to_string())
}
