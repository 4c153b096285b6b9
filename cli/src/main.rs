//! process-sandbox binary
//!
//! Launches a child process that dies with the sandbox and, optionally,
//! with a watched parent process. Exits with the child's exit code.

#![allow(unused_crate_dependencies)]

use sandbox_core::utils::init_tracing;

// Single-threaded: on Linux the child's parent-death signal is tied to the
// thread that spawned it, which must outlive the child.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    // stdout belongs to the child and the failure line; logs go to stderr
    let _ = init_tracing("warn");

    let code = cli::run(std::env::args_os()).await;
    std::process::exit(code);
}
