//! CLI entrypoint for the Para MCP service supervisor.
//!
//! The binary delegates to [`para_serve_cli::run`], which loads configuration,
//! parses the command, and renders the typed results of the lifecycle
//! operations.

use std::io::{self, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    // Left unlocked: reaper threads may emit tracing events to stderr.
    let mut stderr = io::stderr();
    para_serve_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
