//! Dispatches parsed commands to the service controller.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use para_serve::{LogKind, ServiceController, ServiceError, StartOptions, process};
use para_serve_config::Config;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{debug, info};

use crate::cli::CliCommand;
use crate::output::{
    EnvironmentReport, render_environment, render_started, render_status, render_stopped,
};
use crate::{AppError, IoStreams};

const COMMANDS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::commands");

/// How often a foreground start checks for interruption or server exit.
const FOREGROUND_POLL: Duration = Duration::from_millis(250);

pub(crate) fn execute<W, E>(
    command: CliCommand,
    config: &Config,
    io: &mut IoStreams<'_, W, E>,
) -> Result<ExitCode, AppError>
where
    W: Write,
    E: Write,
{
    let controller = ServiceController::from_config(config)?;
    debug!(
        target: COMMANDS_TARGET,
        dir = %controller.working_dir().display(),
        ?command,
        "dispatching command"
    );
    let stdout: &mut dyn Write = &mut *io.stdout;
    match command {
        CliCommand::Setup => {
            controller.setup()?;
            writeln!(
                stdout,
                "Environment ready at {}",
                controller.working_dir().display()
            )?;
        }
        CliCommand::Start {
            port,
            tunnel,
            foreground,
        } => {
            let options = StartOptions {
                port: port.unwrap_or_else(|| config.port()),
                tunnel_mode: tunnel.unwrap_or_else(|| config.tunnel_mode()),
                background: !foreground,
            };
            let status = controller.start_with(options)?;
            render_started(stdout, &status)?;
            if foreground {
                stdout.flush()?;
                run_in_foreground(&controller, status.pid)?;
            }
        }
        CliCommand::Stop => {
            let report = controller.stop()?;
            render_stopped(stdout, &report)?;
        }
        CliCommand::Status { output } => {
            let status = controller.status()?;
            render_status(stdout, &status, output.resolve(io.stdout_is_terminal))?;
        }
        CliCommand::Logs {
            tunnel,
            follow,
            lines,
        } => {
            let kind = if tunnel { LogKind::Tunnel } else { LogKind::Server };
            for line in controller.logs().tail(kind, lines)? {
                writeln!(stdout, "{line}")?;
            }
            if follow {
                stdout.flush()?;
                let shutdown = shutdown_flag()?;
                controller.logs().follow(kind, stdout, &shutdown)?;
            }
        }
        CliCommand::Env { output } => {
            let report = EnvironmentReport::collect(&controller, config);
            render_environment(stdout, &report, output.resolve(io.stdout_is_terminal))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Blocks until the server exits or the user interrupts, then stops
/// whatever is still running.
fn run_in_foreground(controller: &ServiceController, pid: Option<u32>) -> Result<(), AppError> {
    let shutdown = shutdown_flag()?;
    if let Some(pid) = pid {
        while !shutdown.load(Ordering::SeqCst) && process::is_alive(pid)? {
            thread::sleep(FOREGROUND_POLL);
        }
    }
    info!(
        target: COMMANDS_TARGET,
        interrupted = shutdown.load(Ordering::SeqCst),
        "leaving foreground mode"
    );
    match controller.stop() {
        Ok(_) | Err(ServiceError::NotRunning) => Ok(()),
        Err(error) => Err(error.into()),
    }
}

/// Sets a flag on SIGINT or SIGTERM instead of terminating the process.
fn shutdown_flag() -> Result<Arc<AtomicBool>, AppError> {
    let flag = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&flag))
            .map_err(AppError::SignalHandler)?;
    }
    Ok(flag)
}
