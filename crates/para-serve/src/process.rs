//! OS-level process primitives: spawning detached children, liveness checks,
//! and graceful-then-forced termination.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::error::ServiceError;

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Interval between liveness checks while waiting for a process to exit.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Time allowed for SIGKILL to take effect before giving up on observing it.
const KILL_SETTLE: Duration = Duration::from_secs(1);

/// How a process ended after [`terminate`] was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process had already exited before it was signalled.
    AlreadyExited,
    /// The process exited after SIGTERM within the grace period.
    Graceful,
    /// The process had to be killed with SIGKILL.
    Forced,
}

impl Termination {
    /// Returns true when SIGKILL was needed.
    pub const fn was_forced(self) -> bool {
        matches!(self, Self::Forced)
    }
}

/// Where a spawned child's output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OutputTarget {
    /// Share the caller's stdout and stderr.
    Inherit,
    /// Append both streams to the file.
    Append(PathBuf),
    /// Truncate the file, then write both streams to it.
    Truncate(PathBuf),
}

/// Everything needed to spawn a supervised child.
#[derive(Debug, Clone)]
pub(crate) struct SpawnRequest {
    pub(crate) program: OsString,
    pub(crate) arguments: Vec<OsString>,
    pub(crate) working_dir: PathBuf,
    pub(crate) environment: BTreeMap<String, String>,
    pub(crate) output: OutputTarget,
    /// Detach from the caller's process group so terminal signals do not reach the child.
    pub(crate) detach: bool,
}

/// Spawns the child and hands it to a reaper thread, returning its PID.
///
/// The reaper waits on the child so it never lingers as a zombie once it
/// exits; liveness checks therefore observe the exit promptly.
pub(crate) fn spawn_detached(request: &SpawnRequest) -> Result<u32, ServiceError> {
    let mut command = Command::new(&request.program);
    command
        .args(&request.arguments)
        .current_dir(&request.working_dir)
        .envs(&request.environment)
        .stdin(Stdio::null());
    match &request.output {
        OutputTarget::Inherit => {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
        OutputTarget::Append(path) => {
            let log = open_log(path, false)?;
            let log_err = clone_log(&log, path)?;
            command.stdout(Stdio::from(log)).stderr(Stdio::from(log_err));
        }
        OutputTarget::Truncate(path) => {
            let log = open_log(path, true)?;
            let log_err = clone_log(&log, path)?;
            command.stdout(Stdio::from(log)).stderr(Stdio::from(log_err));
        }
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        if request.detach {
            command.process_group(0);
        }
    }
    let child = command.spawn().map_err(|source| ServiceError::Spawn {
        program: request.program.to_string_lossy().into_owned(),
        source,
    })?;
    let pid = child.id();
    info!(
        target: PROCESS_TARGET,
        pid,
        program = %request.program.to_string_lossy(),
        dir = %request.working_dir.display(),
        "spawned child process"
    );
    reap_in_background(child);
    Ok(pid)
}

fn reap_in_background(mut child: Child) {
    let pid = child.id();
    let spawned = thread::Builder::new()
        .name(format!("reaper-{pid}"))
        .spawn(move || match child.wait() {
            Ok(status) => debug!(target: PROCESS_TARGET, pid, ?status, "child exited"),
            Err(error) => warn!(target: PROCESS_TARGET, pid, %error, "failed to reap child"),
        });
    if let Err(error) = spawned {
        warn!(target: PROCESS_TARGET, pid, %error, "failed to start reaper thread");
    }
}

fn open_log(path: &Path, truncate: bool) -> Result<File, ServiceError> {
    let to_error = |source| ServiceError::LogPrepare {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(to_error)?;
    }
    let mut options = OpenOptions::new();
    options.create(true);
    if truncate {
        options.write(true).truncate(true);
    } else {
        options.append(true);
    }
    options.open(path).map_err(to_error)
}

fn clone_log(file: &File, path: &Path) -> Result<File, ServiceError> {
    file.try_clone().map_err(|source| ServiceError::LogPrepare {
        path: path.to_path_buf(),
        source,
    })
}

/// Converts a PID into the platform representation, rejecting values `kill(2)`
/// would interpret as process groups.
pub(crate) fn to_pid(pid: u32) -> Result<Pid, ServiceError> {
    if pid == 0 {
        return Err(ServiceError::InvalidPid {
            pid,
            reason: "pid 0 addresses the caller's process group",
        });
    }
    let raw = i32::try_from(pid).map_err(|_| ServiceError::InvalidPid {
        pid,
        reason: "pid exceeds the platform maximum",
    })?;
    Ok(Pid::from_raw(raw))
}

/// Liveness check: true while `pid` refers to a running, non-zombie process.
pub fn is_alive(pid: u32) -> Result<bool, ServiceError> {
    let target = match to_pid(pid) {
        Ok(target) => target,
        Err(_) => return Ok(false),
    };
    match kill(target, None) {
        Ok(()) => Ok(!is_zombie(pid)),
        Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(source) => Err(ServiceError::Signal { pid, source }),
    }
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    // The state field follows the parenthesised command name, which may itself
    // contain spaces or parentheses.
    fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            stat.rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next().map(|state| state == "Z"))
        })
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// Sends `signal`, returning `false` when the process no longer exists.
pub(crate) fn send_signal(pid: u32, signal: Signal) -> Result<bool, ServiceError> {
    match kill(to_pid(pid)?, signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(source) => Err(ServiceError::Signal { pid, source }),
    }
}

/// Polls liveness until the process exits or `timeout` elapses.
pub(crate) fn wait_for_exit(pid: u32, timeout: Duration) -> Result<bool, ServiceError> {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_alive(pid)? {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Sends SIGTERM, waits up to `grace` for the process to exit, then SIGKILL.
pub(crate) fn terminate(pid: u32, grace: Duration) -> Result<Termination, ServiceError> {
    if !send_signal(pid, Signal::SIGTERM)? {
        debug!(target: PROCESS_TARGET, pid, "process already exited");
        return Ok(Termination::AlreadyExited);
    }
    if wait_for_exit(pid, grace)? {
        info!(target: PROCESS_TARGET, pid, "process exited after SIGTERM");
        return Ok(Termination::Graceful);
    }
    warn!(
        target: PROCESS_TARGET,
        pid,
        grace_ms = grace.as_millis(),
        "process ignored SIGTERM; sending SIGKILL"
    );
    if send_signal(pid, Signal::SIGKILL)? && !wait_for_exit(pid, KILL_SETTLE)? {
        warn!(target: PROCESS_TARGET, pid, "process still visible after SIGKILL");
    }
    Ok(Termination::Forced)
}
