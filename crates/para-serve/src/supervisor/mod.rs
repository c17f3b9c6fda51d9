//! Starts, stops, and checks the backend process.
//!
//! Two strategies sit behind [`ProcessSupervisor`]: [`DirectSupervisor`]
//! spawns the interpreter itself and tracks it through a PID file, while
//! [`ServiceManagerSupervisor`] delegates to launchd or systemd.

mod direct;
mod service_manager;
mod setup;

use std::path::PathBuf;
use std::time::SystemTime;

use crate::error::ServiceError;

pub use self::direct::DirectSupervisor;
pub use self::service_manager::ServiceManagerSupervisor;
pub(crate) use self::setup::tail_lines;

pub(crate) const SUPERVISOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::supervisor");

/// A backend process this supervisor started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    /// OS process identifier.
    pub pid: u32,
    /// Port the backend was asked to listen on.
    pub port: u16,
    /// When the process was started, as far as it is known.
    pub started_at: Option<SystemTime>,
    /// File receiving the backend's output, `None` when inherited.
    pub log_path: Option<PathBuf>,
}

/// Liveness of the backend as observed by the operating system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessStatus {
    /// PID of the live process, `None` when not running.
    pub pid: Option<u32>,
    /// Port recorded when the process was started.
    pub port: Option<u16>,
    /// Best-effort start time.
    pub started_at: Option<SystemTime>,
}

impl ProcessStatus {
    /// Returns true when a live process was found.
    pub const fn is_running(&self) -> bool {
        self.pid.is_some()
    }
}

/// Result of stopping a running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOutcome {
    /// PID that was stopped.
    pub pid: u32,
    /// Whether SIGKILL was needed after the grace period.
    pub forced: bool,
}

/// Lifecycle operations over the single backend process.
pub trait ProcessSupervisor {
    /// Returns true when the dependency environment exists.
    fn is_ready(&self) -> bool;

    /// Provisions the dependency environment and any supervision artefacts.
    fn setup(&self) -> Result<(), ServiceError>;

    /// Starts the backend on `port`.
    ///
    /// With `background` the output goes to the server log and the process is
    /// detached from the caller's process group; otherwise output is
    /// inherited.
    fn start(&self, port: u16, background: bool) -> Result<ProcessHandle, ServiceError>;

    /// Stops the backend, escalating to SIGKILL after the grace period.
    fn stop(&self) -> Result<StopOutcome, ServiceError>;

    /// Reports liveness, removing stale state as a side effect.
    fn status(&self) -> Result<ProcessStatus, ServiceError>;
}
