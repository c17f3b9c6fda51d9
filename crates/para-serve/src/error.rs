//! Defines the unified error surface for supervision and tunnelling.

use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

/// Errors returned by every caller-facing operation.
///
/// None of these is fatal to the controlling program; each operation can be
/// retried by invoking it again.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The interpreter needed to provision the environment is not installed.
    #[error("interpreter '{program}' was not found on PATH")]
    RuntimeNotFound {
        /// Interpreter that was looked up.
        program: String,
    },
    /// Installing the backend's dependencies exited unsuccessfully.
    #[error("dependency installation failed (status: {status:?}): {detail}")]
    DependencyInstallFailed {
        /// Exit code of the failing command, when it exited normally.
        status: Option<i32>,
        /// Trailing diagnostic output from the failing command.
        detail: String,
    },
    /// The dependency environment has not been provisioned yet.
    #[error("environment at '{path}' is not set up; run 'para-serve setup' first")]
    EnvironmentNotSetup {
        /// Missing dependency environment.
        path: PathBuf,
    },
    /// The service-manager unit descriptor is missing or cannot be installed.
    #[error("service unit '{label}' is not installed at '{path}'")]
    ServiceUnitNotInstalled {
        /// Unit label.
        label: String,
        /// Expected descriptor location.
        path: PathBuf,
    },
    /// A live handle already exists.
    #[error("already running with pid {pid}")]
    AlreadyRunning {
        /// PID of the live process.
        pid: u32,
    },
    /// No live handle exists.
    #[error("not running")]
    NotRunning,
    /// The persistent tunnel could not be brought up.
    #[error("tunnel setup failed: {reason}")]
    TunnelSetupFailed {
        /// Human-readable cause.
        reason: String,
    },
    /// The tunnel client binary is not installed.
    #[error("tunnel binary '{binary}' was not found")]
    TunnelBinaryNotFound {
        /// Binary that was looked up.
        binary: String,
    },
    /// No public URL was discovered for the tunnel.
    #[error("tunnel URL not found: {reason}")]
    TunnelUrlNotFound {
        /// Human-readable cause.
        reason: String,
    },
    /// Spawning a child process failed.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing a PID, port, or URL file failed.
    #[error("failed to write state file '{path}': {source}")]
    StateWrite {
        /// File path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Reading a PID, port, or URL file failed.
    #[error("failed to read state file '{path}': {source}")]
    StateRead {
        /// File path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A state file held something other than the expected value.
    #[error("state file '{path}' holds an invalid value '{value}'")]
    StateParse {
        /// File path.
        path: PathBuf,
        /// Offending content.
        value: String,
    },
    /// Removing a stale state file failed.
    #[error("failed to remove stale file '{path}': {source}")]
    Cleanup {
        /// Path of the artefact that could not be removed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Preparing a log file or directory failed.
    #[error("failed to prepare log file '{path}': {source}")]
    LogPrepare {
        /// Log path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Reading a log file failed.
    #[error("failed to read log file '{path}': {source}")]
    LogRead {
        /// Log path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Signalling or probing a process failed.
    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        /// Target PID.
        pid: u32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// A PID could not be represented as a platform process identifier.
    #[error("invalid pid {pid}: {reason}")]
    InvalidPid {
        /// Offending PID.
        pid: u32,
        /// Why the PID was rejected.
        reason: &'static str,
    },
    /// Invoking the host service manager failed.
    #[error("service manager command '{command}' failed: {detail}")]
    ServiceManager {
        /// Command line that was executed.
        command: String,
        /// Exit status or IO failure description.
        detail: String,
    },
}

impl ServiceError {
    /// Returns true for [`ServiceError::NotRunning`].
    pub const fn is_not_running(&self) -> bool {
        matches!(self, Self::NotRunning)
    }
}
